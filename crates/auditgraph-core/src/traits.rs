use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;

use crate::{CallError, Criterion, Finding, GathererKind, Judge, OpinionDraft, RunState};

/// Evidence-gathering collaborator behind one branch of the first fan-out.
#[async_trait]
pub trait EvidenceGatherer: Send + Sync {
    fn kind(&self) -> GathererKind;

    async fn gather(
        &self,
        snapshot: &RunState,
        cancel: &CancellationToken,
    ) -> Result<Vec<Finding>, CallError>;
}

/// Evaluation collaborator: one judge's opinion on one criterion.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        snapshot: &RunState,
        criterion: &Criterion,
        judge: Judge,
        cancel: &CancellationToken,
    ) -> Result<OpinionDraft, CallError>;
}

/// Source of the ground-truth file list.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch(&self, cancel: &CancellationToken) -> Result<BTreeSet<String>, CallError>;
}
