use async_trait::async_trait;
use auditgraph_core::{DegradedMark, NodeId, RunState, StateField, StateFragment};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::NodeError;

/// What a node body receives: its identity, a read-only snapshot of every
/// fragment committed before it became eligible, and the run's cancellation signal.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub id: NodeId,
    pub snapshot: Arc<RunState>,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait GraphNode: Send + Sync {
    /// Fields this node may write. `degraded` is always implied.
    fn writes(&self) -> &[StateField];

    async fn execute(&self, ctx: NodeContext) -> Result<StateFragment, NodeError>;

    /// Fragment committed in place of a failed execution.
    fn degraded(&self, id: NodeId, error: &NodeError) -> StateFragment {
        StateFragment::new().with_degraded([DegradedMark::node(id, error.to_string())])
    }
}

/// Node that commits nothing. Barriers whose only job is to synchronize use it.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

#[async_trait]
impl GraphNode for PassThrough {
    fn writes(&self) -> &[StateField] {
        &[]
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<StateFragment, NodeError> {
        Ok(StateFragment::new())
    }
}
