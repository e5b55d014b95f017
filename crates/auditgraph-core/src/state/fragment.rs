use std::collections::BTreeSet;

use crate::{
    DegradedMark, Evidence, IntegritySets, Manifest, Opinion, RunReport, StateField,
    SynthesisOutcome,
};

/// A typed write against one state field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldWrite {
    Evidence(Vec<Evidence>),
    Opinions(Vec<Opinion>),
    Manifest(Manifest),
    Integrity(IntegritySets),
    Synthesis(SynthesisOutcome),
    Report(RunReport),
    Degraded(BTreeSet<DegradedMark>),
}

impl FieldWrite {
    pub fn field(&self) -> StateField {
        match self {
            FieldWrite::Evidence(_) => StateField::Evidence,
            FieldWrite::Opinions(_) => StateField::Opinions,
            FieldWrite::Manifest(_) => StateField::Manifest,
            FieldWrite::Integrity(_) => StateField::Integrity,
            FieldWrite::Synthesis(_) => StateField::Synthesis,
            FieldWrite::Report(_) => StateField::Report,
            FieldWrite::Degraded(_) => StateField::Degraded,
        }
    }
}

/// Everything one node commits in a single serialized commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateFragment {
    writes: Vec<FieldWrite>,
}

impl StateFragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, write: FieldWrite) -> Self {
        self.writes.push(write);
        self
    }

    pub fn with_evidence(self, evidence: Vec<Evidence>) -> Self {
        self.with(FieldWrite::Evidence(evidence))
    }

    pub fn with_opinions(self, opinions: Vec<Opinion>) -> Self {
        self.with(FieldWrite::Opinions(opinions))
    }

    pub fn with_manifest(self, manifest: Manifest) -> Self {
        self.with(FieldWrite::Manifest(manifest))
    }

    pub fn with_integrity(self, integrity: IntegritySets) -> Self {
        self.with(FieldWrite::Integrity(integrity))
    }

    pub fn with_synthesis(self, synthesis: SynthesisOutcome) -> Self {
        self.with(FieldWrite::Synthesis(synthesis))
    }

    pub fn with_report(self, report: RunReport) -> Self {
        self.with(FieldWrite::Report(report))
    }

    pub fn with_degraded(self, marks: impl IntoIterator<Item = DegradedMark>) -> Self {
        let marks: BTreeSet<_> = marks.into_iter().collect();
        if marks.is_empty() {
            return self;
        }
        self.with(FieldWrite::Degraded(marks))
    }

    pub fn fields(&self) -> impl Iterator<Item = StateField> + '_ {
        self.writes.iter().map(FieldWrite::field)
    }

    pub fn writes(&self) -> &[FieldWrite] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub(crate) fn into_writes(self) -> Vec<FieldWrite> {
        self.writes
    }
}
