use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::fragment::{FieldWrite, StateFragment};
use super::reducers::{AppendLog, ReducerKind, UnionSet, WriteOnce};
use crate::{
    Criterion, DegradedMark, Evidence, IntegritySets, Manifest, NodeId, Opinion, RunReport,
    StateError, SynthesisOutcome,
};

/// Named fields of the run state. The set is closed: nodes cannot create fields at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    Evidence,
    Opinions,
    Manifest,
    Integrity,
    Synthesis,
    Report,
    Degraded,
}

impl StateField {
    pub const ALL: [StateField; 7] = [
        StateField::Evidence,
        StateField::Opinions,
        StateField::Manifest,
        StateField::Integrity,
        StateField::Synthesis,
        StateField::Report,
        StateField::Degraded,
    ];

    /// The reducer semantics the field's storage implements.
    pub fn native_reducer(&self) -> ReducerKind {
        match self {
            StateField::Evidence | StateField::Opinions => ReducerKind::Append,
            StateField::Degraded => ReducerKind::Union,
            StateField::Manifest
            | StateField::Integrity
            | StateField::Synthesis
            | StateField::Report => ReducerKind::OverwriteOnce,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StateField::Evidence => "evidence",
            StateField::Opinions => "opinions",
            StateField::Manifest => "manifest",
            StateField::Integrity => "integrity",
            StateField::Synthesis => "synthesis",
            StateField::Report => "report",
            StateField::Degraded => "degraded",
        }
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-field reducer registry, fixed before the graph is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSchema {
    reducers: BTreeMap<StateField, ReducerKind>,
}

impl StateSchema {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every field registered with its native reducer.
    pub fn standard() -> Self {
        Self {
            reducers: StateField::ALL
                .iter()
                .map(|field| (*field, field.native_reducer()))
                .collect(),
        }
    }

    pub fn register(mut self, field: StateField, kind: ReducerKind) -> Result<Self, StateError> {
        let expected = field.native_reducer();
        if kind != expected {
            return Err(StateError::ReducerMismatch {
                field,
                expected,
                registered: kind,
            });
        }
        self.reducers.insert(field, kind);
        Ok(self)
    }

    pub fn reducer(&self, field: StateField) -> Option<ReducerKind> {
        self.reducers.get(&field).copied()
    }

    pub fn require(&self, field: StateField) -> Result<ReducerKind, StateError> {
        self.reducer(field).ok_or(StateError::MissingReducer(field))
    }
}

/// The shared result document of one run.
///
/// Collections only grow; single-valued fields are written once by their
/// designated writer. Nodes only ever see an immutable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunState {
    criteria: Vec<Criterion>,
    evidence: AppendLog<Evidence>,
    opinions: AppendLog<Opinion>,
    manifest: WriteOnce<Manifest>,
    integrity: WriteOnce<IntegritySets>,
    synthesis: WriteOnce<SynthesisOutcome>,
    report: WriteOnce<RunReport>,
    degraded: UnionSet<DegradedMark>,
}

impl RunState {
    pub fn new(criteria: Vec<Criterion>) -> Self {
        Self {
            criteria,
            evidence: AppendLog::default(),
            opinions: AppendLog::default(),
            manifest: WriteOnce::default(),
            integrity: WriteOnce::default(),
            synthesis: WriteOnce::default(),
            report: WriteOnce::default(),
            degraded: UnionSet::default(),
        }
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn evidence(&self) -> &AppendLog<Evidence> {
        &self.evidence
    }

    pub fn opinions(&self) -> &AppendLog<Opinion> {
        &self.opinions
    }

    pub fn opinions_for<'a>(&'a self, criterion_id: &'a str) -> impl Iterator<Item = &'a Opinion> + 'a {
        self.opinions
            .iter()
            .filter(move |op| op.criterion_id == criterion_id)
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.get()
    }

    pub fn integrity(&self) -> Option<&IntegritySets> {
        self.integrity.get()
    }

    pub fn synthesis(&self) -> Option<&SynthesisOutcome> {
        self.synthesis.get()
    }

    pub fn report(&self) -> Option<&RunReport> {
        self.report.get()
    }

    pub fn degraded(&self) -> &UnionSet<DegradedMark> {
        &self.degraded
    }

    pub fn is_written(&self, field: StateField) -> bool {
        match field {
            StateField::Evidence => !self.evidence.is_empty(),
            StateField::Opinions => !self.opinions.is_empty(),
            StateField::Manifest => self.manifest.is_written(),
            StateField::Integrity => self.integrity.is_written(),
            StateField::Synthesis => self.synthesis.is_written(),
            StateField::Report => self.report.is_written(),
            StateField::Degraded => !self.degraded.is_empty(),
        }
    }

    fn check_once(&self, field: StateField, origin: NodeId) -> Result<(), StateError> {
        match field {
            StateField::Manifest => self.manifest.check(field, origin),
            StateField::Integrity => self.integrity.check(field, origin),
            StateField::Synthesis => self.synthesis.check(field, origin),
            StateField::Report => self.report.check(field, origin),
            StateField::Evidence | StateField::Opinions | StateField::Degraded => Ok(()),
        }
    }

    fn apply(&mut self, origin: NodeId, write: FieldWrite) -> Result<(), StateError> {
        let field = write.field();
        match write {
            FieldWrite::Evidence(items) => self.evidence.append(origin, items),
            FieldWrite::Opinions(items) => self.opinions.append(origin, items),
            FieldWrite::Degraded(marks) => self.degraded.union(marks),
            FieldWrite::Manifest(value) => self.manifest.set(field, origin, value)?,
            FieldWrite::Integrity(value) => self.integrity.set(field, origin, value)?,
            FieldWrite::Synthesis(value) => self.synthesis.set(field, origin, value)?,
            FieldWrite::Report(value) => self.report.set(field, origin, value)?,
        }
        Ok(())
    }
}

/// Owner of a run's state and the single serialized commit path.
///
/// Commits take `&mut self`, so exactly one writer exists at a time; snapshots
/// are cheap `Arc` clones and the next commit copies on write if a snapshot
/// is still alive.
#[derive(Debug)]
pub struct StateStore {
    schema: StateSchema,
    state: Arc<RunState>,
    commits: usize,
}

impl StateStore {
    pub fn new(schema: StateSchema, initial: RunState) -> Self {
        Self {
            schema,
            state: Arc::new(initial),
            commits: 0,
        }
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn snapshot(&self) -> Arc<RunState> {
        Arc::clone(&self.state)
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Apply a fragment atomically: every write is validated before any is applied.
    pub fn commit(
        &mut self,
        origin: NodeId,
        declared: &[StateField],
        fragment: StateFragment,
    ) -> Result<(), StateError> {
        let mut once_fields = BTreeSet::new();
        for field in fragment.fields() {
            if !declared.contains(&field) {
                return Err(StateError::UndeclaredWrite {
                    node: origin,
                    field,
                });
            }
            if self.schema.require(field)? == ReducerKind::OverwriteOnce {
                self.state.check_once(field, origin)?;
                if !once_fields.insert(field) {
                    return Err(StateError::AlreadyWritten {
                        field,
                        writer: origin,
                        attempted: origin,
                    });
                }
            }
        }

        let writes = fragment.into_writes();
        let count = writes.len();
        let state = Arc::make_mut(&mut self.state);
        for write in writes {
            state.apply(origin, write)?;
        }
        self.commits += 1;
        debug!(node = %origin, writes = count, commit = self.commits, "committed fragment");
        Ok(())
    }

    pub fn into_state(self) -> RunState {
        Arc::try_unwrap(self.state).unwrap_or_else(|shared| (*shared).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Finding, GathererKind, IntegrityConfidence};

    const REPO: NodeId = NodeId::Gatherer(GathererKind::Repository);
    const DOCS: NodeId = NodeId::Gatherer(GathererKind::Documentation);

    fn evidence(node: NodeId, goal: &str) -> Vec<Evidence> {
        vec![Evidence::from_finding(
            node,
            0,
            Finding {
                goal: goal.into(),
                found: true,
                ..Default::default()
            },
        )]
    }

    fn integrity() -> IntegritySets {
        IntegritySets {
            verified_paths: BTreeSet::new(),
            hallucinated_paths: BTreeSet::new(),
            unverified_paths: BTreeSet::new(),
            confidence: IntegrityConfidence::Full,
        }
    }

    #[test]
    fn commit_order_does_not_change_state() {
        let mut a = StateStore::new(StateSchema::standard(), RunState::new(vec![]));
        let mut b = StateStore::new(StateSchema::standard(), RunState::new(vec![]));
        let declared = [StateField::Evidence];

        a.commit(REPO, &declared, StateFragment::new().with_evidence(evidence(REPO, "repo")))
            .unwrap();
        a.commit(DOCS, &declared, StateFragment::new().with_evidence(evidence(DOCS, "docs")))
            .unwrap();
        b.commit(DOCS, &declared, StateFragment::new().with_evidence(evidence(DOCS, "docs")))
            .unwrap();
        b.commit(REPO, &declared, StateFragment::new().with_evidence(evidence(REPO, "repo")))
            .unwrap();

        assert_eq!(
            serde_json::to_string(&*a.snapshot()).unwrap(),
            serde_json::to_string(&*b.snapshot()).unwrap()
        );
    }

    #[test]
    fn undeclared_write_is_rejected() {
        let mut store = StateStore::new(StateSchema::standard(), RunState::new(vec![]));
        let err = store
            .commit(
                REPO,
                &[StateField::Evidence],
                StateFragment::new().with_integrity(integrity()),
            )
            .unwrap_err();
        assert_eq!(
            err,
            StateError::UndeclaredWrite {
                node: REPO,
                field: StateField::Integrity
            }
        );
        assert_eq!(store.commits(), 0);
    }

    #[test]
    fn failed_commit_leaves_state_untouched() {
        let mut store = StateStore::new(StateSchema::standard(), RunState::new(vec![]));
        let declared = [StateField::Evidence, StateField::Integrity];
        store
            .commit(
                NodeId::IntegrityFilter,
                &declared,
                StateFragment::new().with_integrity(integrity()),
            )
            .unwrap();

        let fragment = StateFragment::new()
            .with_evidence(evidence(NodeId::IntegrityFilter, "late"))
            .with_integrity(integrity());
        assert!(store
            .commit(NodeId::IntegrityFilter, &declared, fragment)
            .is_err());
        assert!(store.snapshot().evidence().is_empty());
    }

    #[test]
    fn missing_reducer_is_reported() {
        let schema = StateSchema::empty()
            .register(StateField::Evidence, ReducerKind::Append)
            .unwrap();
        let mut store = StateStore::new(schema, RunState::new(vec![]));
        let err = store
            .commit(
                DOCS,
                &[StateField::Degraded],
                StateFragment::new().with_degraded([DegradedMark::node(DOCS, "timeout")]),
            )
            .unwrap_err();
        assert_eq!(err, StateError::MissingReducer(StateField::Degraded));
    }

    #[test]
    fn registering_wrong_reducer_fails() {
        let err = StateSchema::empty()
            .register(StateField::Manifest, ReducerKind::Union)
            .unwrap_err();
        assert!(matches!(err, StateError::ReducerMismatch { .. }));
    }

    #[test]
    fn snapshots_are_isolated_from_later_commits() {
        let mut store = StateStore::new(StateSchema::standard(), RunState::new(vec![]));
        let before = store.snapshot();
        store
            .commit(
                REPO,
                &[StateField::Evidence],
                StateFragment::new().with_evidence(evidence(REPO, "repo")),
            )
            .unwrap();
        assert!(before.evidence().is_empty());
        assert_eq!(store.snapshot().evidence().len(), 1);
    }
}
