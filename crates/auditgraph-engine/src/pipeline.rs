use async_trait::async_trait;
use auditgraph_ai::ResilientCaller;
use auditgraph_core::{
    CallError, Criterion, DegradedMark, Evaluator, Evidence, EvidenceGatherer, Judge, Manifest,
    ManifestSource, NodeId, RunConfig, RunState, Rubric, ShortCircuitScope, StateField,
    StateFragment, StateSchema,
};
use auditgraph_graph::{
    Graph, GraphBuilder, GraphError, GraphNode, GraphScheduler, NodeContext, NodeError, Route,
    RoutingError, RunError, RunOutcome,
};
use futures::future::join_all;
use metrics::counter;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::integrity::{normalize_path, CitationScope, EvidenceIntegrityFilter};
use crate::report::{build_report, ReportInputs};
use crate::synthesis::{not_evaluated, SynthesisRuleEngine};

/// Routing predicate after the integrity filter: evaluate when any evidence
/// was committed, otherwise go straight to finalization. Fails if the
/// integrity sets have not been committed yet.
pub fn route_on_evidence(state: &RunState) -> Result<Route, RoutingError> {
    if !state.is_written(StateField::Integrity) {
        return Err(RoutingError::MissingField(StateField::Integrity));
    }
    Ok(if state.evidence().is_empty() {
        Route::Finalize
    } else {
        Route::Evaluate
    })
}

/// First-stage branch: one evidence gatherer behind the resilient-call wrapper.
pub struct GatherNode {
    gatherer: Arc<dyn EvidenceGatherer>,
    caller: ResilientCaller,
}

impl GatherNode {
    pub fn new(gatherer: Arc<dyn EvidenceGatherer>, caller: ResilientCaller) -> Self {
        Self { gatherer, caller }
    }
}

#[async_trait]
impl GraphNode for GatherNode {
    fn writes(&self) -> &[StateField] {
        &[StateField::Evidence]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<StateFragment, NodeError> {
        let snapshot = &ctx.snapshot;
        let cancel = &ctx.cancel;
        let findings = self
            .caller
            .call(cancel, |_| self.gatherer.gather(snapshot, cancel))
            .await?;

        let evidence: Vec<Evidence> = findings
            .into_iter()
            .enumerate()
            .map(|(index, finding)| Evidence::from_finding(ctx.id, index, finding))
            .collect();
        info!(node = %ctx.id, evidence = evidence.len(), "evidence gathered");
        counter!("auditgraph_evidence_committed").increment(evidence.len() as u64);
        Ok(StateFragment::new().with_evidence(evidence))
    }
}

/// Fetches the ground-truth file list alongside the gatherers. A failed fetch
/// is not a node failure: it commits `Manifest::Unavailable`.
pub struct ManifestNode {
    source: Arc<dyn ManifestSource>,
    caller: ResilientCaller,
}

impl ManifestNode {
    pub fn new(source: Arc<dyn ManifestSource>, caller: ResilientCaller) -> Self {
        Self { source, caller }
    }

    fn unavailable(id: NodeId, reason: String) -> StateFragment {
        StateFragment::new()
            .with_manifest(Manifest::Unavailable {
                reason: reason.clone(),
            })
            .with_degraded([DegradedMark::node(id, reason)])
    }
}

#[async_trait]
impl GraphNode for ManifestNode {
    fn writes(&self) -> &[StateField] {
        &[StateField::Manifest]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<StateFragment, NodeError> {
        let cancel = &ctx.cancel;
        match self.caller.call(cancel, |_| self.source.fetch(cancel)).await {
            Ok(paths) => {
                let paths: BTreeSet<String> = paths
                    .iter()
                    .map(|p| normalize_path(p))
                    .filter(|p| !p.is_empty())
                    .collect();
                info!(files = paths.len(), "manifest fetched");
                Ok(StateFragment::new().with_manifest(Manifest::Available { paths }))
            }
            Err(error) if error.is_cancelled() => Err(error.into()),
            Err(error) => {
                warn!(%error, "manifest unavailable, integrity will be degraded");
                Ok(Self::unavailable(ctx.id, error.to_string()))
            }
        }
    }

    fn degraded(&self, id: NodeId, error: &NodeError) -> StateFragment {
        Self::unavailable(id, error.to_string())
    }
}

/// First barrier. Commits nothing; all gatherers and the manifest fetch have
/// resolved by the time it runs.
pub struct EvidenceAggregatorNode;

#[async_trait]
impl GraphNode for EvidenceAggregatorNode {
    fn writes(&self) -> &[StateField] {
        &[]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<StateFragment, NodeError> {
        let mut per_producer: BTreeMap<NodeId, usize> = BTreeMap::new();
        for evidence in ctx.snapshot.evidence().iter() {
            *per_producer.entry(evidence.producer).or_default() += 1;
        }
        info!(
            evidence = ctx.snapshot.evidence().len(),
            producers = per_producer.len(),
            degraded = ctx.snapshot.degraded().len(),
            "evidence aggregated"
        );
        for (producer, count) in per_producer {
            debug!(%producer, count, "evidence by producer");
        }
        Ok(StateFragment::new())
    }
}

/// Cross-references evidence citations against the manifest, once.
pub struct IntegrityNode;

#[async_trait]
impl GraphNode for IntegrityNode {
    fn writes(&self) -> &[StateField] {
        &[StateField::Integrity]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<StateFragment, NodeError> {
        let sets = EvidenceIntegrityFilter::check(&ctx.snapshot, CitationScope::Evidence);
        info!(
            verified = sets.verified_paths.len(),
            hallucinated = sets.hallucinated_paths.len(),
            unverified = sets.unverified_paths.len(),
            "integrity checked"
        );
        Ok(StateFragment::new().with_integrity(sets))
    }
}

/// Second-stage branch: one judge evaluating every criterion concurrently.
/// A criterion whose evaluation fails is recorded in the degraded ledger; the
/// other criteria still commit.
pub struct JudgeNode {
    judge: Judge,
    evaluator: Arc<dyn Evaluator>,
    caller: ResilientCaller,
    scope: ShortCircuitScope,
}

impl JudgeNode {
    pub fn new(
        judge: Judge,
        evaluator: Arc<dyn Evaluator>,
        caller: ResilientCaller,
        scope: ShortCircuitScope,
    ) -> Self {
        Self {
            judge,
            evaluator,
            caller,
            scope,
        }
    }

    /// Criteria this judge evaluates. Under per-criterion short-circuiting,
    /// criteria no evidence targets are left for synthesis to mark not evaluated.
    fn criteria<'s>(&self, state: &'s RunState) -> Vec<&'s Criterion> {
        state
            .criteria()
            .iter()
            .filter(|c| match self.scope {
                ShortCircuitScope::Global => true,
                ShortCircuitScope::PerCriterion => {
                    state.evidence().iter().any(|e| e.targets(&c.id))
                }
            })
            .collect()
    }
}

#[async_trait]
impl GraphNode for JudgeNode {
    fn writes(&self) -> &[StateField] {
        &[StateField::Opinions]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<StateFragment, NodeError> {
        let snapshot = &ctx.snapshot;
        let cancel = &ctx.cancel;
        let judge = self.judge;
        let criteria = self.criteria(snapshot);
        let skipped = snapshot.criteria().len() - criteria.len();
        if skipped > 0 {
            debug!(judge = judge.as_str(), skipped, "criteria without targeted evidence skipped");
        }

        let results = join_all(criteria.iter().map(|criterion| async move {
            let outcome = self
                .caller
                .call(cancel, |_| async move {
                    let draft = self
                        .evaluator
                        .evaluate(snapshot, criterion, judge, cancel)
                        .await?;
                    draft
                        .into_opinion(&criterion.id, judge)
                        .map_err(CallError::from)
                })
                .await;
            (*criterion, outcome)
        }))
        .await;

        let mut opinions = Vec::new();
        let mut marks = Vec::new();
        for (criterion, outcome) in results {
            match outcome {
                Ok(opinion) => opinions.push(opinion),
                Err(error) if error.is_cancelled() => return Err(error.into()),
                Err(error) => {
                    warn!(
                        judge = judge.as_str(),
                        criterion = %criterion.id,
                        %error,
                        "evaluation failed, criterion degraded"
                    );
                    counter!("auditgraph_evaluations_degraded").increment(1);
                    marks.push(DegradedMark::criterion(ctx.id, &criterion.id, error.to_string()));
                }
            }
        }

        info!(
            judge = judge.as_str(),
            opinions = opinions.len(),
            degraded = marks.len(),
            "opinions rendered"
        );
        Ok(StateFragment::new()
            .with_opinions(opinions)
            .with_degraded(marks))
    }
}

/// Second barrier: resolves the collected opinions into verdicts.
pub struct ChiefJusticeNode {
    engine: SynthesisRuleEngine,
}

impl ChiefJusticeNode {
    pub fn new(engine: SynthesisRuleEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl GraphNode for ChiefJusticeNode {
    fn writes(&self) -> &[StateField] {
        &[StateField::Synthesis]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<StateFragment, NodeError> {
        let outcome = self.engine.synthesize_state(&ctx.snapshot);
        Ok(StateFragment::new().with_synthesis(outcome))
    }
}

/// Terminal node. Reached either after synthesis or directly from the router;
/// in the latter case every criterion is reported as not evaluated.
pub struct FinalizeNode {
    veto_ceiling: f64,
}

impl FinalizeNode {
    pub fn new(veto_ceiling: f64) -> Self {
        Self { veto_ceiling }
    }
}

#[async_trait]
impl GraphNode for FinalizeNode {
    fn writes(&self) -> &[StateField] {
        &[StateField::Report]
    }

    async fn execute(&self, ctx: NodeContext) -> Result<StateFragment, NodeError> {
        let state = &ctx.snapshot;
        let synthesis = match state.synthesis() {
            Some(outcome) => outcome.clone(),
            None => not_evaluated(state.criteria()),
        };
        let report = build_report(ReportInputs {
            criteria: state.criteria(),
            synthesis,
            integrity: EvidenceIntegrityFilter::check(state, CitationScope::All),
            opinions: state.opinions().iter().collect(),
            manifest: state.manifest(),
            degraded: state.degraded().iter().collect(),
            veto_ceiling: self.veto_ceiling,
        });
        for line in &report.executive_summary {
            info!("{}", line);
        }
        Ok(StateFragment::new().with_report(report))
    }
}

/// The two-stage audit: gatherers and the manifest fetch fan out, the
/// aggregator waits for all of them, the integrity filter annotates, the
/// router either fans out to the judges or jumps to finalization, and the
/// chief justice waits for every judge before synthesis.
pub struct AuditPipeline {
    config: RunConfig,
    gatherers: Vec<Arc<dyn EvidenceGatherer>>,
    manifest: Option<Arc<dyn ManifestSource>>,
    evaluators: BTreeMap<Judge, Arc<dyn Evaluator>>,
}

impl AuditPipeline {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            gatherers: Vec::new(),
            manifest: None,
            evaluators: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn with_gatherer(mut self, gatherer: Arc<dyn EvidenceGatherer>) -> Self {
        self.gatherers.push(gatherer);
        self
    }

    pub fn with_manifest_source(mut self, source: Arc<dyn ManifestSource>) -> Self {
        self.manifest = Some(source);
        self
    }

    pub fn with_evaluator(mut self, judge: Judge, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluators.insert(judge, evaluator);
        self
    }

    /// Seat the same evaluator for every judge identity.
    pub fn with_bench(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        for judge in Judge::ALL {
            self.evaluators.insert(judge, Arc::clone(&evaluator));
        }
        self
    }

    fn caller(&self, id: NodeId) -> ResilientCaller {
        ResilientCaller::new(id.name(), self.config.retry.clone())
    }

    pub fn build_graph(&self) -> Result<Graph, GraphError> {
        let mut builder = GraphBuilder::new(StateSchema::standard());

        let mut first_stage = Vec::new();
        for gatherer in &self.gatherers {
            let id = NodeId::Gatherer(gatherer.kind());
            builder = builder.add_node(
                id,
                Arc::new(GatherNode::new(Arc::clone(gatherer), self.caller(id))),
            );
            first_stage.push(id);
        }
        if let Some(source) = &self.manifest {
            let id = NodeId::ManifestFetch;
            builder = builder.add_node(
                id,
                Arc::new(ManifestNode::new(Arc::clone(source), self.caller(id))),
            );
            first_stage.push(id);
        }

        let mut judges = Vec::new();
        for (judge, evaluator) in &self.evaluators {
            let id = NodeId::Judge(*judge);
            builder = builder.add_node(
                id,
                Arc::new(JudgeNode::new(
                    *judge,
                    Arc::clone(evaluator),
                    self.caller(id),
                    self.config.routing.short_circuit,
                )),
            );
            judges.push(id);
        }

        let synthesis = self.config.synthesis.clone();
        builder
            .add_node(NodeId::EvidenceAggregator, Arc::new(EvidenceAggregatorNode))
            .add_node(NodeId::IntegrityFilter, Arc::new(IntegrityNode))
            .add_node(
                NodeId::ChiefJustice,
                Arc::new(ChiefJusticeNode::new(SynthesisRuleEngine::new(
                    synthesis.clone(),
                ))),
            )
            .add_node(
                NodeId::Finalize,
                Arc::new(FinalizeNode::new(synthesis.security_veto_ceiling)),
            )
            .add_barrier(NodeId::EvidenceAggregator, first_stage)
            .add_edge(NodeId::EvidenceAggregator, NodeId::IntegrityFilter)
            .add_conditional_edges(
                NodeId::IntegrityFilter,
                Arc::new(route_on_evidence),
                [
                    (Route::Evaluate, judges.clone()),
                    (Route::Finalize, vec![NodeId::Finalize]),
                ],
            )
            .add_barrier(NodeId::ChiefJustice, judges)
            .add_edge(NodeId::ChiefJustice, NodeId::Finalize)
            .set_finish(NodeId::Finalize)
            .build()
    }

    /// Validate the graph, then execute one run over `rubric`. Construction
    /// errors fail before any node starts.
    pub async fn run(
        &self,
        rubric: &Rubric,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        let graph = self.build_graph()?;
        info!(
            criteria = rubric.criteria.len(),
            gatherers = self.gatherers.len(),
            judges = self.evaluators.len(),
            "starting audit run"
        );
        GraphScheduler::new(graph)
            .run(RunState::new(rubric.criteria.clone()), cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditgraph_core::{Evidence, Finding, GathererKind, IntegritySets, StateStore};

    #[test]
    fn router_requires_integrity() {
        let state = RunState::new(vec![]);
        assert_eq!(
            route_on_evidence(&state),
            Err(RoutingError::MissingField(StateField::Integrity))
        );
    }

    #[test]
    fn router_follows_evidence() {
        let integrity = IntegritySets {
            verified_paths: Default::default(),
            hallucinated_paths: Default::default(),
            unverified_paths: Default::default(),
            confidence: auditgraph_core::IntegrityConfidence::Full,
        };
        let mut store = StateStore::new(StateSchema::standard(), RunState::new(vec![]));
        store
            .commit(
                NodeId::IntegrityFilter,
                &[StateField::Integrity],
                StateFragment::new().with_integrity(integrity),
            )
            .unwrap();
        assert_eq!(route_on_evidence(&store.snapshot()), Ok(Route::Finalize));

        let producer = NodeId::Gatherer(GathererKind::Documentation);
        store
            .commit(
                producer,
                &[StateField::Evidence],
                StateFragment::new().with_evidence(vec![Evidence::from_finding(
                    producer,
                    0,
                    Finding::default(),
                )]),
            )
            .unwrap();
        assert_eq!(route_on_evidence(&store.snapshot()), Ok(Route::Evaluate));
    }

    #[test]
    fn pipeline_without_judges_fails_construction() {
        let pipeline = AuditPipeline::new(RunConfig::default())
            .with_manifest_source(Arc::new(crate::StaticManifest::new(["a.rs"])));
        assert!(matches!(
            pipeline.build_graph(),
            Err(GraphError::MissingAlternative {
                from: NodeId::IntegrityFilter,
                route: Route::Evaluate,
            })
        ));
    }
}
