use auditgraph_core::{
    Criterion, CriterionVerdict, DegradedMark, IntegrityConfidence, IntegritySets, Manifest,
    Opinion, Remediation, RunReport, SynthesisOutcome,
};
use std::collections::BTreeSet;

const CONCERN_MAX_CHARS: usize = 240;

/// Everything the report is assembled from; all of it already committed.
pub struct ReportInputs<'a> {
    pub criteria: &'a [Criterion],
    pub synthesis: SynthesisOutcome,
    pub integrity: IntegritySets,
    pub opinions: Vec<&'a Opinion>,
    pub manifest: Option<&'a Manifest>,
    pub degraded: Vec<&'a DegradedMark>,
    pub veto_ceiling: f64,
}

pub fn build_report(inputs: ReportInputs<'_>) -> RunReport {
    let executive_summary = executive_summary(&inputs);
    let remediation = remediation(&inputs);
    RunReport {
        synthesis: inputs.synthesis,
        integrity: inputs.integrity,
        executive_summary,
        remediation,
    }
}

fn executive_summary(inputs: &ReportInputs<'_>) -> Vec<String> {
    let aggregate = &inputs.synthesis.aggregate;
    let mut lines = Vec::new();

    lines.push(match aggregate.overall {
        Some(overall) => format!("Overall score: {overall:.2}/5.00"),
        None => "Overall score: not evaluated".to_string(),
    });
    lines.push(format!(
        "Criteria: {} | Passed: {} | Failed: {} | Not evaluated: {}",
        inputs.criteria.len(),
        aggregate.passed,
        aggregate.failed,
        aggregate.not_evaluated
    ));
    if aggregate.veto_applied {
        lines.push(format!(
            "Security veto applied: overall score capped at {:.2}",
            inputs.veto_ceiling
        ));
    }

    let failing: Vec<&str> = failing(inputs)
        .map(|(criterion, _)| criterion.label.as_str())
        .collect();
    if !failing.is_empty() {
        lines.push(format!("Failing criteria: {}", failing.join(", ")));
    }

    let integrity = &inputs.integrity;
    let cited = integrity.cited_paths().len();
    lines.push(match integrity.confidence {
        IntegrityConfidence::Degraded => format!(
            "Evidence integrity unverified: manifest unavailable, {cited} cited path(s) not checked"
        ),
        IntegrityConfidence::Full if integrity.hallucinated_paths.is_empty() => {
            format!("Evidence integrity: all {cited} cited path(s) verified against the manifest")
        }
        IntegrityConfidence::Full => format!(
            "Hallucinated paths: {} of {cited} cited path(s) do not exist in the repository",
            integrity.hallucinated_paths.len()
        ),
    });

    match inputs.manifest {
        Some(Manifest::Available { paths }) => lines.push(format!(
            "Manifest: {} file(s), {} cross-referenced with citations",
            paths.len(),
            integrity.verified_paths.len()
        )),
        Some(Manifest::Unavailable { reason }) => {
            lines.push(format!("Manifest: unavailable ({reason})"))
        }
        None => lines.push("Manifest: not fetched".to_string()),
    }

    let degraded_nodes: BTreeSet<_> = inputs.degraded.iter().map(|m| m.node).collect();
    if !degraded_nodes.is_empty() {
        let names: Vec<&str> = degraded_nodes.iter().map(|n| n.name()).collect();
        lines.push(format!(
            "Degraded nodes: {} ({})",
            degraded_nodes.len(),
            names.join(", ")
        ));
    }
    lines
}

fn failing<'r>(
    inputs: &'r ReportInputs<'r>,
) -> impl Iterator<Item = (&'r Criterion, &'r CriterionVerdict)> + 'r {
    inputs
        .criteria
        .iter()
        .zip(&inputs.synthesis.verdicts)
        .filter(|(criterion, verdict)| {
            verdict.final_score.is_some() && !verdict.passed(criterion)
        })
}

/// One instruction per failing criterion, quoting the lowest-scoring opinion.
fn remediation(inputs: &ReportInputs<'_>) -> Vec<Remediation> {
    failing(inputs)
        .map(|(criterion, verdict)| {
            let score = verdict
                .final_score
                .map_or_else(|| "-".to_string(), |s| s.to_string());
            let concern = inputs
                .opinions
                .iter()
                .filter(|o| o.criterion_id == criterion.id)
                .min_by_key(|o| (o.score, o.judge))
                .map(|o| {
                    let text: String =
                        o.rationale.trim().chars().take(CONCERN_MAX_CHARS).collect();
                    format!(" Main concern ({}): {}", o.judge.as_str(), text)
                })
                .unwrap_or_default();
            Remediation {
                criterion_id: criterion.id.clone(),
                instruction: format!(
                    "Improve {} from {} to at least {}.{}",
                    criterion.label, score, criterion.pass_threshold, concern
                ),
            }
        })
        .collect()
}
