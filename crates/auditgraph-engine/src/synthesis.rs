use auditgraph_core::{
    AggregateScore, Criterion, CriterionVerdict, IntegritySets, Judge, Opinion, RunState, Score,
    SynthesisOutcome, SynthesisPolicy, SynthesisRule, VerdictStatus,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::integrity::{normalize_path, CitationScope, EvidenceIntegrityFilter};

/// Deterministic conflict resolution over the judges' opinions.
///
/// Synchronous and free of external calls; given the same criteria, opinions
/// and integrity sets it always yields the same outcome.
#[derive(Debug, Clone, Default)]
pub struct SynthesisRuleEngine {
    policy: SynthesisPolicy,
}

/// One criterion's verdict plus whether it triggered the aggregate veto.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub verdict: CriterionVerdict,
    pub veto: bool,
}

impl SynthesisRuleEngine {
    pub fn new(policy: SynthesisPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SynthesisPolicy {
        &self.policy
    }

    /// Resolve every criterion of `state` from its committed opinions. The
    /// hallucination penalty, when enabled, is checked against the complete
    /// integrity sets (evidence and opinion citations).
    pub fn synthesize_state(&self, state: &RunState) -> SynthesisOutcome {
        let integrity = EvidenceIntegrityFilter::check(state, CitationScope::All);
        self.synthesize(state.criteria(), state.opinions().iter(), Some(&integrity))
    }

    pub fn synthesize<'a>(
        &self,
        criteria: &[Criterion],
        opinions: impl IntoIterator<Item = &'a Opinion>,
        integrity: Option<&IntegritySets>,
    ) -> SynthesisOutcome {
        let mut by_criterion: BTreeMap<&str, Vec<&Opinion>> = BTreeMap::new();
        for opinion in opinions {
            by_criterion
                .entry(opinion.criterion_id.as_str())
                .or_default()
                .push(opinion);
        }

        let mut veto = false;
        let verdicts: Vec<CriterionVerdict> = criteria
            .iter()
            .map(|criterion| {
                let opinions = by_criterion
                    .get(criterion.id.as_str())
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let resolution = self.resolve(criterion, opinions, integrity);
                veto |= resolution.veto;
                resolution.verdict
            })
            .collect();

        let aggregate = self.aggregate(criteria, &verdicts, veto);
        info!(
            criteria = verdicts.len(),
            overall = ?aggregate.overall,
            veto = aggregate.veto_applied,
            passed = aggregate.passed,
            failed = aggregate.failed,
            "synthesis complete"
        );
        SynthesisOutcome {
            verdicts,
            aggregate,
        }
    }

    /// Resolve a single criterion. Opinions for other criteria are ignored; if a
    /// judge appears twice, its first opinion counts.
    pub fn resolve(
        &self,
        criterion: &Criterion,
        opinions: &[&Opinion],
        integrity: Option<&IntegritySets>,
    ) -> Resolution {
        let mut by_judge: BTreeMap<Judge, &Opinion> = BTreeMap::new();
        for opinion in opinions
            .iter()
            .copied()
            .filter(|o| o.criterion_id == criterion.id)
        {
            by_judge.entry(opinion.judge).or_insert(opinion);
        }
        if by_judge.is_empty() {
            return Resolution {
                verdict: CriterionVerdict::not_evaluated(criterion),
                veto: false,
            };
        }

        let mut rules = Vec::new();
        let neutral = Score::rounded(f64::from(self.policy.missing_opinion_score));
        let score_of = |judge: Judge| by_judge.get(&judge).map_or(neutral, |o| o.score);
        for judge in Judge::ALL {
            if !by_judge.contains_key(&judge) {
                rules.push(SynthesisRule::MissingOpinion { judge });
            }
        }

        let scores: Vec<u8> = Judge::ALL.iter().map(|j| score_of(*j).get()).collect();
        let sum: u32 = scores.iter().map(|s| u32::from(*s)).sum();
        let mean = f64::from(sum) / scores.len() as f64;
        let max = scores.iter().copied().max().unwrap_or(Score::MIN.get());
        let min = scores.iter().copied().min().unwrap_or(Score::MIN.get());
        let dispersion = max - min;
        let dissent = dispersion > self.policy.dissent_threshold;

        // Only a rendered adversarial opinion can veto; the neutral stand-in never does.
        let veto = criterion.security_sensitive
            && by_judge
                .get(&Judge::Adversarial)
                .is_some_and(|o| o.score == Score::MIN);
        let mut final_score = if veto {
            rules.push(SynthesisRule::SecurityVeto);
            if dissent {
                rules.push(SynthesisRule::DissentUnderVeto);
            } else {
                rules.push(SynthesisRule::Consensus);
            }
            Score::rounded(mean)
        } else if dissent {
            rules.push(SynthesisRule::FactSupremacy);
            score_of(Judge::Pragmatic)
        } else {
            rules.push(SynthesisRule::Consensus);
            Score::rounded(mean)
        };

        if let (Some(cap), Some(integrity)) = (self.policy.hallucination_penalty_cap, integrity) {
            let cites_hallucination = by_judge.values().any(|o| {
                o.cited_paths
                    .iter()
                    .any(|p| integrity.is_hallucinated(&normalize_path(p)))
            });
            if cites_hallucination {
                let cap = Score::rounded(f64::from(cap));
                if final_score > cap {
                    final_score = cap;
                }
                rules.push(SynthesisRule::HallucinationPenalty);
            }
        }

        debug!(
            criterion = %criterion.id,
            mean,
            dispersion,
            dissent,
            veto,
            final_score = final_score.get(),
            ?rules,
            "criterion resolved"
        );

        Resolution {
            verdict: CriterionVerdict {
                criterion_id: criterion.id.clone(),
                label: criterion.label.clone(),
                status: VerdictStatus::Evaluated,
                final_score: Some(final_score),
                mean: Some(mean),
                dispersion: Some(dispersion),
                dissent,
                rules,
                dissent_summary: self.dissent_summary(&by_judge),
            },
            veto,
        }
    }

    /// Rationales in judge order, bounded to `dissent_summary_max_chars` characters.
    fn dissent_summary(&self, by_judge: &BTreeMap<Judge, &Opinion>) -> String {
        let joined = by_judge
            .iter()
            .map(|(judge, o)| {
                format!("{} ({}): {}", judge.as_str(), o.score, o.rationale.trim())
            })
            .collect::<Vec<_>>()
            .join(" | ");
        truncate_chars(&joined, self.policy.dissent_summary_max_chars)
    }

    fn aggregate(
        &self,
        criteria: &[Criterion],
        verdicts: &[CriterionVerdict],
        veto: bool,
    ) -> AggregateScore {
        let scores: Vec<f64> = verdicts
            .iter()
            .filter_map(|v| v.final_score)
            .map(|s| f64::from(s.get()))
            .collect();
        let overall = if scores.is_empty() {
            None
        } else {
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            Some(if veto {
                mean.min(self.policy.security_veto_ceiling)
            } else {
                mean
            })
        };

        let passed = criteria
            .iter()
            .zip(verdicts)
            .filter(|(criterion, verdict)| verdict.passed(criterion))
            .count();
        AggregateScore {
            overall,
            veto_applied: veto,
            passed,
            failed: scores.len() - passed,
            not_evaluated: verdicts.len() - scores.len(),
        }
    }
}

/// Outcome for a run whose evaluation stage never ran: every criterion not evaluated.
pub fn not_evaluated(criteria: &[Criterion]) -> SynthesisOutcome {
    SynthesisOutcome {
        verdicts: criteria.iter().map(CriterionVerdict::not_evaluated).collect(),
        aggregate: AggregateScore {
            overall: None,
            veto_applied: false,
            passed: 0,
            failed: 0,
            not_evaluated: criteria.len(),
        },
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    const ELLIPSIS: &str = "...";
    if max <= ELLIPSIS.len() {
        return text.chars().take(max).collect();
    }
    let keep = max - ELLIPSIS.len();
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditgraph_core::RunConfig;

    fn opinion(criterion: &str, judge: Judge, score: i64) -> Opinion {
        Opinion {
            criterion_id: criterion.to_string(),
            judge,
            score: Score::new(score).unwrap(),
            rationale: format!("{} says {}", judge.as_str(), score),
            cited_evidence: Default::default(),
            cited_paths: Default::default(),
        }
    }

    fn bench(criterion: &str, adversarial: i64, advocate: i64, pragmatic: i64) -> Vec<Opinion> {
        vec![
            opinion(criterion, Judge::Adversarial, adversarial),
            opinion(criterion, Judge::Advocate, advocate),
            opinion(criterion, Judge::Pragmatic, pragmatic),
        ]
    }

    fn resolve(
        engine: &SynthesisRuleEngine,
        criterion: &Criterion,
        opinions: &[Opinion],
    ) -> Resolution {
        let refs: Vec<&Opinion> = opinions.iter().collect();
        engine.resolve(criterion, &refs, None)
    }

    #[test]
    fn consensus_rounds_the_mean() {
        let engine = SynthesisRuleEngine::default();
        let c = Criterion::new("c", "C");
        let r = resolve(&engine, &c, &bench("c", 4, 5, 5));
        assert!(!r.verdict.dissent);
        assert_eq!(r.verdict.final_score.map(Score::get), Some(5));
        assert_eq!(r.verdict.dispersion, Some(1));
        assert_eq!(r.verdict.rules, vec![SynthesisRule::Consensus]);
    }

    #[test]
    fn dissent_defers_to_pragmatic_judge() {
        let engine = SynthesisRuleEngine::default();
        let c = Criterion::new("c", "C");
        let r = resolve(&engine, &c, &bench("c", 1, 3, 5));
        assert!(r.verdict.dissent);
        assert_eq!(r.verdict.final_score.map(Score::get), Some(5));
        assert_eq!(r.verdict.rules, vec![SynthesisRule::FactSupremacy]);
        assert!(!r.veto);
    }

    #[test]
    fn dispersion_equal_to_threshold_is_not_dissent() {
        let engine = SynthesisRuleEngine::default();
        let c = Criterion::new("c", "C");
        let r = resolve(&engine, &c, &bench("c", 2, 3, 4));
        assert!(!r.verdict.dissent);
        assert_eq!(r.verdict.final_score.map(Score::get), Some(3));
    }

    #[test]
    fn veto_keeps_rounded_mean_under_dissent() {
        let engine = SynthesisRuleEngine::default();
        let c = Criterion::new("sec", "Security").security_sensitive();
        let r = resolve(&engine, &c, &bench("sec", 1, 4, 5));
        assert!(r.veto);
        assert!(r.verdict.dissent);
        assert_eq!(r.verdict.final_score.map(Score::get), Some(3));
        assert_eq!(
            r.verdict.rules,
            vec![SynthesisRule::SecurityVeto, SynthesisRule::DissentUnderVeto]
        );
    }

    #[test]
    fn adversarial_minimum_on_ordinary_criterion_is_not_a_veto() {
        let engine = SynthesisRuleEngine::default();
        let c = Criterion::new("c", "C");
        assert!(!resolve(&engine, &c, &bench("c", 1, 1, 1)).veto);
    }

    #[test]
    fn missing_adversarial_opinion_cannot_veto() {
        let policy = SynthesisPolicy {
            missing_opinion_score: 1,
            ..Default::default()
        };
        assert!(RunConfig {
            synthesis: policy.clone(),
            ..Default::default()
        }
        .validate()
        .is_ok());
        let engine = SynthesisRuleEngine::new(policy);
        let c = Criterion::new("sec", "Security").security_sensitive();
        let opinions = [
            opinion("sec", Judge::Advocate, 5),
            opinion("sec", Judge::Pragmatic, 5),
        ];

        let r = resolve(&engine, &c, &opinions);
        assert!(!r.veto);
        assert!(!r.verdict.rules.contains(&SynthesisRule::SecurityVeto));
        // stand-in 1 against two 5s is dissent, resolved by the pragmatic judge
        assert_eq!(r.verdict.rules.last(), Some(&SynthesisRule::FactSupremacy));
        assert_eq!(r.verdict.final_score.map(Score::get), Some(5));

        let refs: Vec<&Opinion> = opinions.iter().collect();
        let outcome = engine.synthesize(std::slice::from_ref(&c), refs, None);
        assert!(!outcome.aggregate.veto_applied);
        assert_eq!(outcome.aggregate.overall, Some(5.0));
    }

    #[test]
    fn tiny_summary_budget_is_respected() {
        let engine = SynthesisRuleEngine::new(SynthesisPolicy {
            dissent_summary_max_chars: 1,
            ..Default::default()
        });
        let c = Criterion::new("c", "C");
        let r = resolve(&engine, &c, &bench("c", 1, 3, 5));
        assert_eq!(r.verdict.dissent_summary.chars().count(), 1);
    }

    #[test]
    fn missing_judges_use_neutral_score() {
        let engine = SynthesisRuleEngine::default();
        let c = Criterion::new("c", "C");
        let r = resolve(&engine, &c, &[opinion("c", Judge::Pragmatic, 5)]);
        assert_eq!(r.verdict.status, VerdictStatus::Evaluated);
        assert_eq!(r.verdict.final_score.map(Score::get), Some(4));
        assert_eq!(
            r.verdict.rules,
            vec![
                SynthesisRule::MissingOpinion {
                    judge: Judge::Adversarial
                },
                SynthesisRule::MissingOpinion {
                    judge: Judge::Advocate
                },
                SynthesisRule::Consensus,
            ]
        );
    }

    #[test]
    fn no_opinions_means_not_evaluated() {
        let engine = SynthesisRuleEngine::default();
        let c = Criterion::new("c", "C");
        let r = resolve(&engine, &c, &bench("other", 5, 5, 5));
        assert_eq!(r.verdict.status, VerdictStatus::NotEvaluated);
        assert_eq!(r.verdict.final_score, None);
    }

    #[test]
    fn hallucination_penalty_caps_score() {
        let engine = SynthesisRuleEngine::new(SynthesisPolicy {
            hallucination_penalty_cap: Some(2),
            ..Default::default()
        });
        let c = Criterion::new("c", "C");
        let mut opinions = bench("c", 5, 5, 5);
        opinions[1].cited_paths.insert("./src/ghost.rs".to_string());
        let integrity = EvidenceIntegrityFilter::cross_reference(
            ["src/ghost.rs"],
            Some(&auditgraph_core::Manifest::Available {
                paths: ["src/real.rs".to_string()].into(),
            }),
        );
        let refs: Vec<&Opinion> = opinions.iter().collect();

        let r = engine.resolve(&c, &refs, Some(&integrity));
        assert_eq!(r.verdict.final_score.map(Score::get), Some(2));
        assert!(r.verdict.rules.contains(&SynthesisRule::HallucinationPenalty));

        let unpenalized = SynthesisRuleEngine::default().resolve(&c, &refs, Some(&integrity));
        assert_eq!(unpenalized.verdict.final_score.map(Score::get), Some(5));
    }

    #[test]
    fn dissent_summary_is_bounded_and_ordered() {
        let engine = SynthesisRuleEngine::new(SynthesisPolicy {
            dissent_summary_max_chars: 40,
            ..Default::default()
        });
        let c = Criterion::new("c", "C");
        let r = resolve(&engine, &c, &bench("c", 1, 3, 5));
        let summary = &r.verdict.dissent_summary;
        assert!(summary.starts_with("adversarial (1)"));
        assert_eq!(summary.chars().count(), 40);
        assert!(summary.ends_with("..."));

        let full = resolve(&SynthesisRuleEngine::default(), &c, &bench("c", 1, 3, 5));
        let summary = full.verdict.dissent_summary;
        let adversarial = summary.find("adversarial").unwrap();
        let advocate = summary.find("advocate").unwrap();
        let pragmatic = summary.find("pragmatic").unwrap();
        assert!(adversarial < advocate && advocate < pragmatic);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 8), "héllo...");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("dissent", 3), "dis");
        assert_eq!(truncate_chars("dissent", 1), "d");
    }

    #[test]
    fn aggregate_counts_and_veto_clamp() {
        let engine = SynthesisRuleEngine::default();
        let criteria = vec![
            Criterion::new("sec", "Security").security_sensitive(),
            Criterion::new("docs", "Docs"),
            Criterion::new("idle", "Idle"),
        ];
        let mut opinions = bench("sec", 1, 4, 5);
        opinions.extend(bench("docs", 5, 5, 5));

        let outcome = engine.synthesize(&criteria, &opinions, None);
        assert!(outcome.aggregate.veto_applied);
        assert_eq!(outcome.aggregate.overall, Some(2.0));
        assert_eq!(outcome.aggregate.passed, 2);
        assert_eq!(outcome.aggregate.failed, 0);
        assert_eq!(outcome.aggregate.not_evaluated, 1);
        assert_eq!(outcome.verdicts[2].status, VerdictStatus::NotEvaluated);
    }
}
