use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::{NodeId, ValidationError};

pub type CriterionId = String;

/// Integer score in [1, 5].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Score(u8);

impl Score {
    pub const MIN: Score = Score(1);
    pub const MAX: Score = Score(5);

    pub fn new(value: i64) -> Result<Self, ValidationError> {
        if (Self::MIN.0 as i64..=Self::MAX.0 as i64).contains(&value) {
            Ok(Score(value as u8))
        } else {
            Err(ValidationError::ScoreOutOfRange(value))
        }
    }

    /// Round to the nearest integer (halves away from zero) and clamp into range.
    pub fn rounded(value: f64) -> Self {
        let clamped = value.round().clamp(Self::MIN.0 as f64, Self::MAX.0 as f64);
        Score(clamped as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Score {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Score::new(value)
    }
}

impl From<Score> for u8 {
    fn from(score: Score) -> Self {
        score.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed judge identities of the evaluation fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Judge {
    Adversarial,
    Advocate,
    Pragmatic,
}

impl Judge {
    pub const ALL: [Judge; 3] = [Judge::Adversarial, Judge::Advocate, Judge::Pragmatic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Judge::Adversarial => "adversarial",
            Judge::Advocate => "advocate",
            Judge::Pragmatic => "pragmatic",
        }
    }
}

impl fmt::Display for Judge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_pass_threshold() -> Score {
    Score(3)
}

/// A rubric line item. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: CriterionId,
    #[serde(alias = "name")]
    pub label: String,
    #[serde(default, alias = "security", alias = "securitySensitive")]
    pub security_sensitive: bool,
    #[serde(default = "default_pass_threshold", alias = "passThreshold")]
    pub pass_threshold: Score,
}

impl Criterion {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            security_sensitive: false,
            pass_threshold: default_pass_threshold(),
        }
    }

    pub fn security_sensitive(mut self) -> Self {
        self.security_sensitive = true;
        self
    }

    pub fn with_pass_threshold(mut self, threshold: Score) -> Self {
        self.pass_threshold = threshold;
        self
    }
}

/// Raw output of a gathering collaborator, before the node stamps identity onto it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Finding {
    pub goal: String,
    pub found: bool,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub cited_paths: BTreeSet<String>,
    #[serde(default)]
    pub confidence: f32,
    /// Criteria this finding is about; empty means relevant to all of them.
    #[serde(default)]
    pub criteria: BTreeSet<CriterionId>,
}

/// Objective finding committed by a gathering node. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub producer: NodeId,
    pub goal: String,
    pub found: bool,
    pub content: String,
    pub cited_paths: BTreeSet<String>,
    pub confidence: f32,
    pub criteria: BTreeSet<CriterionId>,
}

impl Evidence {
    pub fn from_finding(producer: NodeId, index: usize, finding: Finding) -> Self {
        Self {
            id: format!("{}/{}", producer.name(), index),
            producer,
            goal: finding.goal,
            found: finding.found,
            content: finding.content,
            cited_paths: finding.cited_paths,
            confidence: finding.confidence.clamp(0.0, 1.0),
            criteria: finding.criteria,
        }
    }

    pub fn targets(&self, criterion_id: &str) -> bool {
        self.criteria.is_empty() || self.criteria.contains(criterion_id)
    }
}

/// Unvalidated opinion as returned by an evaluator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OpinionDraft {
    pub score: i64,
    #[serde(alias = "argument")]
    pub rationale: String,
    #[serde(default, alias = "citations")]
    pub cited_evidence: Vec<String>,
    #[serde(default)]
    pub cited_paths: Vec<String>,
}

impl OpinionDraft {
    /// Validate the draft and stamp the identity the evaluation node was asked for,
    /// overriding whatever identity the collaborator may have echoed back.
    pub fn into_opinion(
        self,
        criterion_id: &str,
        judge: Judge,
    ) -> Result<Opinion, ValidationError> {
        let score = Score::new(self.score)?;
        if self.rationale.trim().is_empty() {
            return Err(ValidationError::MissingField("rationale"));
        }
        Ok(Opinion {
            criterion_id: criterion_id.to_string(),
            judge,
            score,
            rationale: self.rationale,
            cited_evidence: self.cited_evidence.into_iter().collect(),
            cited_paths: self.cited_paths.into_iter().collect(),
        })
    }
}

/// One judge's evaluation of one criterion. Write-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opinion {
    pub criterion_id: CriterionId,
    pub judge: Judge,
    pub score: Score,
    pub rationale: String,
    pub cited_evidence: BTreeSet<String>,
    pub cited_paths: BTreeSet<String>,
}

/// Ground-truth file list, or the reason it could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Manifest {
    Available { paths: BTreeSet<String> },
    Unavailable { reason: String },
}

impl Manifest {
    pub fn paths(&self) -> Option<&BTreeSet<String>> {
        match self {
            Manifest::Available { paths } => Some(paths),
            Manifest::Unavailable { .. } => None,
        }
    }

    pub fn len(&self) -> usize {
        self.paths().map_or(0, BTreeSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityConfidence {
    Full,
    Degraded,
}

/// Result of cross-referencing cited paths against the manifest.
///
/// The three sets are pairwise disjoint and their union is every normalized path
/// in the citations that were checked. The copy committed to `RunState` is
/// written right after the evidence barrier and covers evidence citations only;
/// `RunReport::integrity` covers evidence and opinion citations alike.
/// `unverified_paths` is only populated when the manifest was unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegritySets {
    pub verified_paths: BTreeSet<String>,
    pub hallucinated_paths: BTreeSet<String>,
    pub unverified_paths: BTreeSet<String>,
    pub confidence: IntegrityConfidence,
}

impl IntegritySets {
    pub fn cited_paths(&self) -> BTreeSet<String> {
        self.verified_paths
            .iter()
            .chain(&self.hallucinated_paths)
            .chain(&self.unverified_paths)
            .cloned()
            .collect()
    }

    pub fn is_hallucinated(&self, path: &str) -> bool {
        self.hallucinated_paths.contains(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "kebab-case")]
pub enum SynthesisRule {
    /// No dissent: rounded mean.
    Consensus,
    /// Dissent without veto: the pragmatic judge's score.
    FactSupremacy,
    /// Adversarial minimum on a security-sensitive criterion; clamps the aggregate.
    SecurityVeto,
    /// Dissent under a veto: rounded mean, the tie-break is suppressed.
    DissentUnderVeto,
    /// A judge's opinion never arrived; the neutral score stood in for it.
    MissingOpinion { judge: Judge },
    /// An opinion cited a hallucinated path; the score was capped.
    HallucinationPenalty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerdictStatus {
    Evaluated,
    NotEvaluated,
}

/// Final determination for a single criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionVerdict {
    pub criterion_id: CriterionId,
    pub label: String,
    pub status: VerdictStatus,
    pub final_score: Option<Score>,
    pub mean: Option<f64>,
    pub dispersion: Option<u8>,
    pub dissent: bool,
    pub rules: Vec<SynthesisRule>,
    pub dissent_summary: String,
}

impl CriterionVerdict {
    pub fn not_evaluated(criterion: &Criterion) -> Self {
        Self {
            criterion_id: criterion.id.clone(),
            label: criterion.label.clone(),
            status: VerdictStatus::NotEvaluated,
            final_score: None,
            mean: None,
            dispersion: None,
            dissent: false,
            rules: Vec::new(),
            dissent_summary: String::new(),
        }
    }

    pub fn passed(&self, criterion: &Criterion) -> bool {
        self.final_score
            .is_some_and(|score| score >= criterion.pass_threshold)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateScore {
    /// Mean of evaluated final scores, clamped when a veto fired. `None` when
    /// no criterion was evaluated.
    pub overall: Option<f64>,
    pub veto_applied: bool,
    pub passed: usize,
    pub failed: usize,
    pub not_evaluated: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOutcome {
    pub verdicts: Vec<CriterionVerdict>,
    pub aggregate: AggregateScore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remediation {
    pub criterion_id: CriterionId,
    pub instruction: String,
}

/// Everything the report collaborator needs to render a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub synthesis: SynthesisOutcome,
    pub integrity: IntegritySets,
    pub executive_summary: Vec<String>,
    pub remediation: Vec<Remediation>,
}

/// Ledger entry for a node (or one criterion of an evaluation node) that
/// committed a degraded fragment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DegradedMark {
    pub node: NodeId,
    pub criterion: Option<CriterionId>,
    pub reason: String,
}

impl DegradedMark {
    pub fn node(node: NodeId, reason: impl Into<String>) -> Self {
        Self {
            node,
            criterion: None,
            reason: reason.into(),
        }
    }

    pub fn criterion(node: NodeId, criterion: &str, reason: impl Into<String>) -> Self {
        Self {
            node,
            criterion: Some(criterion.to_string()),
            reason: reason.into(),
        }
    }
}
