use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::Judge;

/// Evidence-gathering branches of the first fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GathererKind {
    Repository,
    Documentation,
    Vision,
}

impl GathererKind {
    pub const ALL: [GathererKind; 3] = [
        GathererKind::Repository,
        GathererKind::Documentation,
        GathererKind::Vision,
    ];
}

/// Closed set of graph node identifiers. Graph construction rejects any
/// reference that is not one of these, and state ordering keys off `name()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeId {
    Gatherer(GathererKind),
    ManifestFetch,
    EvidenceAggregator,
    IntegrityFilter,
    Judge(Judge),
    ChiefJustice,
    Finalize,
}

impl NodeId {
    pub const ALL: [NodeId; 11] = [
        NodeId::Gatherer(GathererKind::Repository),
        NodeId::Gatherer(GathererKind::Documentation),
        NodeId::Gatherer(GathererKind::Vision),
        NodeId::ManifestFetch,
        NodeId::EvidenceAggregator,
        NodeId::IntegrityFilter,
        NodeId::Judge(Judge::Adversarial),
        NodeId::Judge(Judge::Advocate),
        NodeId::Judge(Judge::Pragmatic),
        NodeId::ChiefJustice,
        NodeId::Finalize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            NodeId::Gatherer(GathererKind::Repository) => "repo_investigator",
            NodeId::Gatherer(GathererKind::Documentation) => "doc_analyst",
            NodeId::Gatherer(GathererKind::Vision) => "vision_inspector",
            NodeId::ManifestFetch => "manifest_fetch",
            NodeId::EvidenceAggregator => "evidence_aggregator",
            NodeId::IntegrityFilter => "integrity_filter",
            NodeId::Judge(Judge::Adversarial) => "judge_adversarial",
            NodeId::Judge(Judge::Advocate) => "judge_advocate",
            NodeId::Judge(Judge::Pragmatic) => "judge_pragmatic",
            NodeId::ChiefJustice => "chief_justice",
            NodeId::Finalize => "finalize",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown node `{0}`")]
pub struct UnknownNode(pub String);

impl FromStr for NodeId {
    type Err = UnknownNode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeId::ALL
            .iter()
            .copied()
            .find(|id| id.name() == s)
            .ok_or_else(|| UnknownNode(s.to_string()))
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
