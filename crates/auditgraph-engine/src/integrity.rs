use auditgraph_core::{IntegrityConfidence, IntegritySets, Manifest, RunState};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Canonical repository-relative form of a cited path: forward slashes, no
/// leading separators, `.` dropped and `..` resolved. Comparison stays
/// case-sensitive. A `..` that climbs above the root is kept, so the path can
/// never match a manifest entry.
pub fn normalize_path(raw: &str) -> String {
    let unified = raw.trim().replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(last) if *last != ".." => {
                    parts.pop();
                }
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Which citations a cross-reference covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CitationScope {
    /// Evidence only; what exists right after the first barrier.
    Evidence,
    /// Evidence and opinions; the complete picture at finalization.
    All,
}

/// Cross-references cited paths against the manifest. Pure: the same citations
/// and manifest always produce the same sets.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvidenceIntegrityFilter;

impl EvidenceIntegrityFilter {
    /// Normalized, non-empty cited paths in `state`.
    pub fn cited_paths(state: &RunState, scope: CitationScope) -> BTreeSet<String> {
        let evidence = state.evidence().iter().flat_map(|e| e.cited_paths.iter());
        let opinions = state
            .opinions()
            .iter()
            .filter(|_| scope == CitationScope::All)
            .flat_map(|o| o.cited_paths.iter());
        evidence
            .chain(opinions)
            .map(|path| normalize_path(path))
            .filter(|path| !path.is_empty())
            .collect()
    }

    /// Partition `cited` into verified and hallucinated paths. Without a usable
    /// manifest every path lands in `unverified_paths` at degraded confidence.
    pub fn cross_reference<I, S>(cited: I, manifest: Option<&Manifest>) -> IntegritySets
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cited: BTreeSet<String> = cited
            .into_iter()
            .map(|path| normalize_path(path.as_ref()))
            .filter(|path| !path.is_empty())
            .collect();

        let Some(known) = manifest.and_then(Manifest::paths) else {
            warn!(
                cited = cited.len(),
                "manifest unavailable, citations left unverified"
            );
            return IntegritySets {
                verified_paths: BTreeSet::new(),
                hallucinated_paths: BTreeSet::new(),
                unverified_paths: cited,
                confidence: IntegrityConfidence::Degraded,
            };
        };

        let known: BTreeSet<String> = known.iter().map(|p| normalize_path(p)).collect();
        let (verified_paths, hallucinated_paths): (BTreeSet<String>, BTreeSet<String>) =
            cited.into_iter().partition(|path| known.contains(path));

        if !hallucinated_paths.is_empty() {
            warn!(
                hallucinated = hallucinated_paths.len(),
                "cited paths missing from the manifest"
            );
        }
        debug!(verified = verified_paths.len(), "integrity cross-reference done");

        IntegritySets {
            verified_paths,
            hallucinated_paths,
            unverified_paths: BTreeSet::new(),
            confidence: IntegrityConfidence::Full,
        }
    }

    /// Cross-reference the citations of `state` within `scope` against its manifest.
    pub fn check(state: &RunState, scope: CitationScope) -> IntegritySets {
        Self::cross_reference(Self::cited_paths(state, scope), state.manifest())
    }
}
