use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::{Criterion, Result, ValidationError};

/// The criteria a run is graded against, loaded once at run start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rubric {
    #[serde(alias = "dimensions")]
    pub criteria: Vec<Criterion>,
}

impl Rubric {
    pub fn new(criteria: Vec<Criterion>) -> std::result::Result<Self, ValidationError> {
        let rubric = Self { criteria };
        rubric.validate()?;
        Ok(rubric)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let rubric: Rubric = serde_json::from_str(raw)?;
        rubric.validate()?;
        Ok(rubric)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let mut seen = BTreeSet::new();
        for criterion in &self.criteria {
            if criterion.id.trim().is_empty() {
                return Err(ValidationError::MissingField("id"));
            }
            if !seen.insert(criterion.id.as_str()) {
                return Err(ValidationError::Malformed(format!(
                    "duplicate criterion id `{}`",
                    criterion.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditGraphError;

    #[test]
    fn parses_dimensions_key() {
        let raw = r#"{
            "dimensions": [
                {"id": "graph_orchestration", "name": "Graph Orchestration"},
                {"id": "safe_tool_engineering", "name": "Safe Tools", "security": true, "pass_threshold": 4}
            ]
        }"#;
        let rubric = Rubric::from_json(raw).unwrap();
        assert_eq!(rubric.criteria.len(), 2);
        assert!(rubric.criteria[1].security_sensitive);
        assert_eq!(rubric.criteria[1].pass_threshold.get(), 4);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let raw = r#"{"criteria": [{"id": "a", "label": "A"}, {"id": "a", "label": "B"}]}"#;
        assert!(matches!(
            Rubric::from_json(raw),
            Err(AuditGraphError::Validation(ValidationError::Malformed(_)))
        ));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let raw = r#"{"criteria": [{"id": "a", "label": "A", "pass_threshold": 9}]}"#;
        assert!(matches!(
            Rubric::from_json(raw),
            Err(AuditGraphError::Serialization(_))
        ));
    }

    #[test]
    fn missing_rubric_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Rubric::from_file(&dir.path().join("rubric.json")),
            Err(AuditGraphError::Io(_))
        ));
    }
}
