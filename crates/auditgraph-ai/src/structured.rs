use auditgraph_core::ValidationError;
use serde::de::DeserializeOwned;

/// Strip a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...) on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Parse a model's structured answer into `T`.
///
/// Accepts bare JSON, fenced JSON, or a JSON object embedded in surrounding prose.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, ValidationError> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(ValidationError::Malformed("empty response".to_string()));
    }

    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(first) => {
            let object = match (body.find('{'), body.rfind('}')) {
                (Some(start), Some(end)) if start < end => &body[start..=end],
                _ => return Err(ValidationError::Malformed(first.to_string())),
            };
            serde_json::from_str(object).map_err(|e| ValidationError::Malformed(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditgraph_core::OpinionDraft;

    #[test]
    fn strips_fences_with_and_without_language_tag() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```\n"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn parses_opinion_with_aliases() {
        let raw = "```json\n{\"score\": 4, \"argument\": \"solid\", \"citations\": [\"repo_investigator/0\"]}\n```";
        let draft: OpinionDraft = parse_structured(raw).unwrap();
        assert_eq!(draft.score, 4);
        assert_eq!(draft.rationale, "solid");
        assert_eq!(draft.cited_evidence, vec!["repo_investigator/0".to_string()]);
    }

    #[test]
    fn extracts_object_from_prose() {
        let raw = "Here is my verdict: {\"score\": 2, \"rationale\": \"weak\"} Thanks.";
        let draft: OpinionDraft = parse_structured(raw).unwrap();
        assert_eq!(draft.score, 2);
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_structured::<OpinionDraft>("no json here").unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
        let err = parse_structured::<OpinionDraft>("   ").unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
    }
}
