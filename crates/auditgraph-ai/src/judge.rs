use async_trait::async_trait;
use auditgraph_core::{CallError, Criterion, Evaluator, Judge, OpinionDraft, RunState, Score};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{parse_structured, CompletionProvider, GenerationConfig, Message};

const DEFAULT_MAX_EVIDENCE_CHARS: usize = 12_000;

fn stance(judge: Judge) -> &'static str {
    match judge {
        Judge::Adversarial => {
            "You look for failures. Treat unsupported claims as missing and argue for the \
             lowest score the evidence justifies."
        }
        Judge::Advocate => {
            "You argue for the work. Credit intent and partial progress, and treat missing \
             evidence as neutral rather than failing."
        }
        Judge::Pragmatic => {
            "You judge production readiness. Weigh maintainability and testing, and cite the \
             evidence ids your score rests on."
        }
    }
}

/// Evaluator backed by a completion provider. Each call is a single attempt
/// that asks for a JSON opinion and validates it; a malformed answer comes back
/// as `CallError::Invalid`, which the caller's `ResilientCaller` retries.
pub struct LlmEvaluator {
    provider: Arc<dyn CompletionProvider>,
    generation: GenerationConfig,
    max_evidence_chars: usize,
}

impl LlmEvaluator {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            generation: GenerationConfig::default(),
            max_evidence_chars: DEFAULT_MAX_EVIDENCE_CHARS,
        }
    }

    pub fn with_generation_config(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_max_evidence_chars(mut self, max: usize) -> Self {
        self.max_evidence_chars = max;
        self
    }

    /// Messages for one (criterion, judge) pair. Only evidence targeting the
    /// criterion is listed; the listing stops at `max_evidence_chars`.
    pub fn build_messages(
        &self,
        snapshot: &RunState,
        criterion: &Criterion,
        judge: Judge,
    ) -> Vec<Message> {
        let mut evidence = String::new();
        for item in snapshot.evidence().iter().filter(|e| e.targets(&criterion.id)) {
            let mut line = format!(
                "- [{}] ({}, found={}, confidence={:.2}) {}: {}",
                item.id, item.producer, item.found, item.confidence, item.goal, item.content
            );
            if !item.cited_paths.is_empty() {
                let paths: Vec<&str> = item.cited_paths.iter().map(String::as_str).collect();
                line.push_str(&format!(" [paths: {}]", paths.join(", ")));
            }
            line.push('\n');
            if evidence.len() + line.len() > self.max_evidence_chars {
                evidence.push_str("- ... (further evidence omitted)\n");
                break;
            }
            evidence.push_str(&line);
        }
        if evidence.is_empty() {
            evidence.push_str("- (no evidence collected)\n");
        }

        let security = if criterion.security_sensitive {
            "This criterion is security sensitive.\n"
        } else {
            ""
        };
        let prompt = format!(
            "Criterion `{id}`: {label}\n{security}Pass threshold: {threshold}\n\n\
             Evidence:\n{evidence}\n\
             Answer with a single JSON object and nothing else:\n\
             {{\"score\": <integer 1-5>, \"rationale\": <string>, \
             \"cited_evidence\": [<evidence ids>], \"cited_paths\": [<repository paths>]}}\n\
             Score 1 is a critical failure, 5 is excellent.",
            id = criterion.id,
            label = criterion.label,
            threshold = criterion.pass_threshold,
        );

        vec![
            Message::system(format!(
                "You are the {} judge on an audit bench. {}",
                judge.as_str(),
                stance(judge)
            )),
            Message::user(prompt),
        ]
    }
}

#[async_trait]
impl Evaluator for LlmEvaluator {
    async fn evaluate(
        &self,
        snapshot: &RunState,
        criterion: &Criterion,
        judge: Judge,
        cancel: &CancellationToken,
    ) -> Result<OpinionDraft, CallError> {
        let messages = self.build_messages(snapshot, criterion, judge);
        debug!(
            provider = self.provider.provider_name(),
            model = self.provider.model_name(),
            judge = judge.as_str(),
            criterion = %criterion.id,
            "requesting opinion"
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            response = self.provider.generate_chat(&messages, &self.generation) => response?,
        };
        let draft: OpinionDraft = parse_structured(&response.content)?;
        Score::new(draft.score)?;
        Ok(draft)
    }
}
