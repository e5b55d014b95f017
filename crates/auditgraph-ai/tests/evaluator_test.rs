use async_trait::async_trait;
use auditgraph_ai::{
    CompletionProvider, CompletionResponse, GenerationConfig, LlmEvaluator, Message,
    ProviderResult, ResilientCaller,
};
use auditgraph_core::{
    CallError, Criterion, Evaluator, Judge, OpinionDraft, RetryPolicy, RunState,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Replays canned answers in order; `Err` entries simulate transport failures.
struct ScriptedProvider {
    script: Mutex<VecDeque<Result<&'static str, &'static str>>>,
    calls: Mutex<Vec<Vec<Message>>>,
    delay: Duration,
}

impl ScriptedProvider {
    fn new(script: Vec<Result<&'static str, &'static str>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            delay,
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn generate_chat(
        &self,
        messages: &[Message],
        _config: &GenerationConfig,
    ) -> ProviderResult<CompletionResponse> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(content)) => Ok(CompletionResponse {
                content: content.to_string(),
                model: "scripted".to_string(),
                total_tokens: None,
                finish_reason: Some("stop".to_string()),
            }),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("script exhausted")),
        }
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-1"
    }
}

fn criterion() -> Criterion {
    Criterion::new("graph_orchestration", "Graph Orchestration Architecture")
}

async fn evaluate_with_retry(
    evaluator: &LlmEvaluator,
    max_attempts: u32,
    judge: Judge,
    cancel: &CancellationToken,
) -> Result<OpinionDraft, CallError> {
    let state = RunState::new(vec![criterion()]);
    let criterion = criterion();
    ResilientCaller::new("evaluate", RetryPolicy::no_delay(max_attempts))
        .call(cancel, |_| evaluator.evaluate(&state, &criterion, judge, cancel))
        .await
}

#[tokio::test]
async fn parses_fenced_opinion() {
    let provider = ScriptedProvider::new(vec![Ok(
        "```json\n{\"score\": 4, \"rationale\": \"fan-out is parallel\", \"cited_evidence\": [\"repo_investigator/0\"], \"cited_paths\": [\"src/graph.py\"]}\n```",
    )]);
    let evaluator = LlmEvaluator::new(provider.clone());

    let draft = evaluate_with_retry(&evaluator, 3, Judge::Pragmatic, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(draft.score, 4);
    assert_eq!(draft.cited_paths, vec!["src/graph.py".to_string()]);
    assert_eq!(provider.call_count(), 1);

    let opinion = draft
        .into_opinion("graph_orchestration", Judge::Pragmatic)
        .unwrap();
    assert_eq!(opinion.judge, Judge::Pragmatic);
    assert_eq!(opinion.score.get(), 4);
}

#[tokio::test]
async fn retries_transport_failures_and_malformed_answers() {
    let provider = ScriptedProvider::new(vec![
        Err("429 too many requests"),
        Ok("I think it deserves a 4."),
        Ok("{\"score\": 2, \"argument\": \"linear flow\"}"),
    ]);
    let evaluator = LlmEvaluator::new(provider.clone());

    let draft = evaluate_with_retry(&evaluator, 3, Judge::Adversarial, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(draft.score, 2);
    assert_eq!(draft.rationale, "linear flow");
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test]
async fn out_of_range_scores_exhaust_the_budget() {
    let provider = ScriptedProvider::new(vec![
        Ok("{\"score\": 7, \"rationale\": \"great\"}"),
        Ok("{\"score\": 0, \"rationale\": \"awful\"}"),
    ]);
    let evaluator = LlmEvaluator::new(provider.clone());

    let err = evaluate_with_retry(&evaluator, 2, Judge::Advocate, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::Exhausted { attempts: 2, .. }));
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn cancellation_abandons_a_slow_provider() {
    let provider = ScriptedProvider::slow(Duration::from_secs(30));
    let evaluator = LlmEvaluator::new(provider.clone());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = evaluate_with_retry(&evaluator, 3, Judge::Pragmatic, &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(provider.call_count(), 1);
}
