use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use text2sql::generation::{SqlGenerator, SqlValidator};
use text2sql::{
    ChatMessage, CompletionParams, CompletionProvider, ProviderError, Question, RetryOrchestrator,
    RetryPolicy, RunStatus, SchemaDocument,
};
use tokio_util::sync::CancellationToken;

type Reply = Result<String, ProviderError>;
type GenerateFn = Box<dyn Fn(usize) -> Reply + Send + Sync>;
type ValidateFn = Box<dyn Fn(String) -> Reply + Send + Sync>;

/// Stub provider that answers generation calls (system + user) and
/// validation calls (single user message) from separate scripts.
struct ScriptedProvider {
    generate: GenerateFn,
    validate: ValidateFn,
    generation_calls: AtomicUsize,
    validation_calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(generate: GenerateFn, validate: ValidateFn) -> Arc<Self> {
        Arc::new(Self {
            generate,
            validate,
            generation_calls: AtomicUsize::new(0),
            validation_calls: AtomicUsize::new(0),
        })
    }

    fn generations(&self) -> usize {
        self.generation_calls.load(Ordering::SeqCst)
    }

    fn validations(&self) -> usize {
        self.validation_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[ChatMessage], params: &CompletionParams) -> Reply {
        if messages.len() == 2 {
            assert_eq!(params, &CompletionParams::generation());
            let n = self.generation_calls.fetch_add(1, Ordering::SeqCst);
            (self.generate)(n)
        } else {
            assert_eq!(params, &CompletionParams::validation());
            self.validation_calls.fetch_add(1, Ordering::SeqCst);
            (self.validate)(messages[0].content.clone())
        }
    }
}

/// The candidate SQL embedded in a validation prompt.
fn candidate_in(prompt: &str) -> &str {
    let start = prompt.find("SQL query:\n").map(|i| i + "SQL query:\n".len()).unwrap_or(0);
    let end = prompt.find("\n\nThe query is valid only if").unwrap_or(prompt.len());
    &prompt[start..end]
}

fn shop_schema() -> SchemaDocument {
    SchemaDocument::from_value(json!({
        "customers": ["id", "name"],
        "orders": ["id", "customer_id", "amount"]
    }))
    .unwrap()
}

fn question() -> Question {
    Question::new("Which customer bought the least?").unwrap()
}

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_secs(5)).unwrap()
}

const LEAST_SQL: &str = "SELECT c.name FROM customers c JOIN orders o ON o.customer_id = c.id GROUP BY c.id ORDER BY SUM(o.amount) ASC LIMIT 1;";

#[tokio::test]
async fn test_valid_on_first_attempt_returns_candidate() {
    let provider = ScriptedProvider::new(
        Box::new(|_| Ok(LEAST_SQL.to_string())),
        Box::new(|_| Ok("valid".to_string())),
    );
    let orchestrator = RetryOrchestrator::new(provider.clone(), policy(3));

    let result = orchestrator
        .run(&question(), &shop_schema(), &CancellationToken::new())
        .await;

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.sql_query.as_deref(), Some(LEAST_SQL));
    assert_eq!(result.attempts, 1);
    assert!(result.failure_reason.is_none());
    assert_eq!(provider.generations(), 1);
    assert_eq!(provider.validations(), 1);
}

#[tokio::test]
async fn test_always_invalid_exhausts_configured_attempts() {
    let provider = ScriptedProvider::new(
        Box::new(|n| Ok(format!("SELECT missing_{} FROM customers;", n))),
        Box::new(|_| Ok("invalid".to_string())),
    );
    let orchestrator = RetryOrchestrator::new(provider.clone(), policy(4));

    let result = orchestrator
        .run(&question(), &shop_schema(), &CancellationToken::new())
        .await;

    assert_eq!(result.status, RunStatus::ExhaustedRetries);
    assert_eq!(result.attempts, 4);
    assert_eq!(result.sql_query.as_deref(), Some("SELECT missing_3 FROM customers;"));
    assert_eq!(provider.generations(), 4);
    assert_eq!(provider.validations(), 4);
}

#[tokio::test]
async fn test_mutating_query_is_never_accepted() {
    let provider = ScriptedProvider::new(
        Box::new(|_| Ok("DROP TABLE customers;".to_string())),
        Box::new(|prompt| {
            let sql = candidate_in(&prompt).to_lowercase();
            let banned = ["drop", "create", "alter", "truncate", "insert", "update", "delete"];
            if banned.iter().any(|kw| sql.contains(kw)) {
                Ok("invalid".to_string())
            } else {
                Ok("valid".to_string())
            }
        }),
    );
    let orchestrator = RetryOrchestrator::new(provider.clone(), policy(3));

    let result = orchestrator
        .run(&question(), &shop_schema(), &CancellationToken::new())
        .await;

    assert_eq!(result.status, RunStatus::ExhaustedRetries);
    assert_eq!(result.sql_query.as_deref(), Some("DROP TABLE customers;"));
    assert_eq!(result.attempts, 3);
}

#[tokio::test]
async fn test_retry_succeeds_after_rejection() {
    let provider = ScriptedProvider::new(
        Box::new(|n| {
            if n == 0 {
                Ok("SELECT total FROM customers;".to_string())
            } else {
                Ok(LEAST_SQL.to_string())
            }
        }),
        Box::new(|prompt| {
            if candidate_in(&prompt).contains("total") {
                Ok("invalid".to_string())
            } else {
                Ok("Valid.".to_string())
            }
        }),
    );
    let orchestrator = RetryOrchestrator::new(provider.clone(), policy(3));

    let result = orchestrator
        .run(&question(), &shop_schema(), &CancellationToken::new())
        .await;

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.sql_query.as_deref(), Some(LEAST_SQL));
    assert_eq!(result.attempts, 2);
    assert_eq!(provider.generations(), 2);
}

#[tokio::test]
async fn test_invalid_answer_is_not_read_as_valid() {
    let provider = ScriptedProvider::new(
        Box::new(|_| Ok(LEAST_SQL.to_string())),
        Box::new(|_| Ok("INVALID".to_string())),
    );
    let orchestrator = RetryOrchestrator::new(provider, policy(2));

    let result = orchestrator
        .run(&question(), &shop_schema(), &CancellationToken::new())
        .await;

    assert_eq!(result.status, RunStatus::ExhaustedRetries);
}

#[tokio::test]
async fn test_generation_failures_skip_validation_calls() {
    let provider = ScriptedProvider::new(
        Box::new(|_| {
            Err(ProviderError::Api {
                status: 429,
                body: "rate limited".to_string(),
            })
        }),
        Box::new(|_| Ok("valid".to_string())),
    );
    let orchestrator = RetryOrchestrator::new(provider.clone(), policy(3));

    let result = orchestrator
        .run(&question(), &shop_schema(), &CancellationToken::new())
        .await;

    assert_eq!(result.status, RunStatus::ExhaustedRetries);
    assert_eq!(result.sql_query, None);
    assert_eq!(provider.generations(), 3);
    assert_eq!(provider.validations(), 0);
}

#[tokio::test]
async fn test_recovers_from_failed_generation() {
    let provider = ScriptedProvider::new(
        Box::new(|n| {
            if n == 0 {
                Err(ProviderError::Transport("connection reset".to_string()))
            } else {
                Ok(LEAST_SQL.to_string())
            }
        }),
        Box::new(|_| Ok("valid".to_string())),
    );
    let orchestrator = RetryOrchestrator::new(provider.clone(), policy(3));

    let result = orchestrator
        .run(&question(), &shop_schema(), &CancellationToken::new())
        .await;

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.attempts, 2);
    assert_eq!(provider.validations(), 1);
}

#[tokio::test]
async fn test_validation_failure_fails_closed() {
    let provider = ScriptedProvider::new(
        Box::new(|_| Ok(LEAST_SQL.to_string())),
        Box::new(|_| Err(ProviderError::Malformed("No choices in LLM response".to_string()))),
    );
    let orchestrator = RetryOrchestrator::new(provider.clone(), policy(2));

    let result = orchestrator
        .run(&question(), &shop_schema(), &CancellationToken::new())
        .await;

    assert_eq!(result.status, RunStatus::ExhaustedRetries);
    assert_eq!(result.sql_query.as_deref(), Some(LEAST_SQL));
    assert_eq!(provider.validations(), 2);
}

#[tokio::test]
async fn test_pre_cancelled_run_makes_no_calls() {
    let provider = ScriptedProvider::new(
        Box::new(|_| Ok(LEAST_SQL.to_string())),
        Box::new(|_| Ok("valid".to_string())),
    );
    let orchestrator = RetryOrchestrator::new(provider.clone(), policy(3));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orchestrator.run(&question(), &shop_schema(), &cancel).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.failure_reason.as_deref(), Some("cancelled"));
    assert_eq!(result.attempts, 0);
    assert_eq!(provider.generations(), 0);
    assert_eq!(provider.validations(), 0);
}

#[tokio::test]
async fn test_cancel_during_generation_stops_before_validation() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let provider = ScriptedProvider::new(
        Box::new(move |_| {
            trigger.cancel();
            Ok(LEAST_SQL.to_string())
        }),
        Box::new(|_| Ok("valid".to_string())),
    );
    let orchestrator = RetryOrchestrator::new(provider.clone(), policy(3));

    let result = orchestrator.run(&question(), &shop_schema(), &cancel).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.attempts, 1);
    assert_eq!(provider.generations(), 1);
    assert_eq!(provider.validations(), 0);
}

struct HangingProvider;

#[async_trait]
impl CompletionProvider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn complete(&self, _messages: &[ChatMessage], _params: &CompletionParams) -> Reply {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok("valid".to_string())
    }
}

#[tokio::test]
async fn test_call_timeout_bounds_each_attempt() {
    let policy = RetryPolicy::new(2, Duration::from_millis(20)).unwrap();
    let orchestrator = RetryOrchestrator::new(Arc::new(HangingProvider), policy);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run(&question(), &shop_schema(), &CancellationToken::new()),
    )
    .await
    .expect("run should finish well within the outer timeout");

    assert_eq!(result.status, RunStatus::ExhaustedRetries);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.sql_query, None);
}

#[tokio::test]
async fn test_separate_generation_and_validation_providers() {
    let generation = ScriptedProvider::new(
        Box::new(|_| Ok(LEAST_SQL.to_string())),
        Box::new(|_| -> Reply { panic!("generation provider must not validate") }),
    );
    let validation = ScriptedProvider::new(
        Box::new(|_| -> Reply { panic!("validation provider must not generate") }),
        Box::new(|_| Ok("valid".to_string())),
    );
    let policy = policy(3);
    let orchestrator = RetryOrchestrator::from_parts(
        SqlGenerator::new(generation.clone(), policy.call_timeout),
        SqlValidator::new(validation.clone(), policy.call_timeout),
        policy,
    );

    let result = orchestrator
        .run(&question(), &shop_schema(), &CancellationToken::new())
        .await;

    assert!(result.is_success());
    assert_eq!(generation.generations(), 1);
    assert_eq!(validation.validations(), 1);
}

#[tokio::test]
async fn test_concurrent_runs_share_one_provider() {
    let provider = ScriptedProvider::new(
        Box::new(|_| Ok(LEAST_SQL.to_string())),
        Box::new(|_| Ok("valid".to_string())),
    );
    let orchestrator = Arc::new(RetryOrchestrator::new(provider.clone(), policy(3)));
    let schema = shop_schema();

    let q1 = Question::new("Which customer bought the least?").unwrap();
    let q2 = Question::new("How many orders are there?").unwrap();
    let cancel = CancellationToken::new();

    let (a, b) = tokio::join!(
        orchestrator.run(&q1, &schema, &cancel),
        orchestrator.run(&q2, &schema, &cancel)
    );

    assert!(a.is_success());
    assert!(b.is_success());
    assert_eq!(provider.generations(), 2);
    assert_eq!(provider.validations(), 2);
}

/// Answers generation immediately, then never answers validation.
struct StalledValidationProvider;

#[async_trait]
impl CompletionProvider for StalledValidationProvider {
    fn name(&self) -> &str {
        "stalled-validation"
    }

    async fn complete(&self, messages: &[ChatMessage], _params: &CompletionParams) -> Reply {
        if messages.len() == 2 {
            return Ok("SELECT name FROM customers;".to_string());
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok("valid".to_string())
    }
}

#[tokio::test]
async fn test_cancel_while_validation_in_flight_fails_run() {
    let policy = RetryPolicy::new(3, Duration::from_secs(120)).unwrap();
    let orchestrator = RetryOrchestrator::new(Arc::new(StalledValidationProvider), policy);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let result = orchestrator.run(&question(), &shop_schema(), &cancel).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.failure_reason.as_deref(), Some("cancelled"));
    assert_eq!(result.attempts, 1);
    assert_eq!(result.sql_query.as_deref(), Some("SELECT name FROM customers;"));
}

#[tokio::test]
async fn test_exhausted_run_keeps_last_generated_sql() {
    let provider = ScriptedProvider::new(
        Box::new(|n| {
            if n == 0 {
                Ok("SELECT first FROM customers;".to_string())
            } else {
                Err(ProviderError::Transport("connection refused".to_string()))
            }
        }),
        Box::new(|_| Ok("invalid".to_string())),
    );
    let orchestrator = RetryOrchestrator::new(provider.clone(), policy(3));

    let result = orchestrator
        .run(&question(), &shop_schema(), &CancellationToken::new())
        .await;

    assert_eq!(result.status, RunStatus::ExhaustedRetries);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.sql_query.as_deref(), Some("SELECT first FROM customers;"));
    assert_eq!(provider.generations(), 3);
    assert_eq!(provider.validations(), 1);
}
