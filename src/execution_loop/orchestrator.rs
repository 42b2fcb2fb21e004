//! Retry Orchestrator
//!
//! Bounded generate -> validate -> decide loop. Provider failures arrive here
//! already folded into `Candidate::GenerationFailed` or
//! `ValidationOutcome::Invalid`, so the transitions below never branch on
//! error details.

use super::state::{GenerationAttempt, RunResult, RunState};
use crate::config::{AppConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_SECS};
use crate::error::{Result, Text2SqlError};
use crate::generation::{Candidate, SqlGenerator, SqlValidator, ValidationOutcome};
use crate::llm::CompletionProvider;
use crate::question::Question;
use crate::schema_doc::SchemaDocument;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Upper bound on each individual provider call.
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, call_timeout: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Text2SqlError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if call_timeout.is_zero() {
            return Err(Text2SqlError::Config(
                "call timeout must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            call_timeout,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(config.max_attempts, config.call_timeout)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            call_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Loop position plus the data carried into the next step.
enum Step {
    Generating {
        attempt: u32,
    },
    Validating {
        attempt: u32,
        candidate: Candidate,
    },
    Deciding(GenerationAttempt),
    Done(RunResult),
}

impl Step {
    fn state(&self) -> RunState {
        match self {
            Step::Generating { .. } => RunState::Generating,
            Step::Validating { .. } => RunState::Validating,
            Step::Deciding(_) => RunState::Deciding,
            Step::Done(_) => RunState::Done,
        }
    }
}

pub struct RetryOrchestrator {
    generator: SqlGenerator,
    validator: SqlValidator,
    policy: RetryPolicy,
}

impl RetryOrchestrator {
    /// Use one provider for both generation and validation.
    pub fn new(provider: Arc<dyn CompletionProvider>, policy: RetryPolicy) -> Self {
        Self {
            generator: SqlGenerator::new(Arc::clone(&provider), policy.call_timeout),
            validator: SqlValidator::new(provider, policy.call_timeout),
            policy,
        }
    }

    pub fn from_parts(
        generator: SqlGenerator,
        validator: SqlValidator,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            generator,
            validator,
            policy,
        }
    }

    /// Drive the loop to a terminal result. Never returns an error: provider
    /// failures become rejected attempts, cancellation becomes `Failed`.
    pub async fn run(
        &self,
        question: &Question,
        schema: &SchemaDocument,
        cancel: &CancellationToken,
    ) -> RunResult {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "text2sql_run",
            %run_id,
            max_attempts = self.policy.max_attempts
        );
        self.drive(question, schema, cancel).instrument(span).await
    }

    async fn drive(
        &self,
        question: &Question,
        schema: &SchemaDocument,
        cancel: &CancellationToken,
    ) -> RunResult {
        info!(question = %question, tables = ?schema.table_names(), "Starting SQL generation run");

        let mut last_sql: Option<String> = None;
        let mut step = Step::Generating { attempt: 1 };

        loop {
            let from = step.state();
            step = match step {
                Step::Generating { attempt } => {
                    if cancel.is_cancelled() {
                        Step::Done(self.cancelled(last_sql.take(), attempt - 1))
                    } else {
                        info!(attempt, max_attempts = self.policy.max_attempts, "Generating SQL");
                        let candidate = self.generator.generate(question, schema, cancel).await;
                        if let Some(sql) = candidate.sql() {
                            last_sql = Some(sql.to_string());
                        }
                        Step::Validating { attempt, candidate }
                    }
                }
                Step::Validating { attempt, candidate } => {
                    if cancel.is_cancelled() {
                        Step::Done(self.cancelled(last_sql.take(), attempt))
                    } else {
                        let outcome = match self.validator.validate(&candidate, schema, cancel).await {
                            ValidationOutcome::Valid => ValidationOutcome::Valid,
                            _ if candidate.is_generation_failed() => ValidationOutcome::GenerationFailed,
                            _ => ValidationOutcome::Invalid,
                        };
                        Step::Deciding(GenerationAttempt {
                            attempt_number: attempt,
                            candidate,
                            outcome,
                        })
                    }
                }
                Step::Deciding(record) => self.decide(record, &mut last_sql, cancel),
                Step::Done(result) => {
                    info!(
                        status = %result.status,
                        attempts = result.attempts,
                        "SQL generation run finished"
                    );
                    return result;
                }
            };
            debug!(from = %from, to = %step.state(), "State transition");
        }
    }

    /// Branch on the attempt's outcome: finish, give up, or go again.
    fn decide(
        &self,
        record: GenerationAttempt,
        last_sql: &mut Option<String>,
        cancel: &CancellationToken,
    ) -> Step {
        let attempt = record.attempt_number;

        if record.outcome.is_valid() {
            if let Candidate::Sql(sql) = &record.candidate {
                info!(attempt, "✅ Query validated");
                return Step::Done(RunResult::succeeded(sql.clone(), attempt));
            }
        }

        warn!(
            attempt,
            outcome = %record.outcome,
            candidate = %record.candidate,
            "Candidate rejected"
        );

        if cancel.is_cancelled() {
            return Step::Done(self.cancelled(last_sql.take(), attempt));
        }

        if attempt >= self.policy.max_attempts {
            warn!(attempts = attempt, "Max attempts reached without a valid query");
            return Step::Done(RunResult::exhausted(last_sql.take(), attempt));
        }

        Step::Generating {
            attempt: attempt + 1,
        }
    }

    fn cancelled(&self, last_sql: Option<String>, attempts: u32) -> RunResult {
        warn!(attempts, "Run cancelled");
        RunResult::failed(last_sql, attempts, "cancelled")
    }
}
