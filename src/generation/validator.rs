//! SQL Validator
//!
//! Asks the model whether a candidate only touches known tables/columns and
//! is read-only. Fails closed: anything but an explicit "valid" is rejected.

use super::generator::Candidate;
use crate::llm::{guarded_complete, ChatMessage, CompletionParams, CompletionProvider};
use crate::schema_doc::SchemaDocument;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Keywords a candidate must not contain.
pub const BANNED_KEYWORDS: [&str; 7] = [
    "drop", "create", "alter", "truncate", "insert", "update", "delete",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Valid,
    Invalid,
    /// Recorded for attempts whose generation step produced no SQL.
    GenerationFailed,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid)
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationOutcome::Valid => write!(f, "valid"),
            ValidationOutcome::Invalid => write!(f, "invalid"),
            ValidationOutcome::GenerationFailed => write!(f, "generation_failed"),
        }
    }
}

/// Map the model's raw answer to an outcome.
///
/// The answer must be the single token `valid` (case-insensitive, surrounding
/// whitespace, quotes and punctuation ignored). A substring test would accept
/// "invalid", so it is not used.
pub fn classify_response(response: &str) -> ValidationOutcome {
    let token = response
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_lowercase();

    if token == "valid" {
        ValidationOutcome::Valid
    } else {
        ValidationOutcome::Invalid
    }
}

pub struct SqlValidator {
    provider: Arc<dyn CompletionProvider>,
    call_timeout: Duration,
}

impl SqlValidator {
    pub fn new(provider: Arc<dyn CompletionProvider>, call_timeout: Duration) -> Self {
        Self {
            provider,
            call_timeout,
        }
    }

    pub fn build_messages(sql: &str, schema: &SchemaDocument) -> Vec<ChatMessage> {
        vec![ChatMessage::user(format!(
            "Check whether the SQL query below is valid for the given schema.\n\n\
             Available tables: {}\n\n\
             SQL query:\n{}\n\n\
             The query is valid only if:\n\
             1. It references only tables and columns that exist in the schema.\n\
             2. It contains none of these keywords: {}.\n\n\
             Answer with exactly one word: valid or invalid.",
            schema.to_prompt_text(),
            sql,
            BANNED_KEYWORDS.join(", ")
        ))]
    }

    pub async fn validate(
        &self,
        candidate: &Candidate,
        schema: &SchemaDocument,
        cancel: &CancellationToken,
    ) -> ValidationOutcome {
        let sql = match candidate {
            Candidate::Sql(sql) => sql,
            Candidate::GenerationFailed => {
                debug!("Skipping validation call for failed generation");
                return ValidationOutcome::Invalid;
            }
        };

        let messages = Self::build_messages(sql, schema);
        match guarded_complete(
            self.provider.as_ref(),
            &messages,
            &CompletionParams::validation(),
            self.call_timeout,
            cancel,
        )
        .await
        {
            Ok(response) => {
                let outcome = classify_response(&response);
                debug!(response = %response, outcome = %outcome, "Classified validation response");
                outcome
            }
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "SQL validation call failed, treating as invalid");
                ValidationOutcome::Invalid
            }
        }
    }
}
