//! Run state and results for the retry loop.

use crate::generation::{Candidate, ValidationOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the loop currently is. Used as a log field on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Generating,
    Validating,
    Deciding,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Generating => write!(f, "generating"),
            RunState::Validating => write!(f, "validating"),
            RunState::Deciding => write!(f, "deciding"),
            RunState::Done => write!(f, "done"),
        }
    }
}

/// One pass through generate -> validate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationAttempt {
    pub attempt_number: u32,
    pub candidate: Candidate,
    pub outcome: ValidationOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    ExhaustedRetries,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::ExhaustedRetries => write!(f, "exhausted_retries"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What a run hands back to the caller.
///
/// `sql_query` is the accepted query on success. Otherwise it is the most
/// recent candidate that produced SQL text, kept for diagnostics, and `None`
/// if no attempt produced any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub sql_query: Option<String>,
    pub status: RunStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl RunResult {
    pub fn succeeded(sql: String, attempts: u32) -> Self {
        Self {
            sql_query: Some(sql),
            status: RunStatus::Succeeded,
            attempts,
            failure_reason: None,
        }
    }

    pub fn exhausted(last_sql: Option<String>, attempts: u32) -> Self {
        Self {
            sql_query: last_sql,
            status: RunStatus::ExhaustedRetries,
            attempts,
            failure_reason: Some(format!(
                "no valid query after {} attempt(s)",
                attempts
            )),
        }
    }

    pub fn failed(last_sql: Option<String>, attempts: u32, reason: impl Into<String>) -> Self {
        Self {
            sql_query: last_sql,
            status: RunStatus::Failed,
            attempts,
            failure_reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}
