use thiserror::Error;

#[derive(Error, Debug)]
pub enum Text2SqlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema documentation error: {0}")]
    Schema(String),

    #[error("Question error: {0}")]
    Question(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures raised at the completion-service boundary.
///
/// These never cross the orchestrator: the generator and validator turn them
/// into domain outcomes where they occur.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("response was filtered by content policy")]
    ContentFiltered,

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("request cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Text2SqlError>;
