pub mod config;
pub mod error;
pub mod execution_loop;
pub mod generation;
pub mod llm;
pub mod question;
pub mod schema_doc;

pub use config::AppConfig;
pub use error::{ProviderError, Result, Text2SqlError};
pub use execution_loop::{RetryOrchestrator, RetryPolicy, RunResult, RunStatus};
pub use llm::{ChatMessage, CompletionParams, CompletionProvider, LlmClient, Role};
pub use question::Question;
pub use schema_doc::SchemaDocument;
