//! SQL Generator
//!
//! Turns a question plus schema documentation into a candidate query.

use crate::llm::{guarded_complete, ChatMessage, CompletionParams, CompletionProvider};
use crate::question::Question;
use crate::schema_doc::SchemaDocument;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const GENERATION_SYSTEM_PROMPT: &str = "You are an assistant that generates SQL queries based on the provided table schema. Do not invent columns or tables that are not in the schema.";

/// Output of one generation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Candidate {
    Sql(String),
    /// The provider call failed; no SQL text exists for this attempt.
    GenerationFailed,
}

impl Candidate {
    pub fn sql(&self) -> Option<&str> {
        match self {
            Candidate::Sql(sql) => Some(sql),
            Candidate::GenerationFailed => None,
        }
    }

    pub fn is_generation_failed(&self) -> bool {
        matches!(self, Candidate::GenerationFailed)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Candidate::Sql(sql) => f.write_str(sql),
            Candidate::GenerationFailed => write!(f, "<generation failed>"),
        }
    }
}

pub struct SqlGenerator {
    provider: Arc<dyn CompletionProvider>,
    call_timeout: Duration,
}

impl SqlGenerator {
    pub fn new(provider: Arc<dyn CompletionProvider>, call_timeout: Duration) -> Self {
        Self {
            provider,
            call_timeout,
        }
    }

    /// Build the system + user message pair for generation.
    pub fn build_messages(question: &Question, schema: &SchemaDocument) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(GENERATION_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Available tables: {}\n\nQuestion: {}\n\nGenerate only the SQL, with no other text.",
                schema.to_prompt_text(),
                question
            )),
        ]
    }

    pub async fn generate(
        &self,
        question: &Question,
        schema: &SchemaDocument,
        cancel: &CancellationToken,
    ) -> Candidate {
        let messages = Self::build_messages(question, schema);

        match guarded_complete(
            self.provider.as_ref(),
            &messages,
            &CompletionParams::generation(),
            self.call_timeout,
            cancel,
        )
        .await
        {
            Ok(text) => {
                let sql = text.trim();
                if sql.is_empty() {
                    warn!(provider = self.provider.name(), "Generation returned empty text");
                    Candidate::GenerationFailed
                } else {
                    Candidate::Sql(sql.to_string())
                }
            }
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "SQL generation failed");
                Candidate::GenerationFailed
            }
        }
    }
}
