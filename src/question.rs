use crate::error::{Result, Text2SqlError};
use std::fmt;
use std::io::BufRead;

/// The user's natural-language request. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question(String);

impl Question {
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Text2SqlError::Question("question must not be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read the first non-blank line from `reader`.
pub fn read_question<R: BufRead>(reader: R) -> Result<Question> {
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            return Question::new(line);
        }
    }
    Err(Text2SqlError::Question("no question provided".to_string()))
}
