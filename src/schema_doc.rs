//! Schema Documentation
//!
//! The table/column description handed verbatim to both prompts.

use crate::error::{Result, Text2SqlError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Opaque description of the available tables, keyed by table name.
///
/// The core never inspects it beyond listing table names for log output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDocument(serde_json::Value);

impl SchemaDocument {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Self::parsed("schema documentation", value)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Self::parse("schema documentation", raw)
    }

    /// `source` names the input in error messages (a path or a fixed label).
    fn parse(source: &str, raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
            Text2SqlError::Schema(format!("{} is not valid JSON: {}", source, e))
        })?;
        Self::parsed(source, value)
    }

    fn parsed(source: &str, value: serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Text2SqlError::Schema(format!(
                "{} must be a JSON object keyed by table name",
                source
            )));
        }
        Ok(Self(value))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Text2SqlError::Schema(format!("{} not found", path.display()))
            } else {
                Text2SqlError::Schema(format!("failed to read {}: {}", path.display(), e))
            }
        })?;

        let doc = Self::parse(&path.display().to_string(), &raw)?;
        info!(path = %path.display(), tables = doc.table_names().len(), "Loaded schema documentation");
        Ok(doc)
    }

    /// Compact JSON with keys in sorted order, so the same document always
    /// yields the same prompt text.
    pub fn to_prompt_text(&self) -> String {
        self.0.to_string()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.0
            .as_object()
            .map(|tables| tables.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}
