//! Rendering of expanded documents for stdout.

use anyhow::Result;

use super::OutputFormat;
use crate::dotenv::Document;

/// Render `document` in `format`. Comments survive only in dotenv output.
pub fn render(document: &Document, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Dotenv => Ok(document.to_string()),
        OutputFormat::Json => {
            let mut map = serde_json::Map::new();
            for entry in document.entries() {
                map.insert(entry.name.clone(), serde_json::Value::String(entry.value.clone()));
            }
            let mut text = serde_json::to_string_pretty(&serde_json::Value::Object(map))?;
            text.push('\n');
            Ok(text)
        }
        OutputFormat::Export => {
            let mut text = String::new();
            for entry in document.entries() {
                text.push_str(&format!(
                    "export {}='{}'\n",
                    entry.name,
                    entry.value.replace('\'', "'\\''")
                ));
            }
            Ok(text)
        }
    }
}
