//! Serde types matching the Jira search endpoint.
//!
//! Raw records keep every field the server sent so a snapshot is a faithful
//! copy of the response; the projection to application types lives in
//! `types.rs`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields requested when the caller does not choose its own.
pub const DEFAULT_FIELDS: &[&str] = &["key", "summary", "created", "description"];

// ============================================================================
// Search endpoint request/response
// ============================================================================

/// Body of `POST /rest/api/2/search`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
  pub jql: String,
  #[serde(rename = "startAt")]
  pub start_at: u64,
  #[serde(rename = "maxResults")]
  pub max_results: u32,
  pub fields: Vec<String>,
}

impl SearchRequest {
  pub fn new(jql: impl Into<String>, start_at: u64, max_results: u32, fields: &[String]) -> Self {
    Self {
      jql: jql.into(),
      start_at,
      max_results,
      fields: fields.to_vec(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SearchResponse {
  #[serde(rename = "startAt", default)]
  pub start_at: u64,
  #[serde(rename = "maxResults", default)]
  pub max_results: u64,
  #[serde(default)]
  pub total: u64,
  #[serde(default)]
  pub issues: Vec<RawRecord>,
}

// ============================================================================
// Issues
// ============================================================================

/// An issue exactly as returned by the server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawRecord {
  #[serde(default)]
  pub key: String,
  #[serde(default)]
  pub fields: RawFields,
  /// `id`, `self`, `expand` and anything else outside `fields`
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawFields {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub summary: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created: Option<String>,
  /// Plain text in API v2, an ADF document in v3
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<Value>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

// ============================================================================
// Helpers
// ============================================================================

/// Extract plain text description from Jira's ADF or plain text format
pub fn extract_description(value: &Value) -> Option<String> {
  if let Some(s) = value.as_str() {
    return Some(s.to_string());
  }

  if let Some(content) = value.get("content").and_then(|v| v.as_array()) {
    let mut text = String::new();
    extract_adf_text(content, &mut text);
    if !text.is_empty() {
      return Some(text);
    }
  }

  None
}

/// Recursively extract text from ADF content
fn extract_adf_text(content: &[Value], output: &mut String) {
  for node in content {
    let Some(node_type) = node.get("type").and_then(|v| v.as_str()) else {
      continue;
    };
    match node_type {
      "text" => {
        if let Some(text) = node.get("text").and_then(|v| v.as_str()) {
          output.push_str(text);
        }
      }
      "hardBreak" => output.push('\n'),
      _ => {
        if let Some(children) = node.get("content").and_then(|v| v.as_array()) {
          extract_adf_text(children, output);
        }
        if node_type == "paragraph" || node_type == "heading" {
          output.push('\n');
        }
      }
    }
  }
}
