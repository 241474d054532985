use serde::{Deserialize, Serialize};

use super::api_types::{extract_description, RawRecord};

/// Reduced issue shape served to clients and written as formatted output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectedRecord {
  pub summary: String,
  pub created: String,
  pub description: String,
}

impl From<&RawRecord> for ProjectedRecord {
  fn from(raw: &RawRecord) -> Self {
    let f = &raw.fields;
    ProjectedRecord {
      summary: f.summary.clone().unwrap_or_default(),
      created: f.created.clone().unwrap_or_default(),
      description: f
        .description
        .as_ref()
        .and_then(extract_description)
        .unwrap_or_default(),
    }
  }
}

/// Project raw issues to the reduced shape, one output per input, in order.
pub fn project(records: &[RawRecord]) -> Vec<ProjectedRecord> {
  records.iter().map(ProjectedRecord::from).collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn raw(value: serde_json::Value) -> RawRecord {
    serde_json::from_value(value).unwrap()
  }

  #[test]
  fn test_project_copies_fields() {
    let records = vec![raw(json!({
      "key": "PROJ-1",
      "fields": {
        "summary": "Fix login",
        "created": "2024-02-03T04:05:06.000+0000",
        "description": "Users cannot log in",
        "labels": ["auth"]
      }
    }))];

    assert_eq!(
      project(&records),
      vec![ProjectedRecord {
        summary: "Fix login".to_string(),
        created: "2024-02-03T04:05:06.000+0000".to_string(),
        description: "Users cannot log in".to_string(),
      }]
    );
  }

  #[test]
  fn test_missing_summary_becomes_empty() {
    let records = vec![
      raw(json!({ "key": "PROJ-1", "fields": { "created": "c", "description": "d" } })),
      raw(json!({ "key": "PROJ-2" })),
      raw(json!({ "key": "PROJ-3", "fields": { "summary": null, "description": null } })),
    ];

    let projected = project(&records);
    assert_eq!(projected.len(), 3);
    assert_eq!(projected[0].summary, "");
    assert_eq!(projected[0].created, "c");
    assert_eq!(projected[1], ProjectedRecord::default());
    assert_eq!(projected[2], ProjectedRecord::default());
  }

  #[test]
  fn test_project_preserves_order_and_duplicates() {
    let records: Vec<RawRecord> = ["b", "a", "b"]
      .iter()
      .map(|s| raw(json!({ "key": s, "fields": { "summary": s } })))
      .collect();

    let summaries: Vec<String> = project(&records).into_iter().map(|r| r.summary).collect();
    assert_eq!(summaries, vec!["b", "a", "b"]);
  }

  #[test]
  fn test_project_empty() {
    assert!(project(&[]).is_empty());
  }
}
