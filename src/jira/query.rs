//! JQL filter construction.
//!
//! Filters are built as a small predicate tree and rendered to a string in
//! one place, so user-supplied values always pass through JQL quoting instead
//! of being spliced into the query text.

use std::fmt;

use chrono::NaiveDate;

use super::partition::PartitionKey;

const OWNER_FIELD: &str = "assignee";
const CREATED_FIELD: &str = "created";

/// A literal on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
  /// Free text, always rendered quoted and escaped
  Text(String),
  /// Calendar date, rendered as `YYYY-MM-DD`
  Date(NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
  Eq,
  Gte,
  Lt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
  Compare {
    field: &'static str,
    op: Op,
    value: Value,
  },
  And(Vec<Predicate>),
  Or(Vec<Predicate>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
  Asc,
}

/// A complete JQL query: an optional predicate and an optional ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
  pub predicate: Option<Predicate>,
  pub order_by: Option<(&'static str, SortOrder)>,
}

impl Predicate {
  fn compare(field: &'static str, op: Op, value: Value) -> Self {
    Self::Compare { field, op, value }
  }

  /// Conjunction, flattening nested conjunctions.
  pub fn and(parts: Vec<Predicate>) -> Self {
    let mut flat = Vec::with_capacity(parts.len());
    for part in parts {
      match part {
        Self::And(inner) => flat.extend(inner),
        other => flat.push(other),
      }
    }
    Self::And(flat)
  }

  /// Disjunction; a single alternative is returned as-is.
  pub fn or(mut parts: Vec<Predicate>) -> Self {
    if parts.len() == 1 {
      parts.remove(0)
    } else {
      Self::Or(parts)
    }
  }

  /// Records whose creation date falls in `[start, end)` of the partition.
  pub fn created_within(partition: PartitionKey) -> Self {
    Self::And(vec![
      Self::compare(CREATED_FIELD, Op::Gte, Value::Date(partition.start())),
      Self::compare(CREATED_FIELD, Op::Lt, Value::Date(partition.end())),
    ])
  }

  pub fn owned_by(identity: &str) -> Self {
    Self::compare(OWNER_FIELD, Op::Eq, Value::Text(identity.to_string()))
  }

  fn render(&self, out: &mut String, nested: bool) {
    match self {
      Self::Compare { field, op, value } => {
        out.push_str(field);
        out.push_str(match op {
          Op::Eq => " = ",
          Op::Gte => " >= ",
          Op::Lt => " < ",
        });
        value.render(out);
      }
      Self::And(parts) => render_joined(parts, " AND ", out, nested),
      Self::Or(parts) => render_joined(parts, " OR ", out, nested),
    }
  }
}

fn render_joined(parts: &[Predicate], sep: &str, out: &mut String, nested: bool) {
  if let [single] = parts {
    single.render(out, nested);
    return;
  }
  if nested {
    out.push('(');
  }
  for (i, part) in parts.iter().enumerate() {
    if i > 0 {
      out.push_str(sep);
    }
    part.render(out, true);
  }
  if nested {
    out.push(')');
  }
}

impl Value {
  fn render(&self, out: &mut String) {
    match self {
      Self::Date(date) => out.push_str(&date.format("%Y-%m-%d").to_string()),
      Self::Text(text) => {
        out.push('"');
        for c in text.chars() {
          if c == '"' || c == '\\' {
            out.push('\\');
          }
          out.push(c);
        }
        out.push('"');
      }
    }
  }
}

impl fmt::Display for Filter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut out = String::new();
    if let Some(predicate) = &self.predicate {
      predicate.render(&mut out, false);
    }
    if let Some((field, order)) = self.order_by {
      if !out.is_empty() {
        out.push(' ');
      }
      out.push_str("ORDER BY ");
      out.push_str(field);
      out.push_str(match order {
        SortOrder::Asc => " ASC",
      });
    }
    f.write_str(&out)
  }
}

/// Filter selecting `identity`'s issues created within one partition,
/// oldest first.
pub fn build_partition_filter(partition: PartitionKey, identity: &str) -> String {
  Filter {
    predicate: Some(Predicate::and(vec![
      Predicate::owned_by(identity),
      Predicate::created_within(partition),
    ])),
    order_by: Some((CREATED_FIELD, SortOrder::Asc)),
  }
  .to_string()
}

/// Filter selecting `identity`'s issues created within any of `partitions`.
/// With no partitions the filter selects by owner only.
pub fn build_multi_partition_filter(partitions: &[PartitionKey], identity: &str) -> String {
  let owner = Predicate::owned_by(identity);
  let predicate = if partitions.is_empty() {
    owner
  } else {
    let ranges = partitions
      .iter()
      .map(|p| Predicate::created_within(*p))
      .collect();
    Predicate::and(vec![owner, Predicate::or(ranges)])
  };

  Filter {
    predicate: Some(predicate),
    order_by: Some((CREATED_FIELD, SortOrder::Asc)),
  }
  .to_string()
}
