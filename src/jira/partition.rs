//! Partition keys: the unit of fetch, persistence and caching.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A calendar-year partition.
///
/// The same key names the remote query range, the snapshot file and the
/// cache entry. It is displayed and parsed as a zero-padded 4-digit year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionKey(i32);

impl PartitionKey {
  pub const MIN_YEAR: i32 = 1;
  pub const MAX_YEAR: i32 = 9999;

  pub fn new(year: i32) -> Result<Self> {
    if (Self::MIN_YEAR..=Self::MAX_YEAR).contains(&year) {
      Ok(Self(year))
    } else {
      Err(Error::InvalidPartition(format!(
        "year {} outside {}..={}",
        year,
        Self::MIN_YEAR,
        Self::MAX_YEAR
      )))
    }
  }

  pub fn year(&self) -> i32 {
    self.0
  }

  /// Inclusive lower bound of the partition.
  pub fn start(&self) -> NaiveDate {
    first_of_year(self.0)
  }

  /// Exclusive upper bound of the partition.
  pub fn end(&self) -> NaiveDate {
    first_of_year(self.0 + 1)
  }
}

fn first_of_year(year: i32) -> NaiveDate {
  // Years are range-checked on construction so January 1st always exists.
  NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN)
}

impl fmt::Display for PartitionKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:04}", self.0)
  }
}

impl FromStr for PartitionKey {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let s = s.trim();
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
      return Err(Error::InvalidPartition(format!("'{}' is not a year", s)));
    }
    let year = s
      .parse::<i32>()
      .map_err(|e| Error::InvalidPartition(format!("'{}': {}", s, e)))?;
    Self::new(year)
  }
}

impl TryFrom<String> for PartitionKey {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> {
    s.parse()
  }
}

impl From<PartitionKey> for String {
  fn from(key: PartitionKey) -> Self {
    key.to_string()
  }
}
