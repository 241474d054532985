//! Error taxonomy for the fetch, snapshot and cache paths.
//!
//! Application startup uses `color_eyre` like the rest of the binary; these
//! typed errors exist where callers need to branch on the failure (a missing
//! snapshot is a 404, a broken one is a 500) or share it between waiters.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::jira::partition::PartitionKey;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the retrieval, persistence and cache layers.
///
/// The enum is `Clone` so a single in-flight cache load can hand the same
/// outcome to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum Error {
  #[error("configuration error: {0}")]
  Config(String),
  #[error("invalid partition key: {0}")]
  InvalidPartition(String),
  #[error("transport error: {0}")]
  Transport(String),
  #[error("protocol error: {0}")]
  Protocol(String),
  #[error("serialization error: {0}")]
  Serialization(#[source] Arc<serde_json::Error>),
  #[error("io error at {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: Arc<io::Error>,
  },
  #[error("no snapshot for partition {partition}")]
  NotFound { partition: PartitionKey },
  #[error("operation cancelled")]
  Cancelled,
  #[error("pagination failed at offset {offset}: {source}")]
  Pagination {
    offset: u64,
    #[source]
    source: Box<Error>,
  },
  #[error("partition {partition}: {source}")]
  Partition {
    partition: PartitionKey,
    #[source]
    source: Box<Error>,
  },
}

impl Error {
  pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source: Arc::new(source),
    }
  }

  /// Wrap this error with the partition it occurred in.
  pub fn in_partition(self, partition: PartitionKey) -> Self {
    Self::Partition {
      partition,
      source: Box::new(self),
    }
  }

  /// The innermost error, with pagination/partition context stripped.
  pub fn root(&self) -> &Error {
    match self {
      Self::Pagination { source, .. } | Self::Partition { source, .. } => source.root(),
      other => other,
    }
  }

  /// Stable machine-readable name, used as `errorKind` by the HTTP layer.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Config(_) => "config",
      Self::InvalidPartition(_) => "invalid_partition",
      Self::Transport(_) => "transport",
      Self::Protocol(_) => "protocol",
      Self::Serialization(_) => "serialization",
      Self::Io { .. } => "io",
      Self::NotFound { .. } => "not_found",
      Self::Cancelled => "cancelled",
      Self::Pagination { source, .. } | Self::Partition { source, .. } => source.kind(),
    }
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self.root(), Self::NotFound { .. })
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self.root(), Self::Cancelled)
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self {
    Self::Serialization(Arc::new(e))
  }
}

impl From<reqwest::Error> for Error {
  fn from(e: reqwest::Error) -> Self {
    if e.is_decode() {
      Self::Protocol(format!("malformed response body: {}", e))
    } else {
      Self::Transport(e.to_string())
    }
  }
}
