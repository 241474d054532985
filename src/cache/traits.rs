//! Core traits for the caching system.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::jira::api_types::RawRecord;
use crate::jira::partition::PartitionKey;

/// Backing store the cache reads through to on a miss.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
  /// Load the raw snapshot of one partition.
  ///
  /// Must fail with `Error::NotFound` when the partition has no snapshot.
  async fn load(&self, partition: PartitionKey) -> Result<Vec<RawRecord>>;

  /// Enumerate partitions that have a snapshot.
  async fn partitions(&self) -> Result<BTreeSet<PartitionKey>>;
}
