//! File-backed snapshot storage: one pretty-printed JSON array per partition.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::traits::SnapshotSource;
use crate::error::{Error, Result};
use crate::jira::api_types::RawRecord;
use crate::jira::partition::PartitionKey;

const EXTENSION: &str = ".json";

/// A snapshot body serialized ahead of being committed to disk.
#[derive(Debug)]
pub struct Encoded {
  bytes: Vec<u8>,
  count: usize,
}

/// Directory of per-partition JSON snapshots named `<prefix><partition>.json`.
///
/// Writes go to a hidden temporary file in the same directory and are renamed
/// into place, so readers see either the previous snapshot or the new one.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
  dir: PathBuf,
  prefix: &'static str,
}

impl SnapshotStore {
  pub const RAW_PREFIX: &'static str = "jira_";

  /// Store for raw snapshots (`jira_2024.json`).
  pub fn raw(dir: impl Into<PathBuf>) -> Self {
    Self {
      dir: dir.into(),
      prefix: Self::RAW_PREFIX,
    }
  }

  /// Store for formatted output (`2024.json`).
  pub fn formatted(dir: impl Into<PathBuf>) -> Self {
    Self {
      dir: dir.into(),
      prefix: "",
    }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn path_for(&self, partition: PartitionKey) -> PathBuf {
    self
      .dir
      .join(format!("{}{}{}", self.prefix, partition, EXTENSION))
  }

  /// Pretty-print `records` as a snapshot body.
  pub fn encode<T: Serialize>(records: &[T]) -> Result<Encoded> {
    let mut bytes = serde_json::to_vec_pretty(records)?;
    bytes.push(b'\n');
    Ok(Encoded {
      bytes,
      count: records.len(),
    })
  }

  /// Serialize `records` and replace the partition's snapshot with them.
  pub async fn write<T: Serialize>(&self, partition: PartitionKey, records: &[T]) -> Result<PathBuf> {
    self.commit(partition, Self::encode(records)?).await
  }

  /// Replace the partition's snapshot with an already encoded body.
  pub async fn commit(&self, partition: PartitionKey, encoded: Encoded) -> Result<PathBuf> {
    let Encoded { bytes, count } = encoded;
    let path = self.path_for(partition);
    let target = path.clone();
    tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
      .await
      .map_err(|e| Error::io(&path, io::Error::other(e)))?
      .map_err(|e| Error::io(&path, e))?;

    info!(%partition, path = %path.display(), count, "snapshot saved");
    Ok(path)
  }

  /// Load a partition's snapshot.
  pub async fn read<T: DeserializeOwned>(&self, partition: PartitionKey) -> Result<Vec<T>> {
    let path = self.path_for(partition);
    let bytes = match tokio::fs::read(&path).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(Error::NotFound { partition });
      }
      Err(e) => return Err(Error::io(&path, e)),
    };

    let records: Vec<T> = serde_json::from_slice(&bytes)?;
    debug!(%partition, path = %path.display(), count = records.len(), "snapshot loaded");
    Ok(records)
  }

  /// Partitions with a snapshot on disk. A missing directory has none.
  pub async fn list(&self) -> Result<BTreeSet<PartitionKey>> {
    let mut entries = match tokio::fs::read_dir(&self.dir).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
      Err(e) => return Err(Error::io(&self.dir, e)),
    };

    let mut partitions = BTreeSet::new();
    while let Some(entry) = entries
      .next_entry()
      .await
      .map_err(|e| Error::io(&self.dir, e))?
    {
      let is_file = entry
        .file_type()
        .await
        .map(|t| t.is_file())
        .unwrap_or(false);
      if !is_file {
        continue;
      }
      if let Some(partition) = self.parse_file_name(&entry.file_name().to_string_lossy()) {
        partitions.insert(partition);
      }
    }

    Ok(partitions)
  }

  fn parse_file_name(&self, name: &str) -> Option<PartitionKey> {
    let stem = name.strip_prefix(self.prefix)?.strip_suffix(EXTENSION)?;
    let partition: PartitionKey = stem.parse().ok()?;
    // Only the canonical spelling maps back to the file we would write.
    (partition.to_string() == stem).then_some(partition)
  }
}

#[async_trait]
impl SnapshotSource for SnapshotStore {
  async fn load(&self, partition: PartitionKey) -> Result<Vec<RawRecord>> {
    self.read(partition).await
  }

  async fn partitions(&self) -> Result<BTreeSet<PartitionKey>> {
    self.list().await
  }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
  let dir = path
    .parent()
    .ok_or_else(|| io::Error::other("snapshot path has no parent directory"))?;
  std::fs::create_dir_all(dir)?;

  let file_name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  let mut tmp = tempfile::Builder::new()
    .prefix(&format!(".{}.", file_name))
    .suffix(".tmp")
    .tempfile_in(dir)?;
  tmp.write_all(bytes)?;
  tmp.as_file().sync_all()?;
  tmp.persist(path).map_err(|e| e.error)?;
  Ok(())
}
