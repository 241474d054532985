//! Per-partition fetch → persist → project runs.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::SnapshotStore;
use crate::error::{Error, Result};
use crate::fetch::fetch_all;
use crate::jira::api_types::{RawRecord, SearchRequest};
use crate::jira::client::SearchApi;
use crate::jira::partition::PartitionKey;
use crate::jira::query::build_partition_filter;
use crate::jira::types::project;

/// Outcome of a multi-partition run. Failures never stop other partitions.
#[derive(Debug, Default)]
pub struct RunSummary {
  /// Partitions written, with their record counts, in ascending order
  pub succeeded: Vec<(PartitionKey, usize)>,
  pub failed: Vec<(PartitionKey, Error)>,
}

impl RunSummary {
  fn from_results(mut results: Vec<(PartitionKey, Result<usize>)>) -> Self {
    results.sort_by_key(|(partition, _)| *partition);
    let mut summary = RunSummary::default();
    for (partition, result) in results {
      match result {
        Ok(count) => summary.succeeded.push((partition, count)),
        Err(e) => summary.failed.push((partition, e)),
      }
    }
    summary
  }

  pub fn is_success(&self) -> bool {
    self.failed.is_empty()
  }
}

/// Fetches partitions of one owner's issues and writes raw and formatted
/// snapshots for each.
pub struct Pipeline<A: SearchApi + ?Sized> {
  api: Arc<A>,
  raw: SnapshotStore,
  formatted: SnapshotStore,
  identity: String,
  page_size: u32,
  fields: Vec<String>,
}

impl<A: SearchApi + ?Sized> Pipeline<A> {
  pub fn new(
    api: Arc<A>,
    raw: SnapshotStore,
    formatted: SnapshotStore,
    identity: impl Into<String>,
  ) -> Self {
    Self {
      api,
      raw,
      formatted,
      identity: identity.into(),
      page_size: 100,
      fields: Vec::new(),
    }
  }

  pub fn with_page_size(mut self, page_size: u32) -> Self {
    self.page_size = page_size;
    self
  }

  pub fn with_fields(mut self, fields: Vec<String>) -> Self {
    self.fields = fields;
    self
  }

  /// Fetch one partition and write its raw and formatted snapshots.
  ///
  /// Fetch, cancellation and encoding failures abort before anything is
  /// written, so the previous snapshots are left as they were. Both bodies
  /// are encoded before either is committed; only a filesystem error on the
  /// formatted write can leave a new raw snapshot next to a stale formatted
  /// one, and that is reported as a failure of the partition.
  pub async fn fetch_partition(
    &self,
    partition: PartitionKey,
    cancel: &CancellationToken,
  ) -> Result<usize> {
    self
      .fetch_partition_inner(partition, cancel)
      .await
      .map_err(|e| failed(e.in_partition(partition), partition))
  }

  async fn fetch_partition_inner(
    &self,
    partition: PartitionKey,
    cancel: &CancellationToken,
  ) -> Result<usize> {
    info!(%partition, "processing partition");

    let jql = build_partition_filter(partition, &self.identity);
    let template =
      |offset| SearchRequest::new(jql.as_str(), offset, self.page_size, &self.fields);
    let records = fetch_all(self.api.as_ref(), template, cancel).await?;

    let raw = SnapshotStore::encode(&records)?;
    let formatted = SnapshotStore::encode(&project(&records))?;

    if cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    self.raw.commit(partition, raw).await?;
    self.formatted.commit(partition, formatted).await?;

    info!(%partition, count = records.len(), "partition complete");
    Ok(records.len())
  }

  /// Fetch `partitions` with at most `concurrency` in flight at once.
  pub async fn run(
    &self,
    partitions: &[PartitionKey],
    concurrency: usize,
    cancel: &CancellationToken,
  ) -> RunSummary {
    let results = stream::iter(partitions.iter().copied())
      .map(|partition| async move { (partition, self.fetch_partition(partition, cancel).await) })
      .buffer_unordered(concurrency.max(1))
      .collect::<Vec<_>>()
      .await;

    RunSummary::from_results(results)
  }
}

fn failed(e: Error, partition: PartitionKey) -> Error {
  warn!(%partition, error = %e, "partition failed, continuing");
  e
}

async fn write_projection(
  formatted: &SnapshotStore,
  partition: PartitionKey,
  records: &[RawRecord],
) -> Result<usize> {
  let projected = project(records);
  formatted.write(partition, &projected).await?;
  Ok(projected.len())
}

/// Rebuild the formatted snapshot of `partition` from its raw snapshot.
pub async fn format_partition(
  raw: &SnapshotStore,
  formatted: &SnapshotStore,
  partition: PartitionKey,
) -> Result<usize> {
  let records: Vec<RawRecord> = raw
    .read(partition)
    .await
    .map_err(|e| failed(e.in_partition(partition), partition))?;
  write_projection(formatted, partition, &records)
    .await
    .map_err(|e| failed(e.in_partition(partition), partition))
}

/// Rebuild formatted snapshots for `partitions`, or for every raw snapshot
/// when `None`.
pub async fn format_partitions(
  raw: &SnapshotStore,
  formatted: &SnapshotStore,
  partitions: Option<&[PartitionKey]>,
) -> Result<RunSummary> {
  let partitions: Vec<PartitionKey> = match partitions {
    Some(p) => p.to_vec(),
    None => raw.list().await?.into_iter().collect(),
  };

  let mut results = Vec::with_capacity(partitions.len());
  for partition in partitions {
    results.push((partition, format_partition(raw, formatted, partition).await));
  }
  Ok(RunSummary::from_results(results))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::jira::api_types::SearchResponse;
  use crate::jira::types::ProjectedRecord;
  use async_trait::async_trait;
  use serde_json::json;
  use std::sync::Mutex;
  use tempfile::tempdir;
  use tracing::instrument::WithSubscriber;

  /// Serves `per_year` issues for every year except `broken`.
  struct YearlySearch {
    per_year: u64,
    broken: Option<i32>,
    requests: Mutex<Vec<SearchRequest>>,
  }

  impl YearlySearch {
    fn new(per_year: u64) -> Self {
      Self {
        per_year,
        broken: None,
        requests: Mutex::new(Vec::new()),
      }
    }
  }

  #[async_trait]
  impl SearchApi for YearlySearch {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
      self.requests.lock().unwrap().push(request.clone());
      let year: i32 = request.jql[request.jql.find(">= ").unwrap() + 3..][..4]
        .parse()
        .unwrap();
      if self.broken == Some(year) {
        return Err(Error::Transport("connection reset".to_string()));
      }
      let issues = (request.start_at..self.per_year)
        .take(request.max_results as usize)
        .map(|i| {
          serde_json::from_value(json!({
            "key": format!("Y{}-{}", year, i),
            "fields": {
              "summary": format!("{} #{}", year, i),
              "created": format!("{}-06-01T00:00:00.000+0000", year),
              "description": "body"
            }
          }))
          .unwrap()
        })
        .collect();
      Ok(SearchResponse {
        start_at: request.start_at,
        max_results: request.max_results as u64,
        total: self.per_year,
        issues,
      })
    }
  }

  fn year(y: i32) -> PartitionKey {
    PartitionKey::new(y).unwrap()
  }

  fn stores(root: &std::path::Path) -> (SnapshotStore, SnapshotStore) {
    (
      SnapshotStore::raw(root.join("raw")),
      SnapshotStore::formatted(root.join("data")),
    )
  }

  #[tokio::test]
  async fn test_run_writes_raw_and_formatted() {
    let dir = tempdir().unwrap();
    let (raw, formatted) = stores(dir.path());
    let api = Arc::new(YearlySearch::new(5));
    let pipeline = Pipeline::new(api.clone(), raw.clone(), formatted.clone(), "jdoe")
      .with_page_size(2)
      .with_fields(vec!["summary".to_string()]);

    let summary = pipeline
      .run(&[year(2024), year(2023)], 2, &CancellationToken::new())
      .await;

    assert!(summary.is_success());
    assert_eq!(summary.succeeded, vec![(year(2023), 5), (year(2024), 5)]);

    let raw_2024: Vec<RawRecord> = raw.read(year(2024)).await.unwrap();
    assert_eq!(raw_2024.len(), 5);
    assert_eq!(raw_2024[0].key, "Y2024-0");

    let formatted_2023: Vec<ProjectedRecord> = formatted.read(year(2023)).await.unwrap();
    assert_eq!(formatted_2023[4].summary, "2023 #4");
    assert_eq!(formatted_2023[4].description, "body");

    let requests = api.requests.lock().unwrap();
    assert_eq!(requests.len(), 6);
    assert!(requests.iter().all(|r| r.max_results == 2 && r.fields == vec!["summary"]));
    assert!(requests.iter().all(|r| r.jql.starts_with("assignee = \"jdoe\"")));
  }

  #[tokio::test]
  async fn test_failed_partition_is_isolated() {
    let dir = tempdir().unwrap();
    let (raw, formatted) = stores(dir.path());
    let mut api = YearlySearch::new(3);
    api.broken = Some(2024);
    let pipeline = Pipeline::new(Arc::new(api), raw.clone(), formatted, "jdoe");

    let summary = pipeline
      .run(&[year(2023), year(2024), year(2025)], 1, &CancellationToken::new())
      .await;

    assert_eq!(summary.succeeded, vec![(year(2023), 3), (year(2025), 3)]);
    assert_eq!(summary.failed.len(), 1);
    let (partition, err) = &summary.failed[0];
    assert_eq!(*partition, year(2024));
    assert_eq!(err.kind(), "transport");
    assert!(err.to_string().starts_with("partition 2024: pagination failed at offset 0"));

    assert!(raw.read::<RawRecord>(year(2024)).await.unwrap_err().is_not_found());
    assert_eq!(raw.list().await.unwrap().len(), 2);
  }

  #[derive(Clone, Default)]
  struct Captured(Arc<Mutex<Vec<u8>>>);

  impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  #[tokio::test]
  async fn test_failure_logged_before_next_partition_starts() {
    let dir = tempdir().unwrap();
    let (raw, formatted) = stores(dir.path());
    let mut api = YearlySearch::new(2);
    api.broken = Some(2024);
    let pipeline = Pipeline::new(Arc::new(api), raw, formatted, "jdoe");

    let logs = Captured::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
      .with_writer(move || writer.clone())
      .with_ansi(false)
      .finish();

    let summary = pipeline
      .run(&[year(2023), year(2024), year(2025)], 1, &CancellationToken::new())
      .with_subscriber(subscriber)
      .await;
    assert_eq!(summary.failed.len(), 1);

    let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    let failed_at = text.find("partition failed").expect("failure logged");
    let next_at = text
      .find("processing partition partition=2025")
      .expect("2025 started");
    assert!(failed_at < next_at, "{text}");
    assert!(text[failed_at..].contains("partition=2024"));
  }

  #[tokio::test]
  async fn test_formatted_write_failure_keeps_new_raw_snapshot() {
    let dir = tempdir().unwrap();
    let raw = SnapshotStore::raw(dir.path().join("raw"));
    // A plain file where the formatted directory should be.
    std::fs::write(dir.path().join("data"), "").unwrap();
    let formatted = SnapshotStore::formatted(dir.path().join("data"));
    let pipeline = Pipeline::new(Arc::new(YearlySearch::new(2)), raw.clone(), formatted, "jdoe");

    let err = pipeline
      .fetch_partition(year(2024), &CancellationToken::new())
      .await
      .unwrap_err();

    assert_eq!(err.kind(), "io");
    assert!(err.to_string().starts_with("partition 2024:"));
    let committed: Vec<RawRecord> = raw.read(year(2024)).await.unwrap();
    assert_eq!(committed.len(), 2);
  }

  #[tokio::test]
  async fn test_cancelled_run_writes_nothing() {
    let dir = tempdir().unwrap();
    let (raw, formatted) = stores(dir.path());
    let pipeline = Pipeline::new(Arc::new(YearlySearch::new(3)), raw.clone(), formatted, "jdoe");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = pipeline.run(&[year(2024)], 4, &cancel).await;

    assert!(summary.succeeded.is_empty());
    assert!(summary.failed[0].1.is_cancelled());
    assert!(raw.list().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_format_partitions_from_raw() {
    let dir = tempdir().unwrap();
    let (raw, formatted) = stores(dir.path());
    let records: Vec<RawRecord> = vec![
      serde_json::from_value(json!({ "key": "A-1", "fields": { "summary": "one" } })).unwrap(),
      serde_json::from_value(json!({ "key": "A-2", "fields": { "created": "2022-02-02" } })).unwrap(),
    ];
    raw.write(year(2022), &records).await.unwrap();
    std::fs::write(raw.path_for(year(2021)), "{").unwrap();

    let summary = format_partitions(&raw, &formatted, None).await.unwrap();
    assert_eq!(summary.succeeded, vec![(year(2022), 2)]);
    assert_eq!(summary.failed[0].0, year(2021));
    assert_eq!(summary.failed[0].1.kind(), "serialization");

    let out: Vec<ProjectedRecord> = formatted.read(year(2022)).await.unwrap();
    assert_eq!(out[0].summary, "one");
    assert_eq!(out[1].summary, "");
    assert_eq!(out[1].created, "2022-02-02");

    let missing = format_partitions(&raw, &formatted, Some(&[year(2030)][..]))
      .await
      .unwrap();
    assert!(missing.failed[0].1.is_not_found());
  }
}
