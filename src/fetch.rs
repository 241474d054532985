//! Offset pagination over the search endpoint.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::jira::api_types::{RawRecord, SearchRequest};
use crate::jira::client::SearchApi;

/// Fetch every record matched by the requests `template` builds.
///
/// Requests are issued strictly one after another starting at offset 0; the
/// offset advances by the number of records actually returned. The loop ends
/// once the offset reaches the server's `total` or a page comes back empty,
/// so a `total` that never shrinks cannot spin forever.
///
/// The first failure aborts the whole fetch and is returned wrapped in
/// [`Error::Pagination`] with the offset of the failed request. Cancelling
/// `cancel` aborts an in-flight request the same way with [`Error::Cancelled`].
/// Nothing is retried here.
pub async fn fetch_all<A, F>(
  api: &A,
  template: F,
  cancel: &CancellationToken,
) -> Result<Vec<RawRecord>>
where
  A: SearchApi + ?Sized,
  F: Fn(u64) -> SearchRequest,
{
  let mut offset = 0u64;
  let mut page_size = None;
  let mut collected = Vec::new();

  loop {
    let request = template(offset);
    let at = |source: Error| Error::Pagination {
      offset,
      source: Box::new(source),
    };

    if request.max_results == 0 {
      return Err(at(Error::Config("page size must be positive".to_string())));
    }
    match page_size {
      None => page_size = Some(request.max_results),
      Some(size) if size != request.max_results => {
        return Err(at(Error::Config(format!(
          "page size changed from {} to {} mid-fetch",
          size, request.max_results
        ))));
      }
      Some(_) => {}
    }

    let response = tokio::select! {
      biased;
      _ = cancel.cancelled() => Err(Error::Cancelled),
      response = api.search(&request) => response,
    }
    .map_err(at)?;

    let received = response.issues.len() as u64;
    debug!(offset, received, total = response.total, "fetched page");

    collected.extend(response.issues);
    offset += received;

    if offset >= response.total || received == 0 {
      break;
    }
  }

  Ok(collected)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::jira::api_types::SearchResponse;
  use async_trait::async_trait;
  use std::sync::Mutex;

  /// In-memory search endpoint serving `total` numbered issues.
  struct FakeSearch {
    total: u64,
    /// Server-side cap on page length, like Jira's maxResults ceiling
    cap: Option<usize>,
    /// Report this total instead of the real one
    claimed_total: Option<u64>,
    fail_at: Option<u64>,
    offsets: Mutex<Vec<u64>>,
  }

  impl FakeSearch {
    fn new(total: u64) -> Self {
      Self {
        total,
        cap: None,
        claimed_total: None,
        fail_at: None,
        offsets: Mutex::new(Vec::new()),
      }
    }

    fn offsets(&self) -> Vec<u64> {
      self.offsets.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl SearchApi for FakeSearch {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
      self.offsets.lock().unwrap().push(request.start_at);
      if self.fail_at == Some(request.start_at) {
        return Err(Error::Protocol("unexpected status code 503: busy".to_string()));
      }
      let mut len = request.max_results as usize;
      if let Some(cap) = self.cap {
        len = len.min(cap);
      }
      let issues = (request.start_at..self.total)
        .take(len)
        .map(|i| serde_json::from_value(serde_json::json!({ "key": format!("PROJ-{}", i) })).unwrap())
        .collect();
      Ok(SearchResponse {
        start_at: request.start_at,
        max_results: request.max_results as u64,
        total: self.claimed_total.unwrap_or(self.total),
        issues,
      })
    }
  }

  fn template(page_size: u32) -> impl Fn(u64) -> SearchRequest {
    move |offset| SearchRequest::new("assignee = \"me\"", offset, page_size, &[])
  }

  fn keys(records: &[RawRecord]) -> Vec<String> {
    records.iter().map(|r| r.key.clone()).collect()
  }

  #[tokio::test]
  async fn test_three_pages_for_250_records() {
    let api = FakeSearch::new(250);
    let records = fetch_all(&api, template(100), &CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(api.offsets(), vec![0, 100, 200]);
    assert_eq!(records.len(), 250);
    assert_eq!(records[0].key, "PROJ-0");
    assert_eq!(records[249].key, "PROJ-249");
  }

  #[tokio::test]
  async fn test_request_count_matches_page_math() {
    for page_size in 1..=7u32 {
      for total in 0..=20u64 {
        let api = FakeSearch::new(total);
        let records = fetch_all(&api, template(page_size), &CancellationToken::new())
          .await
          .unwrap();

        let expected_requests = total.div_ceil(page_size as u64).max(1);
        assert_eq!(api.offsets().len() as u64, expected_requests);
        let expected: Vec<String> = (0..total).map(|i| format!("PROJ-{}", i)).collect();
        assert_eq!(keys(&records), expected);
      }
    }
  }

  #[tokio::test]
  async fn test_empty_result_is_one_request() {
    let api = FakeSearch::new(0);
    let records = fetch_all(&api, template(100), &CancellationToken::new())
      .await
      .unwrap();
    assert!(records.is_empty());
    assert_eq!(api.offsets(), vec![0]);
  }

  #[tokio::test]
  async fn test_short_pages_advance_by_received_count() {
    let mut api = FakeSearch::new(10);
    api.cap = Some(4);
    let records = fetch_all(&api, template(100), &CancellationToken::new())
      .await
      .unwrap();
    assert_eq!(api.offsets(), vec![0, 4, 8]);
    assert_eq!(records.len(), 10);
  }

  #[tokio::test]
  async fn test_stops_on_empty_page_when_total_overstated() {
    let mut api = FakeSearch::new(5);
    api.claimed_total = Some(1_000);
    let records = fetch_all(&api, template(3), &CancellationToken::new())
      .await
      .unwrap();
    assert_eq!(api.offsets(), vec![0, 3, 5]);
    assert_eq!(records.len(), 5);
  }

  #[tokio::test]
  async fn test_failure_reports_offset() {
    let mut api = FakeSearch::new(250);
    api.fail_at = Some(100);
    let err = fetch_all(&api, template(100), &CancellationToken::new())
      .await
      .unwrap_err();

    match &err {
      Error::Pagination { offset, source } => {
        assert_eq!(*offset, 100);
        assert_eq!(source.kind(), "protocol");
      }
      other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(api.offsets(), vec![0, 100]);
  }

  #[tokio::test]
  async fn test_zero_page_size_rejected() {
    let api = FakeSearch::new(10);
    let err = fetch_all(&api, template(0), &CancellationToken::new())
      .await
      .unwrap_err();
    assert_eq!(err.kind(), "config");
    assert!(api.offsets().is_empty());
  }

  #[tokio::test]
  async fn test_page_size_change_rejected() {
    let api = FakeSearch::new(10);
    let shifting = |offset: u64| {
      let size = if offset == 0 { 4 } else { 5 };
      SearchRequest::new("assignee = \"me\"", offset, size, &[])
    };
    let err = fetch_all(&api, shifting, &CancellationToken::new())
      .await
      .unwrap_err();

    assert_eq!(err.kind(), "config");
    assert!(matches!(err, Error::Pagination { offset: 4, .. }));
    assert!(err.to_string().contains("page size changed from 4 to 5"));
    assert_eq!(api.offsets(), vec![0]);
  }

  struct HangingSearch;

  #[async_trait]
  impl SearchApi for HangingSearch {
    async fn search(&self, _request: &SearchRequest) -> Result<SearchResponse> {
      std::future::pending().await
    }
  }

  #[tokio::test]
  async fn test_cancellation_aborts_in_flight_request() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(std::time::Duration::from_millis(10)).await;
      trigger.cancel();
    });

    let err = fetch_all(&HangingSearch, template(100), &cancel)
      .await
      .unwrap_err();
    assert!(err.is_cancelled());
  }
}
