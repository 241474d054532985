//! HTTP API serving cached partitions.

use std::net::SocketAddr;

use axum::{
  extract::{Path, State},
  http::{HeaderValue, Method, StatusCode},
  response::{IntoResponse, Json, Response},
  routing::{get, post},
  Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::cache::{CacheStore, Records, SnapshotStore};
use crate::error::Error;
use crate::jira::partition::PartitionKey;

#[derive(Clone)]
struct ApiState {
  cache: CacheStore<SnapshotStore>,
}

/// Successful lookup: one partition, or all of them when `partition_key` is
/// null.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuesResponse {
  pub partition_key: Option<PartitionKey>,
  pub total: usize,
  pub records: Records,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
  pub error_kind: String,
  pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PartitionsResponse {
  pub partitions: Vec<PartitionKey>,
}

struct ApiError(Error);

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match self.0.root() {
      Error::NotFound { .. } => StatusCode::NOT_FOUND,
      Error::InvalidPartition(_) => StatusCode::BAD_REQUEST,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
      error!(error = %self.0, "request failed");
    }
    let body = ErrorResponse {
      error_kind: self.0.kind().to_string(),
      message: self.0.to_string(),
    };
    (status, Json(body)).into_response()
  }
}

impl From<Error> for ApiError {
  fn from(e: Error) -> Self {
    Self(e)
  }
}

/// Look up one partition by its textual key.
pub async fn lookup(
  cache: &CacheStore<SnapshotStore>,
  key: &str,
) -> Result<IssuesResponse, Error> {
  let partition: PartitionKey = key.parse()?;
  let records = cache.get(partition).await?;
  Ok(IssuesResponse {
    partition_key: Some(partition),
    total: records.len(),
    records,
  })
}

/// Build the router over `cache`.
pub fn router(cache: CacheStore<SnapshotStore>, allowed_origins: &[String]) -> Router {
  Router::new()
    .route("/health", get(health_check))
    .route("/api/partitions", get(list_partitions))
    .route("/api/partitions/:key", get(get_partition))
    .route("/api/issues", get(get_all_issues))
    .route("/api/cache/clear", post(clear_cache))
    .with_state(ApiState { cache })
    .layer(TraceLayer::new_for_http())
    .layer(cors_layer(allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
  let base = CorsLayer::new()
    .allow_methods([Method::GET, Method::POST])
    .allow_headers(Any);

  if allowed_origins.iter().any(|o| o == "*") {
    return base.allow_origin(Any);
  }

  let origins: Vec<HeaderValue> = allowed_origins
    .iter()
    .filter_map(|origin| match HeaderValue::from_str(origin) {
      Ok(value) => Some(value),
      Err(_) => {
        warn!(%origin, "ignoring invalid allowed origin");
        None
      }
    })
    .collect();
  base.allow_origin(AllowOrigin::list(origins))
}

/// Serve until Ctrl-C.
pub async fn serve(
  cache: CacheStore<SnapshotStore>,
  port: u16,
  allowed_origins: &[String],
) -> std::io::Result<()> {
  let addr = SocketAddr::from(([0, 0, 0, 0], port));
  let listener = tokio::net::TcpListener::bind(addr).await?;
  info!(%addr, dir = %cache.source().dir().display(), "serving snapshots");

  axum::serve(listener, router(cache, allowed_origins))
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!("shutting down");
    })
    .await
}

async fn health_check() -> impl IntoResponse {
  Json(serde_json::json!({ "status": "ok" }))
}

async fn list_partitions(State(state): State<ApiState>) -> Result<Json<PartitionsResponse>, ApiError> {
  let partitions = state.cache.list_available_partitions().await?;
  Ok(Json(PartitionsResponse {
    partitions: partitions.into_iter().collect(),
  }))
}

async fn get_partition(
  State(state): State<ApiState>,
  Path(key): Path<String>,
) -> Result<Json<IssuesResponse>, ApiError> {
  Ok(Json(lookup(&state.cache, &key).await?))
}

async fn get_all_issues(State(state): State<ApiState>) -> Result<Json<IssuesResponse>, ApiError> {
  let records: Records = state.cache.get_all().await?.into();
  Ok(Json(IssuesResponse {
    partition_key: None,
    total: records.len(),
    records,
  }))
}

async fn clear_cache(State(state): State<ApiState>) -> StatusCode {
  state.cache.clear_all();
  StatusCode::NO_CONTENT
}
