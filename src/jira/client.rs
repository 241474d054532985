use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use url::Url;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::jira::api_types::{SearchRequest, SearchResponse};

const SEARCH_PATH: &str = "/rest/api/2/search";
/// Longest response body excerpt carried in a status error
const ERROR_BODY_LIMIT: usize = 512;

/// The remote search capability the fetcher drives.
///
/// Implementations must be safe to share across concurrent partition fetches.
#[async_trait]
pub trait SearchApi: Send + Sync {
  async fn search(&self, request: &SearchRequest) -> Result<SearchResponse>;
}

/// Jira REST client for the issue search endpoint
#[derive(Clone)]
pub struct JiraClient {
  http: reqwest::Client,
  search_url: Url,
  token: String,
}

impl JiraClient {
  pub fn new(config: &Config) -> color_eyre::Result<Self> {
    let token = Config::get_api_token()?;
    let base_url = config.require_base_url()?;
    Ok(Self::with_token(
      base_url,
      token,
      Duration::from_secs(config.jira.request_timeout_secs),
    )?)
  }

  /// Build a client for `base_url`, keeping any context path
  /// (`https://host/jira` searches `https://host/jira/rest/api/2/search`).
  pub fn with_token(base_url: &str, token: String, timeout: Duration) -> Result<Self> {
    let base = Url::parse(base_url.trim())
      .map_err(|e| Error::Config(format!("invalid Jira base URL '{}': {}", base_url, e)))?;
    let search_url = Url::parse(&format!(
      "{}{}",
      base.as_str().trim_end_matches('/'),
      SEARCH_PATH
    ))
    .map_err(|e| Error::Config(format!("invalid Jira base URL '{}': {}", base_url, e)))?;

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

    Ok(Self {
      http,
      search_url,
      token,
    })
  }

  #[cfg(test)]
  pub fn search_url(&self) -> &Url {
    &self.search_url
  }
}

#[async_trait]
impl SearchApi for JiraClient {
  async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
    let response = self
      .http
      .post(self.search_url.clone())
      .bearer_auth(&self.token)
      .header(ACCEPT, "application/json")
      .json(request)
      .send()
      .await?;

    let status = response.status();
    let body = response.bytes().await?;

    if status != StatusCode::OK {
      let text = String::from_utf8_lossy(&body);
      let excerpt: String = text.chars().take(ERROR_BODY_LIMIT).collect();
      return Err(Error::Protocol(format!(
        "unexpected status code {}: {}",
        status.as_u16(),
        excerpt
      )));
    }

    serde_json::from_slice(&body)
      .map_err(|e| Error::Protocol(format!("malformed response body: {}", e)))
  }
}
