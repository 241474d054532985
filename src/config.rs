use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::jira::api_types::DEFAULT_FIELDS;

/// Application configuration.
///
/// Non-secret settings come from an optional YAML file and can be overridden
/// by environment variables. The API token is only ever read from the
/// environment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub jira: JiraConfig,
  pub output: OutputConfig,
  pub server: ServerConfig,
  /// Directory for a daily-rotated log file in addition to stderr
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
  /// Base URL of the Jira server, e.g. `https://jira.example.com`
  pub url: Option<String>,
  /// Owner whose issues are fetched (matched against `assignee`)
  pub username: Option<String>,
  pub page_size: u32,
  pub fields: Vec<String>,
  pub request_timeout_secs: u64,
}

impl Default for JiraConfig {
  fn default() -> Self {
    Self {
      url: None,
      username: None,
      page_size: 100,
      fields: DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
      request_timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
  /// Raw snapshots (`jira_<year>.json`)
  pub raw_dir: PathBuf,
  /// Formatted output (`<year>.json`)
  pub formatted_dir: PathBuf,
}

impl Default for OutputConfig {
  fn default() -> Self {
    Self {
      raw_dir: PathBuf::from("output/raw"),
      formatted_dir: PathBuf::from("output/data"),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub port: u16,
  /// Snapshot directory served by the API (defaults to the raw output dir)
  pub data_path: Option<PathBuf>,
  /// `*` allows any origin
  pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      port: 8080,
      data_path: None,
      allowed_origins: vec!["*".to_string()],
    }
  }
}

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./jsnap.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/jsnap/config.yaml
  ///
  /// Without a file every setting starts from its default. A `.env` file in
  /// the working directory is loaded into the environment first, so the
  /// overrides and the API token can come from there.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    Self::load_env_file(Path::new(".env"))?;

    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("jsnap.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("jsnap").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  /// Variables already present in the environment win over the file. A
  /// missing file is not an error.
  fn load_env_file(path: &Path) -> Result<()> {
    match dotenvy::from_path(path) {
      Ok(()) => Ok(()),
      Err(e) if e.not_found() => Ok(()),
      Err(e) => Err(eyre!("Failed to load {}: {}", path.display(), e)),
    }
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Apply environment overrides. Empty values count as unset.
  fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = get("JIRA_BASE_URL") {
      self.jira.url = Some(url);
    }
    if let Some(username) = get("JIRA_USERNAME") {
      self.jira.username = Some(username);
    }
    if let Some(dir) = get("JIRA_RAW_OUTPUT_DIR") {
      self.output.raw_dir = PathBuf::from(dir);
    }
    if let Some(dir) = get("JIRA_OUTPUT_DIR") {
      self.output.formatted_dir = PathBuf::from(dir);
    }
    if let Some(port) = get("PORT") {
      self.server.port = port
        .trim()
        .parse()
        .map_err(|e| eyre!("Invalid PORT '{}': {}", port, e))?;
    }
    if let Some(path) = get("DATA_PATH") {
      self.server.data_path = Some(PathBuf::from(path));
    }
    if let Some(origins) = get("ALLOWED_ORIGINS") {
      self.server.allowed_origins = origins
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(String::from)
        .collect();
    }
    if let Some(dir) = get("JSNAP_LOG_DIR") {
      self.log_dir = Some(PathBuf::from(dir));
    }

    Ok(())
  }

  pub fn require_base_url(&self) -> Result<&str> {
    self
      .jira
      .url
      .as_deref()
      .ok_or_else(|| eyre!("Jira base URL not set. Set jira.url in the config file or JIRA_BASE_URL."))
  }

  pub fn require_username(&self) -> Result<&str> {
    self.jira.username.as_deref().ok_or_else(|| {
      eyre!("Jira username not set. Set jira.username in the config file or JIRA_USERNAME.")
    })
  }

  /// Directory the server reads snapshots from.
  pub fn data_dir(&self) -> &Path {
    self
      .server
      .data_path
      .as_deref()
      .unwrap_or(&self.output.raw_dir)
  }

  /// Get the Jira API token from environment variables.
  ///
  /// Checks JSNAP_JIRA_TOKEN first, then JIRA_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("JSNAP_JIRA_TOKEN")
      .or_else(|_| std::env::var("JIRA_API_TOKEN"))
      .map_err(|_| {
        eyre!(
          "Jira API token not found. Set JSNAP_JIRA_TOKEN or JIRA_API_TOKEN environment variable."
        )
      })
  }
}
