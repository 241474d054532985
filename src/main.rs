mod cache;
mod config;
mod error;
mod fetch;
mod jira;
mod logging;
mod pipeline;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{CacheStore, SnapshotStore};
use crate::jira::client::JiraClient;
use crate::jira::partition::PartitionKey;
use crate::jira::query::build_multi_partition_filter;
use crate::pipeline::{Pipeline, RunSummary};

#[derive(Parser, Debug)]
#[command(name = "jsnap")]
#[command(about = "Snapshot Jira issues by year and serve them from a file-backed cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./jsnap.yaml or $XDG_CONFIG_HOME/jsnap/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch issues for each year and write raw and formatted snapshots
  Fetch {
    /// Years to fetch (default: the current year)
    #[arg(short, long, value_delimiter = ',')]
    years: Vec<PartitionKey>,

    /// Number of years fetched in parallel
    #[arg(long, default_value_t = 2)]
    concurrency: usize,

    /// Issues requested per page (default: from config)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    page_size: Option<u32>,
  },
  /// Rebuild formatted snapshots from raw snapshots without contacting Jira
  Format {
    /// Years to format (default: every raw snapshot)
    #[arg(short, long, value_delimiter = ',')]
    years: Vec<PartitionKey>,
  },
  /// Print the search filter covering the given years
  Jql {
    /// Years to cover (default: no date restriction)
    #[arg(short, long, value_delimiter = ',')]
    years: Vec<PartitionKey>,
  },
  /// List years that have a raw snapshot
  Partitions,
  /// Serve snapshots over HTTP
  Serve {
    /// Port to listen on (default: from config)
    #[arg(short, long)]
    port: Option<u16>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(config.log_dir.as_deref());

  let raw = SnapshotStore::raw(&config.output.raw_dir);
  let formatted = SnapshotStore::formatted(&config.output.formatted_dir);

  match args.command {
    Command::Fetch {
      years,
      concurrency,
      page_size,
    } => {
      let identity = config.require_username()?.to_string();
      let client = Arc::new(JiraClient::new(&config)?);
      let page_size = page_size.unwrap_or(config.jira.page_size);
      let years = if years.is_empty() {
        vec![current_year()?]
      } else {
        years
      };

      let pipeline = Pipeline::new(client, raw, formatted, identity)
        .with_page_size(page_size)
        .with_fields(config.jira.fields.clone());

      let cancel = CancellationToken::new();
      let on_signal = cancel.clone();
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          warn!("interrupt received, cancelling fetch");
          on_signal.cancel();
        }
      });

      report(pipeline.run(&years, concurrency, &cancel).await)
    }
    Command::Format { years } => {
      let years = (!years.is_empty()).then_some(years.as_slice());
      report(pipeline::format_partitions(&raw, &formatted, years).await?)
    }
    Command::Jql { years } => {
      let identity = config.require_username()?;
      println!("{}", build_multi_partition_filter(&years, identity));
      Ok(())
    }
    Command::Partitions => {
      for partition in raw.list().await? {
        println!("{}", partition);
      }
      Ok(())
    }
    Command::Serve { port } => {
      let port = port.unwrap_or(config.server.port);
      let cache = CacheStore::new(SnapshotStore::raw(config.data_dir()));
      server::serve(cache, port, &config.server.allowed_origins).await?;
      Ok(())
    }
  }
}

fn current_year() -> Result<PartitionKey> {
  use chrono::Datelike;
  Ok(PartitionKey::new(chrono::Local::now().year())?)
}

fn report(summary: RunSummary) -> Result<()> {
  for (partition, count) in &summary.succeeded {
    info!(%partition, count, "saved");
  }
  if summary.is_success() {
    return Ok(());
  }
  let failed: Vec<String> = summary
    .failed
    .iter()
    .map(|(partition, _)| partition.to_string())
    .collect();
  Err(eyre!(
    "{} of {} partitions failed: {}",
    failed.len(),
    failed.len() + summary.succeeded.len(),
    failed.join(", ")
  ))
}
