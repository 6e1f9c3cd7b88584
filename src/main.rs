use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shellcache::cache::{CacheStorage, NoopStorage, ResourceKey, SqliteStorage};
use shellcache::config::{Config, StorageKind};
use shellcache::net::{Destination, HttpFetcher, Request};
use shellcache::policy::{Intercepted, InterceptionPolicy};
use shellcache::CacheError;

/// Maximum number of requests intercepted at once by `fetch`
const MAX_CONCURRENT_REQUESTS: usize = 8;

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline-first resource cache for web app shells")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./shellcache.yaml or $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Open the current store and seed it with the manifest
  Activate {
    /// Exit successfully even if some manifest entries could not be seeded
    #[arg(long)]
    allow_partial: bool,
  },
  /// Request resources through the interception policy
  Fetch {
    /// URLs or paths relative to the configured origin
    #[arg(required = true)]
    urls: Vec<String>,
    /// Request destination (document, script, style, image, ...)
    #[arg(short, long, default_value = "empty")]
    dest: Destination,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Write response bodies to stdout instead of a summary
    #[arg(long)]
    body_only: bool,
  },
  /// List keys in the current store
  Keys,
  /// List all stores in the database
  Stores,
  /// Delete older generations of the current store
  Prune,
}

/// Initialize the tracing subscriber for logging.
///
/// RUST_LOG controls the level (default: warn).
fn init_tracing(log_file: Option<&Path>) -> Result<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  let (writer, guard) = match log_file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name))
    }
    None => tracing_appender::non_blocking(io::stderr()),
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(writer).with_ansi(log_file.is_none()))
    .with(filter)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.log_file.as_deref())?;

  let config = Config::load(args.config.as_deref())?;
  let policy_config = config.policy_config()?;
  let fetcher = HttpFetcher::new(config.origin.clone(), config.request_timeout())?;

  match config.storage {
    StorageKind::Sqlite => {
      let path = config.database_path()?;
      info!(database = %path.display(), "opening cache database");
      let storage = SqliteStorage::open_at(&path)?;
      run(InterceptionPolicy::new(policy_config, storage, fetcher), args.command).await
    }
    StorageKind::None => {
      run(InterceptionPolicy::new(policy_config, NoopStorage, fetcher), args.command).await
    }
  }
}

async fn run<S: CacheStorage + 'static>(
  policy: InterceptionPolicy<S, HttpFetcher>,
  command: Command,
) -> Result<()> {
  let store = policy.config().store.clone();

  match command {
    Command::Activate { allow_partial } => match policy.on_activate().await {
      Ok(report) => {
        println!(
          "{}: seeded {} resources ({} bytes)",
          report.seed.store,
          report.seed.seeded.len(),
          report.seed.bytes
        );
        for name in report.pruned {
          println!("pruned {}", name);
        }
        Ok(())
      }
      Err(e @ CacheError::SeedFetchFailed { .. }) if allow_partial => {
        warn!(error = %e, "continuing with a partially seeded store");
        eprintln!("warning: {}", e);
        Ok(())
      }
      Err(e) => Err(e.into()),
    },

    Command::Fetch {
      urls,
      dest,
      method,
      body_only,
    } => {
      let origin = &policy.config().origin;
      let requests = urls
        .iter()
        .map(|raw| {
          let (url, _) = ResourceKey::resolve(origin, raw)?;
          Ok(Request::get(url).with_method(&method).with_destination(dest))
        })
        .collect::<shellcache::Result<Vec<Request>>>()?;

      let results: Vec<Intercepted> = stream::iter(requests.iter())
        .map(|request| policy.on_intercept(request))
        .buffered(MAX_CONCURRENT_REQUESTS)
        .collect()
        .await;

      // Let background store writes land before the process exits
      policy.flush().await;

      if body_only {
        let mut out = io::stdout().lock();
        for result in &results {
          out.write_all(&result.response.body)?;
        }
        out.flush()?;
      } else {
        for (request, result) in requests.iter().zip(&results) {
          println!(
            "{} {}\t{}\t{} bytes\t{}",
            result.response.status,
            result.response.status_text,
            result.outcome.as_str(),
            result.response.body.len(),
            request.url
          );
        }
      }
      Ok(())
    }

    Command::Keys => {
      let handle = policy.manager().open_store(&store)?;
      for key in handle.keys()? {
        if let Some(snapshot) = handle.get(&key)? {
          println!(
            "{}\t{}\t{}\t{}\t{}",
            snapshot.status,
            snapshot.body.len(),
            &snapshot.digest()[..12],
            snapshot.cached_at.format("%Y-%m-%d %H:%M:%S"),
            key
          );
        }
      }
      Ok(())
    }

    Command::Stores => {
      for name in policy.manager().store_names()? {
        let marker = if name == store {
          "current"
        } else if name.is_sibling_of(&store) {
          "orphaned"
        } else {
          ""
        };
        println!("{}\t{}", name, marker);
      }
      Ok(())
    }

    Command::Prune => {
      let pruned = policy.manager().prune_except(&store)?;
      if pruned.is_empty() {
        println!("nothing to prune");
      }
      for name in pruned {
        println!("pruned {}", name);
      }
      Ok(())
    }
  }
}
