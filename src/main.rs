use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use feedintake::config::Config;
use feedintake::dispatch;
use feedintake::feed::{opml, FeedValidator, FetchWorker};
use feedintake::ingest::SubscriptionIngestor;
use feedintake::service::{ServiceError, SubscriptionService};
use feedintake::storage::{Database, DatabaseError};

/// Get the config directory path (~/.config/feedintake/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedintake"))
}

#[derive(Parser, Debug)]
#[command(name = "feedintake", about = "Manage feed subscriptions", version)]
struct Args {
    /// Config file (default: ~/.config/feedintake/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed, or to the single feed a web page advertises
    Add {
        url: String,
    },
    /// Import subscriptions from an OPML file
    Import {
        file: PathBuf,
        /// Print the import report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export subscriptions as OPML (to stdout unless --output is given)
    Export {
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// List subscriptions
    List,
    /// Unsubscribe by id (see `list`)
    Remove {
        id: i64,
    },
}

/// Create the config directory user-only if it does not exist yet.
fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }
    Ok(())
}

/// Read an OPML file named on the command line.
fn read_import_file(file: &Path) -> Result<Vec<u8>> {
    // SEC-008: Canonicalize to resolve symlinks before reading
    let canonical = file
        .canonicalize()
        .with_context(|| format!("Failed to resolve import file: {}", file.display()))?;

    let metadata = std::fs::metadata(&canonical)?;
    if !metadata.is_file() {
        anyhow::bail!("Import path must be a regular file");
    }

    std::fs::read(&canonical)
        .with_context(|| format!("Failed to read import file: {}", canonical.display()))
}

async fn run_command(service: &SubscriptionService<Database>, command: Command) -> Result<()> {
    match command {
        Command::Add { url } => match service.add_feed(&url).await {
            Ok((id, feed)) => {
                println!("[{}] {} <{}>", id, feed.title(), feed.canonical_url());
            }
            Err(ServiceError::Rejected(rejected)) => {
                anyhow::bail!("Could not subscribe to {}: {}", rejected.url(), rejected.reason());
            }
            Err(e) => return Err(e.into()),
        },
        Command::Import { file, json } => {
            let bytes = read_import_file(&file)?;
            let report = service.import_opml(&bytes).await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to render report")?
                );
            } else {
                for warning in &report.warnings {
                    eprintln!("Skipped {}", warning);
                }
                println!("{}", report.summary());
            }
        }
        Command::Export { output } => match output {
            Some(path) => {
                let subscriptions = service.list().await?;
                opml::export_to_file(subscriptions.iter().map(|s| &s.descriptor), &path)?;
                println!(
                    "Exported {} feeds to {}",
                    subscriptions.len(),
                    path.display()
                );
            }
            None => print!("{}", service.export_opml().await?),
        },
        Command::List => {
            for sub in service.list().await? {
                let status = match (&sub.error, sub.last_fetched) {
                    (Some(error), _)
                        if sub.consecutive_failures >= Database::CIRCUIT_BREAKER_THRESHOLD =>
                    {
                        format!("failing ({} in a row): {}", sub.consecutive_failures, error)
                    }
                    (Some(error), _) => format!("error: {}", error),
                    (None, Some(_)) => "ok".to_string(),
                    (None, None) => "never fetched".to_string(),
                };
                println!(
                    "[{}] {} <{}> {}",
                    sub.id,
                    sub.descriptor.title(),
                    sub.descriptor.canonical_url(),
                    status
                );
            }
        }
        Command::Remove { id } => {
            if service.remove(id).await? {
                println!("Removed subscription {}", id);
            } else {
                anyhow::bail!("No subscription with id {}", id);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config.database_path(&config_dir);
    if db_path.parent() == Some(config_dir.as_path()) {
        ensure_config_dir(&config_dir)?;
    }
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: The subscription database is in use by another process.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let validator =
        FeedValidator::new(config.validator_settings()).context("Failed to build HTTP client")?;

    // The fetch worker shares the validator's client so redirects get the
    // same URL policy
    let (queue, receiver) = dispatch::channel(config.dispatch.queue_capacity);
    let queue = queue.with_submit_timeout(config.submit_timeout());
    let worker = FetchWorker::new(db.clone(), validator.client().clone(), config.fetch_settings());
    let worker_handle = tokio::spawn(worker.run(receiver));

    let service = SubscriptionService::new(SubscriptionIngestor::new(validator), db, queue);
    let outcome = run_command(&service, args.command).await;

    // Dropping the last queue handle lets the worker finish its backlog and stop
    drop(service);
    match worker_handle.await {
        Ok(stats) if stats.jobs > 0 => {
            eprintln!(
                "Fetched {} feeds ({} failed)",
                stats.succeeded + stats.failed,
                stats.failed
            );
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Fetch worker panicked"),
    }

    outcome
}
