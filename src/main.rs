use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};

use gleaner::config::Config;
use gleaner::feed::{load_jobs, Fetcher};
use gleaner::session::{Session, Slot};
use gleaner::storage::SnapshotStore;
use gleaner::util::truncate_to_width;

/// Display width of a feed title in the summary.
const TITLE_WIDTH: usize = 60;

/// Get the config directory path (~/.config/gleaner/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("gleaner"))
}

/// Get the snapshot directory path (~/.cache/gleaner/)
fn get_cache_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".cache").join("gleaner"))
}

/// Creates `dir` if needed and restricts it to the current user.
fn ensure_private_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(dir, perms) {
                    tracing::warn!(
                        path = %dir.display(),
                        error = %e,
                        "Failed to set directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to read directory metadata");
            }
        }
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "gleaner", version, about = "Fetch RSS/Atom feeds and track what you have read")]
struct Args {
    /// Config file (default: ~/.config/gleaner/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subscription list (default: ~/.config/gleaner/urls)
    #[arg(long, value_name = "FILE")]
    urls: Option<PathBuf>,

    /// Snapshot directory (default: ~/.cache/gleaner)
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Mark every fetched item read before saving
    #[arg(long)]
    mark_all_read: bool,

    /// Leave snapshots untouched
    #[arg(long)]
    no_save: bool,
}

fn print_summary(session: &Session) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for slot in session.slots() {
        match slot {
            Slot::Loaded(feed) => writeln!(
                out,
                "({}/{}) {}",
                feed.unread_count(),
                feed.len(),
                truncate_to_width(feed.title(), TITLE_WIDTH)
            )?,
            Slot::Failed { url, error } => writeln!(out, "! {}: {}", url, error)?,
            Slot::Pending { url } => writeln!(out, "- {}: not fetched", url)?,
        }
    }
    writeln!(out, "{} unread", session.unread_total())?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so the summary on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => get_config_dir()?.join("config.toml"),
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let urls_path = match args.urls.or_else(|| config.urls_file.clone()) {
        Some(path) => path,
        None => get_config_dir()?.join("urls"),
    };
    let cache_dir = match args.cache_dir.or_else(|| config.cache_dir.clone()) {
        Some(dir) => dir,
        None => get_cache_dir()?,
    };

    let jobs = load_jobs(&urls_path)
        .await
        .context("Failed to load subscriptions")?;
    if jobs.is_empty() {
        eprintln!("Error: No subscriptions found in {}", urls_path.display());
        eprintln!();
        eprintln!("Add one feed per line, for example:");
        eprintln!("  https://example.com/feed.xml \"Example\"");
        eprintln!("  filter:json2rss:https://example.com/api.json");
        std::process::exit(1);
    }

    ensure_private_dir(&cache_dir)?;
    let store = SnapshotStore::new(&cache_dir);
    let fetcher =
        Fetcher::from_config(&config, store.clone()).context("Failed to create HTTP client")?;

    let mut session = Session::new(&jobs);
    let mut run = fetcher.spawn_all(jobs);
    tracing::info!(feeds = run.total(), "Fetching feeds");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            result = run.next() => match result {
                Some(result) => session.place(result),
                None => break,
            },
            _ = &mut ctrl_c, if !interrupted => {
                tracing::info!(pending = session.pending(), "Interrupted, cancelling outstanding fetches");
                run.cancel();
                interrupted = true;
            }
        }
    }

    print_summary(&session)?;

    if args.mark_all_read {
        session.mark_all_read();
    }

    if args.no_save {
        tracing::info!("Snapshots left untouched (--no-save)");
        return Ok(());
    }

    let report = session.persist(&store).await;
    for (url, error) in &report.failed {
        eprintln!("Warning: failed to save snapshot for {}: {}", url, error);
    }

    Ok(())
}
