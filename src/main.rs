use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use stories::cache::ContentCache;
use stories::carousel::SessionSignal;
use stories::config::Config;
use stories::events::StoriesEvent;
use stories::hub::{HubSignal, StoriesHub};
use stories::model::Company;
use stories::net::HttpNetwork;
use stories::reconcile::purge_cache;
use stories::storage::{Database, StorageError};
use stories::timeline::SystemClock;

type Hub = StoriesHub<HttpNetwork, Database>;

/// Get the config directory path (~/.config/stories/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("stories"))
}

#[derive(Parser, Debug)]
#[command(name = "stories", about = "Company stories: fetch, reconcile and play back")]
struct Args {
    /// Config file (default: ~/.config/stories/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Clear the stored story list before doing anything else
    #[arg(long)]
    reset_db: bool,

    /// Evict cached media that no stored story refers to
    #[arg(long)]
    purge_cache: bool,

    /// Fetch the feed, reconcile it with the stored list and save the result
    #[arg(long)]
    refresh: bool,

    /// Print the stored story list
    #[arg(long)]
    list: bool,

    /// Autoplay stories starting at the company with this list index
    #[arg(long, value_name = "INDEX")]
    play: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }

    // User-only access: the database holds what this device has watched
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    tracing::debug!(?config, "Loaded configuration");

    let db_path = config_dir.join("stories.db");
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StorageError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of stories appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    if args.reset_db {
        db.purge_all().await.context("Failed to reset database")?;
        println!("Database reset.");
    }

    let cache_dir = config
        .cache_dir
        .clone()
        .unwrap_or_else(|| config_dir.join("cache"));
    let cache = Arc::new(
        ContentCache::open(&cache_dir, config.memory_cache_entries)
            .await
            .with_context(|| format!("Failed to open media cache at {}", cache_dir.display()))?,
    );

    if args.purge_cache {
        let stored = db
            .load_companies()
            .await
            .context("Failed to load stored stories")?;
        let evicted = purge_cache(&stored, &cache).await;
        println!("Evicted {} cached files.", evicted);
    }

    let network = Arc::new(HttpNetwork::new(&config).context("Failed to build HTTP client")?);
    let (mut hub, mut event_rx) = StoriesHub::new(
        network,
        Arc::new(db),
        cache,
        &config,
        Arc::new(SystemClock),
    );

    if args.refresh {
        hub.load().await;
        wait_for_refresh(&mut hub, &mut event_rx).await?;
        if !hub.persist().await {
            anyhow::bail!("Failed to save refreshed stories");
        }
        println!("Refreshed: {} companies.", hub.companies().len());
    } else {
        hub.restore().await;
    }

    if args.list {
        print_list(hub.companies());
    }

    if let Some(index) = args.play {
        play(&mut hub, &mut event_rx, index).await?;
        hub.persist().await;
    }

    Ok(())
}

/// Apply events until the refresh lands and its cache purge finishes.
async fn wait_for_refresh(hub: &mut Hub, events: &mut mpsc::Receiver<StoriesEvent>) -> Result<()> {
    let mut refreshed = false;
    while let Some(event) = events.recv().await {
        let done = match &event {
            StoriesEvent::RefreshComplete { .. } => {
                refreshed = true;
                false
            }
            StoriesEvent::CachePurged { .. } => true,
            _ => false,
        };
        hub.handle_event(event);

        let failure = hub.take_signals().into_iter().find_map(|signal| match signal {
            HubSignal::RefreshFailed(error) => Some(error),
            HubSignal::ListUpdated => None,
        });
        if let Some(error) = failure {
            anyhow::bail!("Refresh failed: {}", error);
        }
        if refreshed && done {
            return Ok(());
        }
    }
    anyhow::bail!("Event channel closed before the refresh finished")
}

fn print_list(companies: &[Company]) {
    if companies.is_empty() {
        println!("No stories stored. Run with --refresh first.");
        return;
    }
    for (index, company) in companies.iter().enumerate() {
        let seen = company.stories.iter().filter(|s| s.is_seen).count();
        println!(
            "{:>3}  {:<32} {}/{} seen{}",
            index,
            company.name,
            seen,
            company.stories.len(),
            if company.showcase.has_showcase() { "  [showcase]" } else { "" }
        );
    }
}

/// Headless autoplay: poll the session on its tick, apply background
/// results, and print each story as it starts. Ctrl-C dismisses.
async fn play(hub: &mut Hub, events: &mut mpsc::Receiver<StoriesEvent>, index: usize) -> Result<()> {
    if !hub.open_session(index) {
        anyhow::bail!(
            "No company at index {} ({} stored)",
            index,
            hub.companies().len()
        );
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let tick = hub
            .session()
            .map_or(Duration::from_millis(100), |s| s.tick_interval())
            .max(Duration::from_millis(10));

        tokio::select! {
            Some(event) = events.recv() => hub.handle_event(event),
            _ = tokio::time::sleep(tick) => {}
            _ = &mut ctrl_c => {
                if let Some(session) = hub.session_mut() {
                    session.dismiss();
                }
            }
        }

        let Some(session) = hub.session_mut() else {
            break;
        };
        session.poll();

        for signal in session.take_signals() {
            match signal {
                SessionSignal::StoryChanged { index, .. } => {
                    if session.is_current_expired(Utc::now()) {
                        eprintln!("Skipping story {}: expired", index + 1);
                        session.tap_forward();
                        continue;
                    }
                    let company = session.focused_company().map_or("", |c| c.name.as_str());
                    let posted = session.elapsed_label(Utc::now()).unwrap_or_default();
                    println!("{}  story {}  ({} ago)", company, index + 1, posted);
                }
                SessionSignal::MediaFailed { story_id, .. } => {
                    eprintln!("Skipping story {}: media unavailable", story_id);
                    session.tap_forward();
                }
                SessionSignal::ConfirmBlock { .. } => session.cancel_block(),
                SessionSignal::ClapFailed { story_id, .. } => {
                    eprintln!("Clap on story {} was not recorded", story_id);
                }
                SessionSignal::CompanyChanged { .. } | SessionSignal::Dismiss => {}
            }
        }

        if session.is_dismissed() {
            break;
        }
    }

    hub.close_session();
    Ok(())
}
