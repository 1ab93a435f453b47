//! Daily wallpaper service
//!
//! A Rust-based service that:
//! - Browses a remote image catalog by category
//! - Keeps favorited images cached locally in three resolutions
//! - Rotates the wallpaper to a random catalog image on a schedule
//! - Provides a local HTTP API and CLI for favorites and wallpaper changes
//! - Runs as a systemd service with graceful shutdown

mod cache;
mod catalog;
mod config;
mod favorites;
mod job;
mod scheduler;
mod wallpaper;
mod web;

#[cfg(test)]
mod testing;

use cache::{ImageCache, Resolution};
use catalog::HttpCatalog;
use clap::{Parser, Subcommand};
use config::{Config, CATEGORIES, DEFAULT_CONFIG_PATH};
use favorites::{DetailContext, FavoritesStore, JsonFavoritesStore};
use job::{AutoWallpaperJob, JobCompletion, JobParameters};
use scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wallpaper::{FixedDisplay, SystemWallpaper};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "daily-wallpaper")]
#[command(about = "Favorites cache and auto-rotating wallpaper service")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Web server port (overrides config, default: 8888)
    #[arg(long = "http-port")]
    http_port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and HTTP API until SIGTERM/SIGINT (default)
    Serve,
    /// Change the wallpaper once and exit
    Rotate,
    /// Cache an image and save it as favorite
    Favorite { id: String },
    /// Remove an image from the favorites and its cached files
    Unfavorite { id: String },
    /// List favorites, newest first
    Favorites,
    /// Set an image as wallpaper
    SetWallpaper { id: String },
    /// Show or change the category preference
    Category { name: Option<String> },
}

/// Using current_thread runtime; image work runs on the blocking pool
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config).unwrap_or_else(|e| {
        eprintln!("Failed to load config from {}: {}, using defaults", args.config, e);
        Config::default()
    });

    // Initialize logging
    init_logging(args.verbose || config.verbose);

    if !config.has_api_key() {
        tracing::warn!("No api_key configured, catalog requests will likely fail");
    }

    let command = args.command.unwrap_or(Command::Serve);
    match command {
        Command::Serve => {
            let port = args.http_port.unwrap_or(config.web_port);
            serve(config, &args.config, port).await
        }
        Command::Rotate => rotate(&config).await,
        Command::Favorite { id } => image_action(&config, &id, Action::Favorite).await,
        Command::Unfavorite { id } => image_action(&config, &id, Action::Unfavorite).await,
        Command::SetWallpaper { id } => image_action(&config, &id, Action::Wallpaper).await,
        Command::Favorites => list_favorites(&config).await,
        Command::Category { name } => category(config, &args.config, name),
    }
}

/// Initialize tracing/logging
///
/// Default level is "warn"; `--verbose` or `"verbose": true` switches to
/// "debug". `RUST_LOG` overrides both.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("daily_wallpaper={}", level).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Wire the collaborators shared by detail views and the job
async fn build_context(config: &Config) -> anyhow::Result<DetailContext> {
    let cache = Arc::new(ImageCache::new(&config.cache_dir));
    tracing::debug!("Image cache at {}", cache.root().display());

    let store = JsonFavoritesStore::open(&config.database_path).await?;

    Ok(DetailContext::new(
        cache,
        Arc::new(store),
        Arc::new(HttpCatalog::from_config(config)),
        Arc::new(SystemWallpaper::new(config.cache_dir.join("wallpaper"))),
        Arc::new(FixedDisplay::from_config(config)),
    ))
}

fn build_job(ctx: &DetailContext) -> Arc<AutoWallpaperJob> {
    Arc::new(AutoWallpaperJob::new(
        Arc::clone(&ctx.source),
        Arc::clone(&ctx.wallpaper),
        Arc::clone(&ctx.display),
    ))
}

async fn serve(config: Config, config_path: &str, port: u16) -> anyhow::Result<()> {
    tracing::info!("Starting daily wallpaper service");

    let ctx = build_context(&config).await?;
    let job = build_job(&ctx);

    // Setup shutdown signal handling
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // The scheduler and the web API share one view of the configuration
    let config = Arc::new(RwLock::new(config));
    let (scheduler, trigger) = Scheduler::new(Arc::clone(&config), config_path, job);
    let web_server = web::WebServer::new(ctx, trigger, config, config_path);

    // Spawn scheduler task
    let scheduler_shutdown = shutdown_tx.subscribe();
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    // Spawn web server task
    let web_shutdown = shutdown_tx.subscribe();
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web_server.run_with_shutdown(port, web_shutdown).await {
            tracing::error!("Web server error: {}", e);
        }
    });

    // Wait for shutdown signal
    wait_for_shutdown().await?;
    tracing::info!("Shutdown signal received");

    // Send shutdown to all tasks
    let _ = shutdown_tx.send(());

    // Wait for tasks to complete with timeout
    tokio::select! {
        _ = scheduler_handle => {},
        _ = tokio::time::sleep(Duration::from_secs(5)) => {
            tracing::warn!("Scheduler shutdown timeout");
        }
    }

    tokio::select! {
        _ = web_handle => {},
        _ = tokio::time::sleep(Duration::from_secs(5)) => {
            tracing::warn!("Web server shutdown timeout");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Run the auto-wallpaper job once; Ctrl-C stops it
async fn rotate(config: &Config) -> anyhow::Result<()> {
    let ctx = build_context(config).await?;
    let job = build_job(&ctx);

    let mut handle = job.start(JobParameters {
        tag: "rotate".to_string(),
        category: config.category.clone(),
    });

    let finished = tokio::select! {
        completion = handle.completion() => Some(completion),
        _ = tokio::signal::ctrl_c() => None,
    };
    let completion = match finished {
        Some(completion) => completion,
        None => {
            handle.stop();
            handle.completion().await
        }
    };

    match completion {
        JobCompletion::Finished { .. } => println!("Wallpaper rotation finished"),
        JobCompletion::Stopped => println!("Wallpaper rotation stopped"),
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Favorite,
    Unfavorite,
    Wallpaper,
}

/// Open a detail view for `id`, perform one action and close the view
async fn image_action(config: &Config, id: &str, action: Action) -> anyhow::Result<()> {
    let ctx = build_context(config).await?;
    let image = ctx.resolve_image(id).await?;
    let view = ctx.open(image);

    let result = match action {
        Action::Favorite => view.set_as_favorite().await.map(|_| ()),
        Action::Unfavorite => view.unset_as_favorite().await,
        Action::Wallpaper => view.set_as_wallpaper().await,
    };

    if let Some(status) = view.status() {
        println!("{}", status);
    }
    if view.teardown().await? {
        tracing::info!("Removed cached files of {}", id);
    }

    result.map_err(Into::into)
}

async fn list_favorites(config: &Config) -> anyhow::Result<()> {
    let store = JsonFavoritesStore::open(&config.database_path).await?;
    let favorites = store.list().await?;

    if favorites.is_empty() {
        println!("No favorites");
        return Ok(());
    }

    for entry in favorites {
        println!(
            "{}\t{}\t{}\t{}",
            entry.image_id(),
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.image.tags,
            entry.file_name(Resolution::Large)
        );
    }
    Ok(())
}

fn category(mut config: Config, path: &str, name: Option<String>) -> anyhow::Result<()> {
    let Some(name) = name else {
        println!("{}", CATEGORIES[config.category_index()]);
        return Ok(());
    };

    config.category = name;
    config.validate()?;
    config.save(path)?;
    println!("Category set to {}", CATEGORIES[config.category_index()]);
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
async fn wait_for_shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}
