//! Auto-wallpaper scheduler.
//!
//! Starts an auto-wallpaper job every configured interval, or on a manual
//! trigger, and stops the in-flight job on shutdown. The configuration file
//! is re-read before every job, so a category saved by another process is
//! picked up without a restart.

use crate::config::{Config, ConfigError};
use crate::job::{AutoWallpaperJob, JobCompletion, JobParameters};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};

/// Delay before the first scheduled run
const INITIAL_DELAY: Duration = Duration::from_secs(10);

/// Scheduler with manual trigger support
pub struct Scheduler {
    config: Arc<RwLock<Config>>,
    config_path: PathBuf,
    job: Arc<AutoWallpaperJob>,
    trigger_rx: mpsc::Receiver<()>,
    runs: u64,
}

impl Scheduler {
    /// Create a new scheduler and the sender used to trigger it manually
    pub fn new(
        config: Arc<RwLock<Config>>,
        config_path: impl Into<PathBuf>,
        job: Arc<AutoWallpaperJob>,
    ) -> (Self, mpsc::Sender<()>) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        (
            Self {
                config,
                config_path: config_path.into(),
                job,
                trigger_rx,
                runs: 0,
            },
            trigger_tx,
        )
    }

    /// Run the scheduler loop until shutdown
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Scheduler started");

        tokio::select! {
            _ = tokio::time::sleep(INITIAL_DELAY) => {}
            _ = shutdown.recv() => {
                tracing::info!("Scheduler shutdown before first run");
                return;
            }
        }

        loop {
            let (interval, enabled) = {
                let config = self.config.read().await;
                (
                    Duration::from_secs(config.refresh_interval_min as u64 * 60),
                    config.auto_wallpaper,
                )
            };

            tracing::debug!("Next wallpaper change in {:?}", interval);

            let keep_running = tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if enabled {
                        self.dispatch(&mut shutdown).await
                    } else {
                        tracing::debug!("Auto wallpaper disabled, skipping");
                        true
                    }
                }
                Some(_) = self.trigger_rx.recv() => {
                    tracing::info!("Manual wallpaper change triggered");
                    self.dispatch(&mut shutdown).await
                }
                _ = shutdown.recv() => false,
            };

            if !keep_running {
                tracing::info!("Scheduler shutting down");
                break;
            }
        }
    }

    /// Start one job and wait for its completion. Returns `false` if
    /// shutdown arrived meanwhile.
    async fn dispatch(&mut self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        self.runs += 1;
        self.reload_config().await;

        let params = {
            let config = self.config.read().await;
            JobParameters {
                tag: format!("auto-wallpaper-{}", self.runs),
                category: config.category.clone(),
            }
        };

        let mut handle = self.job.start(params);

        let finished = tokio::select! {
            completion = handle.completion() => Some(completion),
            _ = shutdown.recv() => None,
        };

        match finished {
            Some(JobCompletion::Finished { reschedule }) => {
                tracing::debug!("Job {} finished (reschedule: {})", handle.tag(), reschedule);
                true
            }
            Some(JobCompletion::Stopped) => {
                tracing::debug!("Job {} was stopped", handle.tag());
                true
            }
            None => {
                handle.stop();
                let completion = handle.completion().await;
                tracing::info!("Job {} ended on shutdown: {:?}", handle.tag(), completion);
                false
            }
        }
    }

    /// Replace the shared configuration with the file's current contents.
    /// A missing file keeps what is loaded; an invalid one is logged and
    /// ignored.
    async fn reload_config(&self) {
        match Config::load(&self.config_path) {
            Ok(fresh) => {
                let mut config = self.config.write().await;
                if config.category != fresh.category {
                    tracing::info!(
                        "Category preference changed from '{}' to '{}'",
                        config.category,
                        fresh.category
                    );
                }
                *config = fresh;
            }
            Err(ConfigError::ReadError(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Keeping current configuration, reloading {} failed: {}",
                self.config_path.display(),
                e
            ),
        }
    }
}
