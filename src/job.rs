//! Auto-wallpaper job.
//!
//! One [`JobInvocation`] per scheduler trigger: read the category preference,
//! list that category, pick an image uniformly at random, download its large
//! rendition, crop it to the display and apply it.
//!
//! The job always finishes with `reschedule = false`; failures are logged and
//! the next trigger simply tries again. A stop signal cancels whatever is in
//! flight and the completion is then reported as [`JobCompletion::Stopped`].

use crate::catalog::{FetchError, ImageSource};
use crate::config::category_index;
use crate::wallpaper::{self, DisplayInfo, PlatformError, WallpaperSetter};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{oneshot, watch};

/// Job errors. Never surfaced past the job; only logged.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Category {0} returned no images")]
    EmptyList(usize),

    #[error("Wallpaper error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Job stopped")]
    Stopped,
}

/// Parameters captured when the scheduler fires
#[derive(Debug, Clone)]
pub struct JobParameters {
    pub tag: String,
    /// Category preference as configured at trigger time
    pub category: String,
}

/// How a started job ended. Reported exactly once per start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCompletion {
    Finished { reschedule: bool },
    Stopped,
}

/// What a successful run applied
#[derive(Debug, Clone)]
pub struct JobReport {
    pub image_id: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// One run of the job: its parameters and the stop signal it watches
pub struct JobInvocation {
    pub params: JobParameters,
    stop: watch::Receiver<bool>,
}

impl JobInvocation {
    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }
}

/// Start/stop handle given to the scheduler
pub struct JobHandle {
    tag: String,
    stop: watch::Sender<bool>,
    done: oneshot::Receiver<JobCompletion>,
    completion: Option<JobCompletion>,
}

impl JobHandle {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Ask the job to stop at its next safe point
    pub fn stop(&self) {
        tracing::debug!("Stopping job {}", self.tag);
        self.stop.send_replace(true);
    }

    /// Wait for the job's single completion report
    pub async fn completion(&mut self) -> JobCompletion {
        if let Some(completion) = self.completion {
            return completion;
        }
        // The task only drops the sender without sending if it panicked
        let completion = (&mut self.done).await.unwrap_or(JobCompletion::Stopped);
        self.completion = Some(completion);
        completion
    }
}

/// Pick an index uniformly from `[0, len)`; `None` for an empty list
pub fn pick_random_index<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Option<usize> {
    (len > 0).then(|| rng.gen_range(0..len))
}

/// The auto-wallpaper job and its collaborators
pub struct AutoWallpaperJob {
    source: Arc<dyn ImageSource>,
    wallpaper: Arc<dyn WallpaperSetter>,
    display: Arc<dyn DisplayInfo>,
    rng: Mutex<StdRng>,
}

impl AutoWallpaperJob {
    pub fn new(
        source: Arc<dyn ImageSource>,
        wallpaper: Arc<dyn WallpaperSetter>,
        display: Arc<dyn DisplayInfo>,
    ) -> Self {
        Self {
            source,
            wallpaper,
            display,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replace the random source, e.g. with a seeded one
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// Start one invocation in the background
    pub fn start(self: &Arc<Self>, params: JobParameters) -> JobHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (done_tx, done_rx) = oneshot::channel();
        let tag = params.tag.clone();

        let invocation = JobInvocation {
            params,
            stop: stop_rx,
        };
        let job = Arc::clone(self);

        tokio::spawn(async move {
            let tag = invocation.params.tag.clone();
            tracing::info!("Job {} started", tag);

            let completion = {
                let run = job.run(&invocation);
                tokio::pin!(run);
                let mut stop = invocation.stop.clone();
                tokio::select! {
                    biased;
                    // A dropped handle without a stop request never cancels
                    _ = async {
                        let stopped = stop.wait_for(|s| *s).await.is_ok();
                        if !stopped {
                            std::future::pending::<()>().await;
                        }
                    } => {
                        tracing::info!("Job {} stopped before completion", tag);
                        JobCompletion::Stopped
                    }
                    result = &mut run => {
                        match result {
                            Ok(report) => tracing::info!(
                                "Job {} applied image {} from {} ({}x{})",
                                tag,
                                report.image_id,
                                report.url,
                                report.width,
                                report.height
                            ),
                            Err(JobError::Stopped) => {
                                tracing::info!("Job {} stopped at a safe point", tag);
                            }
                            Err(e) => tracing::warn!("Job {} failed: {}", tag, e),
                        }
                        if invocation.is_stopped() {
                            JobCompletion::Stopped
                        } else {
                            JobCompletion::Finished { reschedule: false }
                        }
                    }
                }
            };

            let _ = done_tx.send(completion);
        });

        JobHandle {
            tag,
            stop: stop_tx,
            done: done_rx,
            completion: None,
        }
    }

    /// Run the job body once
    pub async fn run(&self, invocation: &JobInvocation) -> Result<JobReport, JobError> {
        let index = category_index(&invocation.params.category);
        tracing::debug!(
            "Job {}: category '{}' -> index {}",
            invocation.params.tag,
            invocation.params.category,
            index
        );

        let images = self.source.fetch_category_images(index).await?;

        let picked = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            pick_random_index(&mut *rng, images.len())
        };
        let Some(picked) = picked else {
            return Err(JobError::EmptyList(index));
        };
        let image = &images[picked];
        tracing::debug!("Picked image {} ({} of {})", image.id, picked + 1, images.len());

        let bitmap = self.source.fetch_bitmap(&image.large_image_url).await?;
        if invocation.is_stopped() {
            return Err(JobError::Stopped);
        }

        let bitmap = wallpaper::fit_to_display(bitmap, self.display.as_ref()).await?;
        if invocation.is_stopped() {
            return Err(JobError::Stopped);
        }

        let (width, height) = (bitmap.width(), bitmap.height());
        self.wallpaper.apply(bitmap).await?;

        Ok(JobReport {
            image_id: image.id.clone(),
            url: image.large_image_url.clone(),
            width,
            height,
        })
    }
}
