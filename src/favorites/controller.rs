//! Detail view controller.
//!
//! One [`DetailController`] lives as long as an image's detail view. It
//! drives the favorite state machine
//!
//! ```text
//! Idle -> CheckingCache -> [Downloading ->] Persisting -> Favorited
//! Favorited -> Unfavoriting -> Idle
//! ```
//!
//! and decides at teardown whether the cached files can go. Cache writes
//! always complete before the row is inserted; the row is always deleted
//! before any file is.

use super::store::{FavoriteEntry, FavoriteSubscription, FavoritesStore, PersistenceError};
use crate::cache::{CacheError, ImageCache, Resolution};
use crate::catalog::{FetchError, Image, ImageSource};
use crate::wallpaper::{self, DisplayInfo, PlatformError, WallpaperSetter};
use chrono::Utc;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinSet;

/// Favorite state of the image shown by a detail view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FavoriteState {
    Idle,
    CheckingCache,
    Downloading,
    Persisting,
    Favorited,
    Unfavoriting,
}

/// Transient, user-visible status. A new status replaces the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusMessage {
    SettingWallpaper,
    WallpaperSet,
    WallpaperError,
    FavoriteSaved,
    FavoriteRemoved,
    FavoriteFailed(String),
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusMessage::SettingWallpaper => write!(f, "Setting wallpaper…"),
            StatusMessage::WallpaperSet => write!(f, "Wallpaper set"),
            StatusMessage::WallpaperError => write!(f, "Error setting wallpaper"),
            StatusMessage::FavoriteSaved => write!(f, "Added to favorites"),
            StatusMessage::FavoriteRemoved => write!(f, "Removed from favorites"),
            StatusMessage::FavoriteFailed(reason) => write!(f, "Could not update favorites: {}", reason),
        }
    }
}

/// Detail view errors
#[derive(Error, Debug)]
pub enum DetailError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Wallpaper error: {0}")]
    Platform(#[from] PlatformError),

    #[error("A favorite operation is already running for image {0}")]
    Busy(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Image ids with a favorite operation in flight, shared by every
/// controller so two views of one image cannot race.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<Mutex<HashSet<String>>>);

impl InFlight {
    /// Mark `image_id` busy; `None` if it already is
    pub fn try_begin(&self, image_id: &str) -> Option<InFlightGuard> {
        let mut ids = self.0.lock().unwrap_or_else(|e| e.into_inner());
        ids.insert(image_id.to_string()).then(|| InFlightGuard {
            set: self.clone(),
            image_id: image_id.to_string(),
        })
    }

    pub fn contains(&self, image_id: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(image_id)
    }
}

/// Clears the in-flight mark when dropped
#[derive(Debug)]
pub struct InFlightGuard {
    set: InFlight,
    image_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.image_id);
    }
}

/// Collaborators shared by all detail views
#[derive(Clone)]
pub struct DetailContext {
    pub cache: Arc<ImageCache>,
    pub store: Arc<dyn FavoritesStore>,
    pub source: Arc<dyn ImageSource>,
    pub wallpaper: Arc<dyn WallpaperSetter>,
    pub display: Arc<dyn DisplayInfo>,
    in_flight: InFlight,
}

impl DetailContext {
    pub fn new(
        cache: Arc<ImageCache>,
        store: Arc<dyn FavoritesStore>,
        source: Arc<dyn ImageSource>,
        wallpaper: Arc<dyn WallpaperSetter>,
        display: Arc<dyn DisplayInfo>,
    ) -> Self {
        Self {
            cache,
            store,
            source,
            wallpaper,
            display,
            in_flight: InFlight::default(),
        }
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Open a detail view for `image`
    pub fn open(&self, image: Image) -> DetailController {
        DetailController::open(self.clone(), image)
    }

    /// Current row for `image_id`, without keeping a subscription
    pub fn stored_entry(&self, image_id: &str) -> Option<FavoriteEntry> {
        let subscription = self.store.subscribe(image_id);
        let entry = subscription.current();
        subscription.unsubscribe();
        entry
    }

    /// Image metadata for `image_id`: the favorited copy if there is one,
    /// otherwise the catalog's.
    pub async fn resolve_image(&self, image_id: &str) -> Result<Image, FetchError> {
        match self.stored_entry(image_id) {
            Some(entry) => Ok(entry.image),
            None => self.source.fetch_image(image_id).await,
        }
    }
}

/// Controller for one open detail view
pub struct DetailController {
    ctx: DetailContext,
    image: Image,
    subscription: FavoriteSubscription,
    state: Mutex<FavoriteState>,
    status: Mutex<Option<StatusMessage>>,
}

impl DetailController {
    pub fn open(ctx: DetailContext, image: Image) -> Self {
        let subscription = ctx.store.subscribe(&image.id);
        let state = if subscription.is_favorite() {
            FavoriteState::Favorited
        } else {
            FavoriteState::Idle
        };
        tracing::debug!("Detail view opened for {} ({:?})", image.id, state);

        Self {
            ctx,
            image,
            subscription,
            state: Mutex::new(state),
            status: Mutex::new(None),
        }
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Stored row for this image, as last observed
    pub fn entry(&self) -> Option<FavoriteEntry> {
        self.subscription.current()
    }

    pub fn is_favorite(&self) -> bool {
        self.subscription.is_favorite()
    }

    pub fn state(&self) -> FavoriteState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: FavoriteState) {
        let mut current = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *current != state {
            tracing::trace!("{}: {:?} -> {:?}", self.image.id, *current, state);
            *current = state;
        }
    }

    fn in_flight(&self) -> bool {
        self.ctx.in_flight.contains(&self.image.id)
    }

    /// Whether to offer "favorite" rather than "unfavorite"
    pub fn favorite_action_visible(&self) -> bool {
        !self.is_favorite() && !self.in_flight()
    }

    pub fn status(&self) -> Option<StatusMessage> {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn show_status(&self, message: StatusMessage) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = Some(message);
    }

    /// Cache all three resolutions and insert the row.
    ///
    /// Already-favorited images return their existing row untouched.
    pub async fn set_as_favorite(&self) -> Result<FavoriteEntry, DetailError> {
        let _guard = self
            .ctx
            .in_flight
            .try_begin(&self.image.id)
            .ok_or_else(|| DetailError::Busy(self.image.id.clone()))?;

        if let Some(entry) = self.entry() {
            tracing::debug!("{} is already a favorite", self.image.id);
            self.set_state(FavoriteState::Favorited);
            return Ok(entry);
        }

        match self.cache_and_persist().await {
            Ok(entry) => {
                tracing::info!("Image {} saved as favorite", self.image.id);
                self.set_state(FavoriteState::Favorited);
                self.show_status(StatusMessage::FavoriteSaved);
                Ok(entry)
            }
            Err(e) => {
                tracing::warn!("Could not save {} as favorite: {}", self.image.id, e);
                self.set_state(FavoriteState::Idle);
                self.show_status(StatusMessage::FavoriteFailed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn cache_and_persist(&self) -> Result<FavoriteEntry, DetailError> {
        let id = &self.image.id;

        self.set_state(FavoriteState::CheckingCache);
        let missing = self.ctx.cache.missing(id).await?;

        if missing.is_empty() {
            tracing::debug!("All resolutions of {} already cached", id);
        } else {
            self.set_state(FavoriteState::Downloading);
            // Nothing is written unless every missing resolution arrived
            let bitmaps = self.fetch_resolutions(&missing).await?;
            for (resolution, bitmap) in bitmaps {
                self.ctx.cache.save(bitmap, &resolution.file_name(id)).await?;
            }
        }

        self.set_state(FavoriteState::Persisting);
        let entry = FavoriteEntry::new(self.image.clone(), Utc::now());
        self.ctx.store.insert(entry.clone()).await?;
        Ok(entry)
    }

    /// Fetch the given resolutions concurrently. The first failure aborts
    /// the remaining downloads.
    async fn fetch_resolutions(
        &self,
        resolutions: &[Resolution],
    ) -> Result<Vec<(Resolution, DynamicImage)>, DetailError> {
        let mut tasks = JoinSet::new();
        for &resolution in resolutions {
            let source = Arc::clone(&self.ctx.source);
            let url = resolution.url(&self.image).to_string();
            tasks.spawn(async move { (resolution, source.fetch_bitmap(&url).await) });
        }

        let mut fetched = Vec::with_capacity(resolutions.len());
        while let Some(joined) = tasks.join_next().await {
            let (resolution, result) = joined.map_err(|e| DetailError::Task(e.to_string()))?;
            fetched.push((resolution, result?));
        }
        Ok(fetched)
    }

    /// Delete the row. Cached files stay until the view is torn down.
    pub async fn unset_as_favorite(&self) -> Result<(), DetailError> {
        let _guard = self
            .ctx
            .in_flight
            .try_begin(&self.image.id)
            .ok_or_else(|| DetailError::Busy(self.image.id.clone()))?;

        let Some(entry) = self.entry() else {
            self.set_state(FavoriteState::Idle);
            return Ok(());
        };

        self.set_state(FavoriteState::Unfavoriting);
        match self.ctx.store.delete(&entry).await {
            Ok(()) => {
                tracing::info!("Image {} removed from favorites", self.image.id);
                self.set_state(FavoriteState::Idle);
                self.show_status(StatusMessage::FavoriteRemoved);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Could not delete favorite {}: {}", self.image.id, e);
                self.set_state(FavoriteState::Favorited);
                self.show_status(StatusMessage::FavoriteFailed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Crop this image to the display and apply it as wallpaper.
    ///
    /// Favorites are read from the cache; everything else is downloaded at
    /// full resolution.
    pub async fn set_as_wallpaper(&self) -> Result<(), DetailError> {
        self.show_status(StatusMessage::SettingWallpaper);

        let result = async {
            let bitmap = self.full_resolution_bitmap().await?;
            let bitmap = wallpaper::fit_to_display(bitmap, self.ctx.display.as_ref()).await?;
            self.ctx.wallpaper.apply(bitmap).await?;
            Ok::<_, DetailError>(())
        }
        .await;

        match &result {
            Ok(()) => self.show_status(StatusMessage::WallpaperSet),
            Err(e) => {
                tracing::warn!("Setting {} as wallpaper failed: {}", self.image.id, e);
                self.show_status(StatusMessage::WallpaperError);
            }
        }
        result
    }

    async fn full_resolution_bitmap(&self) -> Result<DynamicImage, DetailError> {
        if let Some(entry) = self.entry() {
            if let Some(bitmap) = self.ctx.cache.load(&entry.large_file).await? {
                return Ok(bitmap);
            }
            tracing::warn!("Favorite {} has no cached large file", self.image.id);
        }
        Ok(self.ctx.source.fetch_bitmap(&self.image.large_image_url).await?)
    }

    /// Close the view. Unsubscribes, then removes the cached files if the
    /// image is not a favorite and nothing is saving it. Returns whether
    /// files were deleted.
    ///
    /// The in-flight mark is held from the decision until the files are
    /// gone, so no other view can favorite the image in between.
    pub async fn teardown(self) -> Result<bool, CacheError> {
        let Self {
            ctx,
            image,
            subscription,
            ..
        } = self;
        subscription.unsubscribe();

        let Some(_guard) = ctx.in_flight.try_begin(&image.id) else {
            tracing::debug!("{} is busy, keeping its cached files", image.id);
            return Ok(false);
        };

        // Re-read under the mark; a save may have finished since the view last looked
        if ctx.stored_entry(&image.id).is_some() {
            return Ok(false);
        }

        if ctx.cache.missing(&image.id).await?.len() == Resolution::ALL.len() {
            return Ok(false);
        }

        tracing::debug!("Deleting cached files of {}", image.id);
        ctx.cache.delete_all(&image.id).await?;
        Ok(true)
    }
}
