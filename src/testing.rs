//! In-memory collaborators for unit tests.

use crate::catalog::{FetchError, Image, ImageSource};
use crate::favorites::store::{FavoriteEntry, FavoriteSubscription, FavoritesStore, PersistenceError};
use crate::wallpaper::{PlatformError, WallpaperSetter};
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Notify};

pub fn bitmap(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([90, 120, 200])))
}

/// Catalog that serves a fixed image list and synthetic bitmaps
#[derive(Default)]
pub struct FakeSource {
    pub images: Vec<Image>,
    pub failing_urls: HashSet<String>,
    pub fail_list: bool,
    /// Bitmap fetches never complete
    pub hang: bool,
    pub fetched: Mutex<Vec<String>>,
    pub list_requests: Mutex<Vec<usize>>,
    pub fetch_started: Notify,
}

impl FakeSource {
    pub fn with_images(images: Vec<Image>) -> Self {
        Self {
            images,
            ..Self::default()
        }
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageSource for FakeSource {
    async fn fetch_bitmap(&self, url: &str) -> Result<DynamicImage, FetchError> {
        self.fetched.lock().unwrap().push(url.to_string());
        self.fetch_started.notify_one();
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.failing_urls.contains(url) {
            return Err(FetchError::HttpError { status: 503 });
        }
        Ok(bitmap(64, 48))
    }

    async fn fetch_category_images(&self, category_index: usize) -> Result<Vec<Image>, FetchError> {
        self.list_requests.lock().unwrap().push(category_index);
        if self.fail_list {
            return Err(FetchError::HttpError { status: 500 });
        }
        Ok(self.images.clone())
    }

    async fn fetch_image(&self, image_id: &str) -> Result<Image, FetchError> {
        self.images
            .iter()
            .find(|i| i.id == image_id)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(image_id.to_string()))
    }
}

/// Wallpaper setter that records what it was asked to apply
#[derive(Default)]
pub struct RecordingWallpaper {
    pub reject: bool,
    pub applied: Mutex<Vec<(u32, u32)>>,
    pub applied_signal: Notify,
}

impl RecordingWallpaper {
    pub fn applied(&self) -> Vec<(u32, u32)> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl WallpaperSetter for RecordingWallpaper {
    async fn apply(&self, bitmap: DynamicImage) -> Result<(), PlatformError> {
        if self.reject {
            return Err(PlatformError::Rejected("denied".to_string()));
        }
        self.applied.lock().unwrap().push(bitmap.dimensions());
        self.applied_signal.notify_one();
        Ok(())
    }
}

/// Store whose writes can be switched off to simulate an unavailable engine
pub struct FlakyStore {
    pub available: AtomicBool,
    tx: watch::Sender<Arc<BTreeMap<String, FavoriteEntry>>>,
}

impl FlakyStore {
    pub fn new(available: bool) -> Self {
        let (tx, _) = watch::channel(Arc::new(BTreeMap::new()));
        Self {
            available: AtomicBool::new(available),
            tx,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PersistenceError::Io(std::io::Error::other("store offline")))
        }
    }
}

#[async_trait]
impl FavoritesStore for FlakyStore {
    async fn insert(&self, entry: FavoriteEntry) -> Result<(), PersistenceError> {
        self.check()?;
        self.tx.send_modify(|table| {
            Arc::make_mut(table).insert(entry.image.id.clone(), entry);
        });
        Ok(())
    }

    async fn delete(&self, entry: &FavoriteEntry) -> Result<(), PersistenceError> {
        self.check()?;
        self.tx.send_modify(|table| {
            Arc::make_mut(table).remove(entry.image_id());
        });
        Ok(())
    }

    async fn list(&self) -> Result<Vec<FavoriteEntry>, PersistenceError> {
        self.check()?;
        Ok(self.tx.borrow().values().cloned().collect())
    }

    fn subscribe(&self, image_id: &str) -> FavoriteSubscription {
        FavoriteSubscription::new(image_id, self.tx.subscribe())
    }
}
