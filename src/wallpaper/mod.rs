//! Wallpaper applier.
//!
//! Prepares a bitmap for the display and hands it to the platform. Both the
//! manual "set as wallpaper" action and the auto-wallpaper job go through
//! [`WallpaperSetter`], and both run the platform call on the blocking pool.

pub mod transform;

pub use transform::center_crop;

use crate::cache::write_jpeg_atomic;
use crate::config::Config;
use async_trait::async_trait;
use image::DynamicImage;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

/// Wallpaper rejected by the platform
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Failed to write wallpaper file: {0}")]
    Write(String),

    #[error("Platform rejected wallpaper: {0}")]
    Rejected(String),

    #[error("Wallpaper task failed: {0}")]
    Task(String),
}

/// Platform wallpaper API
#[async_trait]
pub trait WallpaperSetter: Send + Sync {
    /// Replace the current wallpaper with `bitmap`
    async fn apply(&self, bitmap: DynamicImage) -> Result<(), PlatformError>;
}

/// Source of the current display dimensions
pub trait DisplayInfo: Send + Sync {
    fn dimensions(&self) -> (u32, u32);
}

/// Display with fixed, configured dimensions
#[derive(Debug, Clone, Copy)]
pub struct FixedDisplay {
    pub width: u32,
    pub height: u32,
}

impl FixedDisplay {
    pub fn from_config(config: &Config) -> Self {
        Self {
            width: config.display_width,
            height: config.display_height,
        }
    }
}

impl DisplayInfo for FixedDisplay {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Center-crop `bitmap` to the display's current dimensions off the async
/// workers.
pub async fn fit_to_display(
    bitmap: DynamicImage,
    display: &dyn DisplayInfo,
) -> Result<DynamicImage, PlatformError> {
    let (width, height) = display.dimensions();
    tokio::task::spawn_blocking(move || center_crop(bitmap, width, height))
        .await
        .map_err(|e| PlatformError::Task(e.to_string()))
}

/// Desktop wallpaper through the `wallpaper` crate.
///
/// Every apply writes a fresh file and only removes the previous one after
/// the desktop has switched, so the old wallpaper stays intact until then.
pub struct SystemWallpaper {
    dir: PathBuf,
    current: Mutex<Option<PathBuf>>,
}

impl SystemWallpaper {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Mutex::new(None),
        }
    }
}

#[async_trait]
impl WallpaperSetter for SystemWallpaper {
    async fn apply(&self, bitmap: DynamicImage) -> Result<(), PlatformError> {
        let dir = self.dir.clone();
        let path = dir.join(format!(
            "wallpaper-{}.jpg",
            chrono::Utc::now().timestamp_millis()
        ));

        let target = path.clone();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir).map_err(|e| PlatformError::Write(e.to_string()))?;
            write_jpeg_atomic(&bitmap, &target).map_err(|e| PlatformError::Write(e.to_string()))?;

            let target_str = target
                .to_str()
                .ok_or_else(|| PlatformError::Write("wallpaper path is not UTF-8".to_string()))?;
            ::wallpaper::set_from_path(target_str).map_err(|e| {
                let _ = std::fs::remove_file(&target);
                PlatformError::Rejected(e.to_string())
            })
        })
        .await
        .map_err(|e| PlatformError::Task(e.to_string()))??;

        tracing::info!("Wallpaper set from {}", path.display());

        let previous = self
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(path);
        if let Some(previous) = previous {
            if let Err(e) = std::fs::remove_file(&previous) {
                tracing::debug!("Could not remove old wallpaper {}: {}", previous.display(), e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageBuffer, Rgb};

    #[tokio::test]
    async fn fit_to_display_uses_display_dimensions() {
        let display = FixedDisplay {
            width: 108,
            height: 192,
        };
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(300, 200, Rgb([1, 2, 3])));

        let out = fit_to_display(img, &display).await.unwrap();
        assert_eq!(out.dimensions(), (108, 192));
    }

    #[test]
    fn fixed_display_reads_config() {
        let config = Config {
            display_width: 720,
            display_height: 1280,
            ..Config::default()
        };
        assert_eq!(FixedDisplay::from_config(&config).dimensions(), (720, 1280));
    }
}
