//! Local image cache.
//!
//! Favorite images are kept on disk at three resolutions under names derived
//! only from the image id, so presence can be checked without the store.

use crate::catalog::Image;
use image::{DynamicImage, ImageFormat};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extension shared by every cached file
pub const IMAGE_EXTENSION: &str = ".jpg";

/// Cache read/write failures. A missing file is never an error.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Cache task failed: {0}")]
    Task(String),
}

/// The three cached resolutions of a favorite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    Preview,
    Webformat,
    Large,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Resolution::Preview, Resolution::Webformat, Resolution::Large];

    pub fn suffix(self) -> &'static str {
        match self {
            Resolution::Preview => "_preview",
            Resolution::Webformat => "_webformat",
            Resolution::Large => "_large",
        }
    }

    /// `<imageId><suffix><extension>`
    pub fn file_name(self, image_id: &str) -> String {
        format!("{}{}{}", image_id, self.suffix(), IMAGE_EXTENSION)
    }

    /// Remote URL of this resolution
    pub fn url(self, image: &Image) -> &str {
        match self {
            Resolution::Preview => &image.preview_url,
            Resolution::Webformat => &image.webformat_url,
            Resolution::Large => &image.large_image_url,
        }
    }
}

/// Directory-backed bitmap cache
#[derive(Debug, Clone)]
pub struct ImageCache {
    root: PathBuf,
}

impl ImageCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub async fn exists(&self, file_name: &str) -> Result<bool, CacheError> {
        let path = self.path_of(file_name);
        run_blocking(move || match std::fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Io(e)),
        })
        .await
    }

    /// Load a cached bitmap; `None` if the file is absent
    pub async fn load(&self, file_name: &str) -> Result<Option<DynamicImage>, CacheError> {
        let path = self.path_of(file_name);
        run_blocking(move || match image::open(&path) {
            Ok(img) => Ok(Some(img)),
            Err(image::ImageError::IoError(e)) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Image(e)),
        })
        .await
    }

    /// Encode and store a bitmap as JPEG, replacing any previous file
    pub async fn save(&self, bitmap: DynamicImage, file_name: &str) -> Result<(), CacheError> {
        let root = self.root.clone();
        let path = self.path_of(file_name);
        run_blocking(move || {
            std::fs::create_dir_all(&root)?;
            write_jpeg_atomic(&bitmap, &path)
        })
        .await?;
        tracing::debug!("Cached {}", file_name);
        Ok(())
    }

    /// Remove a cached file; absent files are ignored
    pub async fn delete(&self, file_name: &str) -> Result<(), CacheError> {
        let path = self.path_of(file_name);
        run_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(e)),
        })
        .await
    }

    /// Resolutions of `image_id` that are not cached yet
    pub async fn missing(&self, image_id: &str) -> Result<Vec<Resolution>, CacheError> {
        let mut missing = Vec::new();
        for resolution in Resolution::ALL {
            if !self.exists(&resolution.file_name(image_id)).await? {
                missing.push(resolution);
            }
        }
        Ok(missing)
    }

    /// Delete all three resolutions of `image_id`
    pub async fn delete_all(&self, image_id: &str) -> Result<(), CacheError> {
        for resolution in Resolution::ALL {
            self.delete(&resolution.file_name(image_id)).await?;
        }
        Ok(())
    }
}

/// JPEG has no alpha channel; write through a temp file and rename so a
/// final name never holds a truncated image.
pub(crate) fn write_jpeg_atomic(bitmap: &DynamicImage, path: &Path) -> Result<(), CacheError> {
    let tmp_path = path.with_extension("jpg.tmp");
    let rgb = DynamicImage::ImageRgb8(bitmap.to_rgb8());
    rgb.save_with_format(&tmp_path, ImageFormat::Jpeg)?;

    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        CacheError::Io(e)
    })
}

async fn run_blocking<T, F>(f: F) -> Result<T, CacheError>
where
    F: FnOnce() -> Result<T, CacheError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn bitmap(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(w, h, Rgb([200, 100, 50])))
    }

    #[test]
    fn file_names_are_derived_from_the_id() {
        assert_eq!(Resolution::Preview.file_name("img42"), "img42_preview.jpg");
        assert_eq!(Resolution::Webformat.file_name("img42"), "img42_webformat.jpg");
        assert_eq!(Resolution::Large.file_name("img42"), "img42_large.jpg");
    }

    #[tokio::test]
    async fn missing_files_are_not_errors() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ImageCache::new(dir.path().join("not-created-yet"));

        assert!(!cache.exists("nope.jpg").await.unwrap());
        assert!(cache.load("nope.jpg").await.unwrap().is_none());
        cache.delete("nope.jpg").await.unwrap();
        assert_eq!(cache.missing("nope").await.unwrap(), Resolution::ALL.to_vec());
    }

    #[tokio::test]
    async fn save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ImageCache::new(dir.path().join("cache"));
        let name = Resolution::Large.file_name("7");

        cache.save(bitmap(32, 16), &name).await.unwrap();
        assert!(cache.exists(&name).await.unwrap());
        assert!(!cache.root().join("7_large.jpg.tmp").exists());

        let loaded = cache.load(&name).await.unwrap().expect("cached bitmap");
        assert_eq!((loaded.width(), loaded.height()), (32, 16));

        cache.delete(&name).await.unwrap();
        assert!(!cache.exists(&name).await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error_not_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ImageCache::new(dir.path());
        std::fs::write(dir.path().join("bad_large.jpg"), b"garbage").unwrap();

        assert!(cache.load("bad_large.jpg").await.is_err());
    }

    #[tokio::test]
    async fn missing_reports_only_absent_resolutions() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ImageCache::new(dir.path());
        cache
            .save(bitmap(4, 4), &Resolution::Preview.file_name("9"))
            .await
            .unwrap();

        let missing = cache.missing("9").await.unwrap();
        assert_eq!(missing, vec![Resolution::Webformat, Resolution::Large]);

        cache.delete_all("9").await.unwrap();
        assert_eq!(cache.missing("9").await.unwrap().len(), 3);
    }
}
