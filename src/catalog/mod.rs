//! Remote image catalog.
//!
//! Image metadata model, the [`ImageSource`] seam used by the favorites
//! controller and the auto-wallpaper job, and its HTTP implementation
//! against a Pixabay-style search API.

pub mod download;

pub use download::{download_image, FetchError, RetryPolicy};

use crate::config::{Config, CATEGORIES};
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Deserializer, Serialize};

/// Number of images requested per category page
const PAGE_SIZE: u32 = 50;

/// A remote catalog image. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(rename = "pageURL", default)]
    pub page_url: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub tags: String,

    #[serde(rename = "previewURL")]
    pub preview_url: String,
    #[serde(rename = "previewWidth", default)]
    pub preview_width: u32,
    #[serde(rename = "previewHeight", default)]
    pub preview_height: u32,

    #[serde(rename = "webformatURL")]
    pub webformat_url: String,
    #[serde(rename = "webformatWidth", default)]
    pub webformat_width: u32,
    #[serde(rename = "webformatHeight", default)]
    pub webformat_height: u32,

    #[serde(rename = "largeImageURL")]
    pub large_image_url: String,
    #[serde(rename = "imageWidth", default)]
    pub image_width: u32,
    #[serde(rename = "imageHeight", default)]
    pub image_height: u32,
    #[serde(rename = "imageSize", default)]
    pub image_size: u64,

    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub favorites: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub comments: u64,

    #[serde(default)]
    pub user_id: u64,
    #[serde(default)]
    pub user: String,
    #[serde(rename = "userImageURL", default)]
    pub user_image_url: String,
}

/// The catalog returns numeric ids; stored entries and callers use strings.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(u64),
        Text(String),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Number(n) => n.to_string(),
        Id::Text(s) => s,
    })
}

/// Search response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ImageList {
    #[serde(rename = "totalHits", default)]
    pub total_hits: u64,
    #[serde(default)]
    pub hits: Vec<Image>,
}

/// Network collaborator shared by the favorites controller and the job
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Fetch and decode the bitmap at `url`
    async fn fetch_bitmap(&self, url: &str) -> Result<DynamicImage, FetchError>;

    /// Request the image list for a category index (see [`CATEGORIES`])
    async fn fetch_category_images(&self, category_index: usize) -> Result<Vec<Image>, FetchError>;

    /// Look up a single image by id
    async fn fetch_image(&self, image_id: &str) -> Result<Image, FetchError>;
}

/// [`ImageSource`] backed by the HTTP search API
pub struct HttpCatalog {
    api_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl HttpCatalog {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_url.clone(), config.api_key.clone())
    }

    /// Query parameters for a category page. Index 0 and out-of-range
    /// indexes request every category.
    fn category_query(&self, category_index: usize) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("key", self.api_key.clone()),
            ("image_type", "photo".to_string()),
            ("orientation", "vertical".to_string()),
            ("safesearch", "true".to_string()),
            ("per_page", PAGE_SIZE.to_string()),
        ];
        if let Some(category) = CATEGORIES.get(category_index).filter(|_| category_index > 0) {
            query.push(("category", category.to_string()));
        }
        query
    }

    async fn search(&self, query: &[(&'static str, String)]) -> Result<ImageList, FetchError> {
        let response = download::http_client()
            .get(&self.api_url)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Catalog returned HTTP {}", status);
            return Err(FetchError::HttpError {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ImageSource for HttpCatalog {
    async fn fetch_bitmap(&self, url: &str) -> Result<DynamicImage, FetchError> {
        download_image(url, &self.retry).await
    }

    async fn fetch_category_images(&self, category_index: usize) -> Result<Vec<Image>, FetchError> {
        tracing::debug!(
            "Requesting images for category {} ({})",
            category_index,
            CATEGORIES.get(category_index).copied().unwrap_or("all")
        );
        let list = self.search(&self.category_query(category_index)).await?;
        tracing::info!("Catalog returned {} of {} images", list.hits.len(), list.total_hits);
        Ok(list.hits)
    }

    async fn fetch_image(&self, image_id: &str) -> Result<Image, FetchError> {
        let query = [
            ("key", self.api_key.clone()),
            ("id", image_id.to_string()),
        ];
        self.search(&query)
            .await?
            .hits
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::NotFound(image_id.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal image with deterministic URLs for tests
    pub(crate) fn sample_image(id: &str) -> Image {
        Image {
            id: id.to_string(),
            page_url: format!("https://example.com/photos/{}", id),
            kind: "photo".to_string(),
            tags: "sky, clouds".to_string(),
            preview_url: format!("https://cdn.example.com/{}_150.jpg", id),
            preview_width: 150,
            preview_height: 100,
            webformat_url: format!("https://cdn.example.com/{}_640.jpg", id),
            webformat_width: 640,
            webformat_height: 427,
            large_image_url: format!("https://cdn.example.com/{}_1280.jpg", id),
            image_width: 4000,
            image_height: 2667,
            image_size: 1_234_567,
            views: 10,
            downloads: 5,
            favorites: 2,
            likes: 3,
            comments: 1,
            user_id: 77,
            user: "photographer".to_string(),
            user_image_url: String::new(),
        }
    }

    #[test]
    fn parses_search_response_with_numeric_ids() {
        let body = r#"{
            "total": 2, "totalHits": 2,
            "hits": [{
                "id": 195893, "pageURL": "https://pixabay.com/en/blossom-195893/",
                "type": "photo", "tags": "blossom, bloom",
                "previewURL": "https://cdn.pixabay.com/p_150.jpg", "previewWidth": 150, "previewHeight": 84,
                "webformatURL": "https://pixabay.com/w_640.jpg", "webformatWidth": 640, "webformatHeight": 360,
                "largeImageURL": "https://pixabay.com/l_1280.jpg",
                "imageWidth": 4000, "imageHeight": 2250, "imageSize": 4731420,
                "views": 7671, "downloads": 6439, "likes": 5, "comments": 2,
                "user_id": 48777, "user": "Josch13", "userImageURL": "https://cdn.pixabay.com/u.jpg"
            }]
        }"#;

        let list: ImageList = serde_json::from_str(body).unwrap();
        assert_eq!(list.total_hits, 2);
        assert_eq!(list.hits.len(), 1);
        let image = &list.hits[0];
        assert_eq!(image.id, "195893");
        assert_eq!(image.large_image_url, "https://pixabay.com/l_1280.jpg");
        assert_eq!(image.favorites, 0);
        assert_eq!(image.user, "Josch13");
    }

    #[test]
    fn string_ids_are_kept_verbatim() {
        let json = serde_json::to_string(&sample_image("img42")).unwrap();
        let image: Image = serde_json::from_str(&json).unwrap();
        assert_eq!(image, sample_image("img42"));
    }

    #[test]
    fn category_zero_requests_all_categories() {
        let catalog = HttpCatalog::new("https://example.com/api/", "k");
        let query = catalog.category_query(0);
        assert!(!query.iter().any(|(k, _)| *k == "category"));

        let query = catalog.category_query(3);
        assert!(query.contains(&("category", "nature".to_string())));

        let query = catalog.category_query(CATEGORIES.len() + 5);
        assert!(!query.iter().any(|(k, _)| *k == "category"));
    }
}
