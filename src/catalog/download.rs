//! HTTP plumbing for the catalog: one shared client for search requests and
//! bitmap downloads, a retry policy for the latter, and content-sniffing
//! decode.

use image::DynamicImage;
use once_cell::sync::Lazy;
use std::time::Duration;
use thiserror::Error;

/// Shared HTTP client for all catalog requests and downloads
static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
});

pub(crate) fn http_client() -> &'static reqwest::Client {
    &HTTP_CLIENT
}

/// Network and decode failures
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("HTTP error: {status}")]
    HttpError { status: u16 },

    #[error("Image decode failed: {0}")]
    DecodeError(#[from] image::ImageError),

    #[error("Invalid catalog response: {0}")]
    InvalidResponse(String),

    #[error("Image {0} not found in catalog")]
    NotFound(String),

    #[error("Empty URL")]
    EmptyUrl,

    #[error("Download timeout")]
    Timeout,
}

/// How often and how patiently a bitmap download is retried
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Wait before the second attempt; doubled for each one after
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt number `attempt` (0-based)
    fn delay_before(&self, attempt: u32) -> Duration {
        match attempt {
            0 => Duration::ZERO,
            n => self.base_delay.saturating_mul(2u32.saturating_pow(n - 1)),
        }
    }
}

/// Download `url` with the shared client and decode it off the async workers
pub async fn download_image(url: &str, retry: &RetryPolicy) -> Result<DynamicImage, FetchError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(FetchError::EmptyUrl);
    }

    tracing::info!("Downloading image from: {}", url);

    let bytes = download_with_retry(&HTTP_CLIENT, url, retry).await?;

    tracing::debug!("Downloaded {} bytes, decoding image...", bytes.len());

    let img = tokio::task::spawn_blocking(move || decode_image(bytes))
        .await
        .map_err(|e| FetchError::InvalidResponse(format!("decode task failed: {}", e)))??;

    tracing::info!("Image decoded: {}x{}", img.width(), img.height());
    Ok(img)
}

/// Decode raw bytes, guessing the format from the content
pub fn decode_image(bytes: bytes::Bytes) -> Result<DynamicImage, FetchError> {
    let reader = image::ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| FetchError::DecodeError(image::ImageError::IoError(e)))?;

    Ok(reader.decode()?)
}

/// Fetch the body, retrying 5xx and transport failures. 4xx fails at once.
async fn download_with_retry(
    client: &reqwest::Client,
    url: &str,
    retry: &RetryPolicy,
) -> Result<bytes::Bytes, FetchError> {
    let mut last_error = None;

    for attempt in 0..retry.max_attempts {
        if attempt > 0 {
            let delay = retry.delay_before(attempt);
            tracing::debug!("Retry attempt {}/{}, waiting {:?}", attempt + 1, retry.max_attempts, delay);
            tokio::time::sleep(delay).await;
        }

        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    match response.bytes().await {
                        Ok(bytes) => return Ok(bytes),
                        Err(e) => {
                            tracing::warn!("Failed to read response body: {}", e);
                            last_error = Some(FetchError::RequestError(e));
                        }
                    }
                } else if status.is_client_error() {
                    // 4xx will not get better on retry
                    return Err(FetchError::HttpError {
                        status: status.as_u16(),
                    });
                } else {
                    tracing::warn!("HTTP error: {} for {}", status, url);
                    last_error = Some(FetchError::HttpError {
                        status: status.as_u16(),
                    });
                }
            }
            Err(e) => {
                tracing::warn!("Request failed: {} for {}", e, url);
                last_error = Some(FetchError::RequestError(e));
            }
        }
    }

    Err(last_error.unwrap_or(FetchError::Timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb};

    #[tokio::test]
    async fn empty_url_is_rejected_before_any_request() {
        let err = download_image("   ", &RetryPolicy::default()).await.unwrap_err();
        assert!(matches!(err, FetchError::EmptyUrl));
    }

    #[test]
    fn retry_delay_doubles_after_the_first_attempt() {
        let retry = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
        };
        let delays: Vec<_> = (0..4).map(|n| retry.delay_before(n)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::ZERO,
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
            ]
        );
    }

    #[tokio::test]
    async fn zero_attempts_fail_without_a_request() {
        let retry = RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::ZERO,
        };
        let err = download_with_retry(http_client(), "http://127.0.0.1:9/none.jpg", &retry)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout));
    }

    #[test]
    fn decodes_png_bytes_without_extension_hint() {
        let img = ImageBuffer::from_pixel(4, 3, Rgb([10u8, 20, 30]));
        let mut encoded = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut encoded), ImageFormat::Png)
            .unwrap();

        let decoded = decode_image(bytes::Bytes::from(encoded)).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = decode_image(bytes::Bytes::from_static(b"not an image")).unwrap_err();
        assert!(matches!(err, FetchError::DecodeError(_)));
    }
}
