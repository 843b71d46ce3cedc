//! Remote image downloads for embedding

use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

const IMAGE_TIMEOUT: Duration = Duration::from_secs(5);
const IMAGE_RETRIES: u32 = 1;

/// A downloaded image ready to embed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
    pub extension: &'static str,
}

const IMAGE_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
];

fn type_for_media(media_type: &str) -> Option<(&'static str, &'static str)> {
    let media_type = media_type.split(';').next()?.trim().to_ascii_lowercase();
    let media_type = if media_type == "image/jpg" {
        "image/jpeg".to_string()
    } else {
        media_type
    };
    IMAGE_TYPES
        .iter()
        .find(|(m, _)| *m == media_type)
        .copied()
}

fn type_for_url(url: &str) -> Option<(&'static str, &'static str)> {
    let path = url.split(['?', '#']).next()?;
    let extension = path.rsplit('.').next()?.to_ascii_lowercase();
    let extension = if extension == "jpeg" {
        "jpg".to_string()
    } else {
        extension
    };
    IMAGE_TYPES
        .iter()
        .find(|(_, e)| *e == extension)
        .copied()
}

/// Downloads each image URL at most once; failures are remembered too
pub struct ImageFetcher {
    client: Client,
    retries: u32,
    cache: Mutex<HashMap<String, Option<Arc<FetchedImage>>>>,
}

impl Default for ImageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageFetcher {
    pub fn new() -> Self {
        Self::with_timeout(IMAGE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("articles2kindle/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            retries: IMAGE_RETRIES,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch an image, or `None` if it could not be downloaded.
    ///
    /// A failed image is logged and left out; it never fails the archive.
    pub async fn fetch(&self, url: &str) -> Option<Arc<FetchedImage>> {
        if let Some(cached) = self.cache.lock().await.get(url) {
            return cached.clone();
        }

        let fetched = match self.download(url).await {
            Ok(image) => Some(Arc::new(image)),
            Err(reason) => {
                tracing::warn!(url = %url, reason = %reason, "Skipping image");
                None
            }
        };

        self.cache
            .lock()
            .await
            .insert(url.to_string(), fetched.clone());
        fetched
    }

    async fn download(&self, url: &str) -> Result<FetchedImage, String> {
        let mut last_error = String::new();

        for attempt in 0..=self.retries {
            if attempt > 0 {
                sleep(Duration::from_millis(500 * 2u64.pow(attempt - 1))).await;
            }

            let response = match self.client.get(url).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                last_error = format!("HTTP {}", status.as_u16());
                if status.is_server_error() {
                    continue;
                }
                return Err(last_error);
            }

            let header_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .and_then(type_for_media);
            let (media_type, extension) = header_type
                .or_else(|| type_for_url(url))
                .ok_or_else(|| "unsupported image type".to_string())?;

            return match response.bytes().await {
                Ok(bytes) => Ok(FetchedImage {
                    bytes: bytes.to_vec(),
                    media_type,
                    extension,
                }),
                Err(e) => Err(e.to_string()),
            };
        }

        Err(last_error)
    }
}
