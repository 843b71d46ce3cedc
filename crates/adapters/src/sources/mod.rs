//! Read-later source adapters

mod feedly;
mod substack;

pub use feedly::{DEFAULT_FEEDLY_URL, FeedlySource};
pub use substack::{DEFAULT_REQUEST_DELAY, SubstackPublication, SubstackSource};

use async_trait::async_trait;
use articles2kindle_domain::{
    ArticleStream, Collection, FetchOptions, SourceAdapter, SourceArticle, SourceError,
};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::sleep;

/// Longest excerpt kept from a source, in characters
pub(crate) const EXCERPT_CHARS: usize = 500;

/// Timeout and retry budget shared by HTTP sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpPolicy {
    pub timeout: Duration,
    /// Extra attempts after the first, on network errors, 429 and 5xx
    pub retries: u32,
}

impl Default for HttpPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 2,
        }
    }
}

impl HttpPolicy {
    pub(crate) fn client(&self) -> Client {
        Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("articles2kindle/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to build HTTP client")
    }

    fn backoff(attempt: u32) -> Duration {
        Duration::from_millis(500 * 2u64.pow(attempt.saturating_sub(1)))
    }

    /// Send with retries, mapping failures onto `SourceError`.
    ///
    /// 401/403 become `Auth`, other non-2xx `RemoteApi`.
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Response, SourceError> {
        let mut last_error = SourceError::Network("Request was never sent".to_string());

        for attempt in 0..=self.retries {
            if attempt > 0 {
                let delay = Self::backoff(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying request");
                sleep(delay).await;
            }

            let Some(request) = request.try_clone() else {
                return Err(SourceError::Network(
                    "Request cannot be retried".to_string(),
                ));
            };

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = SourceError::Network(e.to_string());
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(SourceError::Auth(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    body
                )));
            }

            let error = SourceError::RemoteApi {
                status: status.as_u16(),
                body,
            };
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                tracing::warn!(status = status.as_u16(), attempt, "Retryable HTTP status");
                last_error = error;
                continue;
            }
            return Err(error);
        }

        Err(last_error)
    }
}

pub(crate) async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, SourceError> {
    response
        .json()
        .await
        .map_err(|e| SourceError::Decode(e.to_string()))
}

/// Replace the detail of an `Auth` error with a user-facing hint
pub(crate) fn auth_hint(error: SourceError, hint: &str) -> SourceError {
    match error {
        SourceError::Auth(detail) => SourceError::Auth(format!("{} ({})", hint, detail)),
        other => other,
    }
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Item-level stop rules every adapter applies while paging
#[derive(Debug, Clone, Copy)]
pub(crate) struct FetchBudget {
    newer_than: Option<OffsetDateTime>,
    remaining: Option<usize>,
}

impl FetchBudget {
    pub(crate) fn new(options: FetchOptions) -> Self {
        Self {
            newer_than: options.newer_than,
            remaining: options.count,
        }
    }

    /// The count cap has been reached
    pub(crate) fn spent(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Items at or before the watermark end the (reverse-chronological) listing
    pub(crate) fn is_stale(&self, published_at: Option<OffsetDateTime>) -> bool {
        match (self.newer_than, published_at) {
            (Some(watermark), Some(published)) => published <= watermark,
            _ => false,
        }
    }

    pub(crate) fn take(&mut self) {
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
    }

    /// Page size for the next request, never more than what is left
    pub(crate) fn page_size(&self, max: usize) -> usize {
        self.remaining.map_or(max, |remaining| remaining.min(max))
    }
}

/// Source that replays fixed batches, optionally failing at the end
pub struct StubSource {
    name: &'static str,
    batches: Vec<Vec<SourceArticle>>,
    fail_with: Option<String>,
    groups: Vec<Collection>,
    seen_options: Mutex<Vec<FetchOptions>>,
}

impl StubSource {
    pub fn new(name: &'static str, batches: Vec<Vec<SourceArticle>>) -> Self {
        Self {
            name,
            batches,
            fail_with: None,
            groups: vec![],
            seen_options: Mutex::new(vec![]),
        }
    }

    /// Yield every batch, then a network error
    pub fn failing_after(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    pub fn with_groups(mut self, groups: Vec<Collection>) -> Self {
        self.groups = groups;
        self
    }

    /// Options of every fetch so far
    pub fn seen_options(&self) -> Vec<FetchOptions> {
        self.seen_options.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for StubSource {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn validate_connection(&self) -> Result<(), SourceError> {
        Ok(())
    }

    fn fetch_articles(&self, options: FetchOptions) -> ArticleStream<'_> {
        self.seen_options.lock().unwrap().push(options);

        let mut budget = FetchBudget::new(options);
        let mut out: Vec<Result<Vec<SourceArticle>, SourceError>> = Vec::new();
        let mut stopped = false;

        for batch in &self.batches {
            let mut kept = Vec::new();
            for article in batch {
                if budget.spent() || budget.is_stale(article.published_at) {
                    stopped = true;
                    break;
                }
                kept.push(article.clone());
                budget.take();
            }
            if !kept.is_empty() {
                out.push(Ok(kept));
            }
            if stopped {
                break;
            }
        }
        if !stopped && !budget.spent() {
            if let Some(message) = &self.fail_with {
                out.push(Err(SourceError::Network(message.clone())));
            }
        }

        futures::stream::iter(out).boxed()
    }

    async fn list_groups(&self) -> Result<Vec<Collection>, SourceError> {
        Ok(self.groups.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use time::macros::datetime;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn article(id: &str, published_at: OffsetDateTime) -> SourceArticle {
        SourceArticle {
            source_id: id.to_string(),
            source_name: "stub".to_string(),
            title: format!("Article {}", id),
            author: None,
            content_html: None,
            excerpt: None,
            url: None,
            publication_name: Some("Stub Weekly".to_string()),
            published_at: Some(published_at),
            tags: vec![],
        }
    }

    #[test]
    fn test_budget() {
        let mut budget = FetchBudget::new(FetchOptions {
            newer_than: Some(datetime!(2024-03-01 00:00 UTC)),
            count: Some(2),
        });

        assert_eq!(budget.page_size(100), 2);
        assert!(budget.is_stale(Some(datetime!(2024-03-01 00:00 UTC))));
        assert!(!budget.is_stale(Some(datetime!(2024-03-01 00:01 UTC))));
        assert!(!budget.is_stale(None));

        budget.take();
        budget.take();
        assert!(budget.spent());
        assert_eq!(budget.page_size(100), 0);
    }

    #[tokio::test]
    async fn test_stub_stops_at_watermark() {
        let source = StubSource::new(
            "stub",
            vec![
                vec![
                    article("3", datetime!(2024-03-03 00:00 UTC)),
                    article("2", datetime!(2024-03-02 00:00 UTC)),
                ],
                vec![article("1", datetime!(2024-03-01 00:00 UTC))],
            ],
        )
        .failing_after("never reached");

        let batches: Vec<_> = source
            .fetch_articles(FetchOptions {
                newer_than: Some(datetime!(2024-03-02 00:00 UTC)),
                count: None,
            })
            .try_collect()
            .await
            .unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].source_id, "3");
    }

    #[tokio::test]
    async fn test_policy_maps_auth_and_remote_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
            .expect(1)
            .mount(&server)
            .await;

        let policy = HttpPolicy {
            timeout: Duration::from_secs(5),
            retries: 2,
        };
        let client = policy.client();

        let err = policy
            .send(client.get(format!("{}/auth", server.uri())))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Auth(_)));

        let err = policy
            .send(client.get(format!("{}/missing", server.uri())))
            .await
            .unwrap_err();
        match err {
            SourceError::RemoteApi { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_policy_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let policy = HttpPolicy {
            timeout: Duration::from_secs(5),
            retries: 1,
        };
        let response = policy
            .send(policy.client().get(format!("{}/flaky", server.uri())))
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "ok");
    }
}
