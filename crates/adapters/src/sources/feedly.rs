//! Feedly stream adapter

use async_trait::async_trait;
use articles2kindle_domain::{
    ArticleStream, Collection, FetchOptions, SourceAdapter, SourceArticle, SourceError,
};
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use time::OffsetDateTime;

use super::{EXCERPT_CHARS, FetchBudget, HttpPolicy, auth_hint, decode_json, truncate_chars};

pub const DEFAULT_FEEDLY_URL: &str = "https://cloud.feedly.com";

const SOURCE_NAME: &str = "feedly";
const PAGE_SIZE: usize = 100;
const AUTH_HINT: &str = "Feedly access token rejected; generate a new one and update the environment";

#[derive(Debug, Deserialize)]
struct StreamPage {
    #[serde(default)]
    continuation: Option<String>,
    #[serde(default)]
    items: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Entry {
    id: String,
    title: Option<String>,
    author: Option<String>,
    content: Option<Content>,
    summary: Option<Content>,
    alternate: Vec<Link>,
    origin: Option<Origin>,
    /// Epoch milliseconds
    published: Option<i64>,
    tags: Vec<Label>,
    categories: Vec<Label>,
}

#[derive(Debug, Deserialize)]
struct Content {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Deserialize)]
struct Origin {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Label {
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CollectionEntry {
    id: String,
    #[serde(default)]
    label: Option<String>,
}

fn from_epoch_millis(ms: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
}

fn to_epoch_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

fn map_entry(entry: Entry) -> SourceArticle {
    let summary = entry.summary.map(|s| s.content);
    let content_html = entry
        .content
        .map(|c| c.content)
        .or_else(|| summary.clone());
    let tags = entry
        .tags
        .into_iter()
        .chain(entry.categories)
        .filter_map(|l| l.label)
        .collect();

    SourceArticle {
        source_id: entry.id,
        source_name: SOURCE_NAME.to_string(),
        title: entry
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Untitled".to_string()),
        author: entry.author,
        content_html,
        excerpt: summary.map(|s| truncate_chars(&s, EXCERPT_CHARS)),
        url: entry.alternate.into_iter().next().map(|l| l.href),
        publication_name: entry.origin.and_then(|o| o.title),
        published_at: entry.published.and_then(from_epoch_millis),
        tags,
    }
}

/// Paging state between batches
struct Cursor {
    continuation: Option<String>,
    budget: FetchBudget,
    finished: bool,
}

/// Reads one Feedly stream (a category, tag or the global "all" stream)
pub struct FeedlySource {
    client: Client,
    policy: HttpPolicy,
    access_token: SecretString,
    stream_id: String,
    base_url: String,
}

impl FeedlySource {
    pub fn new(access_token: SecretString, stream_id: String, policy: HttpPolicy) -> Self {
        Self::with_base_url(access_token, stream_id, policy, DEFAULT_FEEDLY_URL.to_string())
    }

    pub fn with_base_url(
        access_token: SecretString,
        stream_id: String,
        policy: HttpPolicy,
        base_url: String,
    ) -> Self {
        Self {
            client: policy.client(),
            policy,
            access_token,
            stream_id,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }

    async fn stream_page(
        &self,
        count: usize,
        newer_than: Option<OffsetDateTime>,
        continuation: Option<&str>,
    ) -> Result<StreamPage, SourceError> {
        let mut query: Vec<(&str, String)> = vec![
            ("streamId", self.stream_id.clone()),
            ("count", count.to_string()),
        ];
        if let Some(watermark) = newer_than {
            query.push(("newerThan", to_epoch_millis(watermark).to_string()));
        }
        if let Some(token) = continuation {
            query.push(("continuation", token.to_string()));
        }

        let request = self
            .client
            .get(format!("{}/v3/streams/contents", self.base_url))
            .header("Authorization", self.bearer())
            .query(&query);

        let response = self
            .policy
            .send(request)
            .await
            .map_err(|e| auth_hint(e, AUTH_HINT))?;
        decode_json(response).await
    }

    async fn collections(&self) -> Result<Vec<CollectionEntry>, SourceError> {
        let request = self
            .client
            .get(format!("{}/v3/collections", self.base_url))
            .header("Authorization", self.bearer());

        let response = self
            .policy
            .send(request)
            .await
            .map_err(|e| auth_hint(e, AUTH_HINT))?;
        decode_json(response).await
    }
}

#[async_trait]
impl SourceAdapter for FeedlySource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn validate_connection(&self) -> Result<(), SourceError> {
        self.collections().await.map(|_| ())
    }

    fn fetch_articles(&self, options: FetchOptions) -> ArticleStream<'_> {
        let cursor = Cursor {
            continuation: None,
            budget: FetchBudget::new(options),
            finished: false,
        };

        futures::stream::try_unfold(cursor, move |mut cursor| async move {
            if cursor.finished || cursor.budget.spent() {
                return Ok(None);
            }

            let page = self
                .stream_page(
                    cursor.budget.page_size(PAGE_SIZE),
                    options.newer_than,
                    cursor.continuation.as_deref(),
                )
                .await?;

            let mut batch = Vec::with_capacity(page.items.len());
            for entry in page.items {
                if cursor.budget.spent() {
                    break;
                }
                let article = map_entry(entry);
                if cursor.budget.is_stale(article.published_at) {
                    cursor.finished = true;
                    break;
                }
                batch.push(article);
                cursor.budget.take();
            }

            cursor.continuation = page.continuation;
            if cursor.continuation.is_none() {
                cursor.finished = true;
            }

            tracing::debug!(
                source = SOURCE_NAME,
                items = batch.len(),
                more = !cursor.finished,
                "Fetched page"
            );

            if batch.is_empty() {
                return Ok(None);
            }
            Ok::<_, SourceError>(Some((batch, cursor)))
        })
        .boxed()
    }

    async fn list_groups(&self) -> Result<Vec<Collection>, SourceError> {
        Ok(self
            .collections()
            .await?
            .into_iter()
            .map(|c| Collection {
                label: c.label.unwrap_or_else(|| c.id.clone()),
                id: c.id,
            })
            .collect())
    }
}
