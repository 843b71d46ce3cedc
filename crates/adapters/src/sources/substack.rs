//! Substack publication archive adapter

use async_trait::async_trait;
use articles2kindle_domain::{
    ArticleStream, Collection, FetchOptions, SourceAdapter, SourceArticle, SourceError,
};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::time::sleep;

use super::{EXCERPT_CHARS, FetchBudget, HttpPolicy, auth_hint, decode_json, truncate_chars};

const SOURCE_NAME: &str = "substack";
const ARCHIVE_PAGE_SIZE: usize = 12;
const AUTH_HINT: &str = "Substack session rejected; the SUBSTACK_CONNECT_SID cookie may be expired";

/// Pause before each full-post request
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(200);

/// One configured publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstackPublication {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl SubstackPublication {
    fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    fn host(&self) -> String {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.url.clone())
    }

    /// Configured label, else the host without `www.`, `.substack.com` or `.com`
    fn display_name(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        let host = self.host();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        let host = host
            .strip_suffix(".substack.com")
            .or_else(|| host.strip_suffix(".com"))
            .unwrap_or(host);
        host.to_string()
    }
}

#[derive(Debug, Deserialize)]
struct Byline {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ArchivePost {
    #[serde(default)]
    title: String,
    slug: String,
    #[serde(default)]
    post_date: Option<String>,
    #[serde(default)]
    audience: Option<String>,
}

impl ArchivePost {
    fn is_paid(&self) -> bool {
        self.audience.as_deref() == Some("only_paid")
    }
}

#[derive(Debug, Deserialize)]
struct FullPost {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    post_date: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    truncated_body_text: Option<String>,
    #[serde(default)]
    canonical_url: Option<String>,
    #[serde(default, rename = "publishedBylines")]
    published_bylines: Vec<Byline>,
    #[serde(default)]
    body_html: Option<String>,
}

fn parse_post_date(date: Option<&str>) -> Option<OffsetDateTime> {
    date.and_then(|d| OffsetDateTime::parse(d, &Rfc3339).ok())
}

fn map_post(post: FullPost, publication: &SubstackPublication) -> SourceArticle {
    let excerpt = [post.description.as_deref(), post.truncated_body_text.as_deref()]
        .into_iter()
        .flatten()
        .find(|text| !text.is_empty())
        .map(|text| truncate_chars(text, EXCERPT_CHARS));

    SourceArticle {
        source_id: format!("substack-{}-{}", publication.host(), post.id),
        source_name: SOURCE_NAME.to_string(),
        title: if post.title.trim().is_empty() {
            "Untitled".to_string()
        } else {
            post.title
        },
        author: post.published_bylines.into_iter().next().map(|b| b.name),
        content_html: post.body_html,
        excerpt,
        url: post.canonical_url,
        publication_name: Some(publication.display_name()),
        published_at: parse_post_date(post.post_date.as_deref()),
        tags: vec![],
    }
}

/// Position in the list of publications
struct Cursor {
    publication: usize,
    offset: usize,
    budget: FetchBudget,
}

impl Cursor {
    fn next_publication(&mut self) {
        self.publication += 1;
        self.offset = 0;
    }
}

/// Reads the archives of a fixed list of Substack publications
pub struct SubstackSource {
    client: Client,
    policy: HttpPolicy,
    publications: Vec<SubstackPublication>,
    connect_sid: Option<SecretString>,
    request_delay: Duration,
}

impl SubstackSource {
    pub fn new(
        publications: Vec<SubstackPublication>,
        connect_sid: Option<SecretString>,
        policy: HttpPolicy,
    ) -> Self {
        Self {
            client: policy.client(),
            policy,
            publications,
            connect_sid,
            request_delay: DEFAULT_REQUEST_DELAY,
        }
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.connect_sid {
            Some(sid) => request.header("Cookie", format!("connect.sid={}", sid.expose_secret())),
            None => request,
        }
    }

    async fn archive_page(
        &self,
        publication: &SubstackPublication,
        offset: usize,
    ) -> Result<Vec<ArchivePost>, SourceError> {
        let request = self
            .client
            .get(format!("{}/api/v1/archive", publication.base_url()))
            .query(&[
                ("sort", "new".to_string()),
                ("limit", ARCHIVE_PAGE_SIZE.to_string()),
                ("offset", offset.to_string()),
            ]);

        let response = self.policy.send(self.authorized(request)).await?;
        decode_json(response).await
    }

    async fn full_post(
        &self,
        publication: &SubstackPublication,
        slug: &str,
    ) -> Result<FullPost, SourceError> {
        sleep(self.request_delay).await;

        let request = self
            .client
            .get(format!("{}/api/v1/posts/{}", publication.base_url(), slug));

        let response = self
            .policy
            .send(self.authorized(request))
            .await
            .map_err(|e| auth_hint(e, AUTH_HINT))?;
        decode_json(response).await
    }
}

#[async_trait]
impl SourceAdapter for SubstackSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn validate_connection(&self) -> Result<(), SourceError> {
        let first = self.publications.first().ok_or_else(|| {
            SourceError::Config("No Substack publications configured".to_string())
        })?;
        self.archive_page(first, 0).await.map(|_| ())
    }

    fn fetch_articles(&self, options: FetchOptions) -> ArticleStream<'_> {
        let cursor = Cursor {
            publication: 0,
            offset: 0,
            budget: FetchBudget::new(options),
        };

        futures::stream::try_unfold(cursor, move |mut cursor| async move {
            loop {
                if cursor.budget.spent() {
                    return Ok(None);
                }
                let Some(publication) = self.publications.get(cursor.publication) else {
                    return Ok(None);
                };

                let page = self.archive_page(publication, cursor.offset).await?;
                if page.is_empty() {
                    cursor.next_publication();
                    continue;
                }
                cursor.offset += page.len();

                let mut batch = Vec::new();
                let mut reached_old = false;
                for post in page {
                    if cursor.budget.spent() {
                        break;
                    }
                    if cursor
                        .budget
                        .is_stale(parse_post_date(post.post_date.as_deref()))
                    {
                        reached_old = true;
                        break;
                    }
                    if post.is_paid() && self.connect_sid.is_none() {
                        tracing::warn!(
                            title = %post.title,
                            publication = %publication.url,
                            "Skipping paid post; set SUBSTACK_CONNECT_SID to fetch paid content"
                        );
                        continue;
                    }

                    let full = self.full_post(publication, &post.slug).await?;
                    batch.push(map_post(full, publication));
                    cursor.budget.take();
                }

                if reached_old {
                    cursor.next_publication();
                }

                tracing::debug!(
                    source = SOURCE_NAME,
                    publication = %publication.url,
                    items = batch.len(),
                    "Fetched archive page"
                );

                if !batch.is_empty() {
                    return Ok::<_, SourceError>(Some((batch, cursor)));
                }
            }
        })
        .boxed()
    }

    async fn list_groups(&self) -> Result<Vec<Collection>, SourceError> {
        Ok(self
            .publications
            .iter()
            .map(|p| Collection {
                id: p.url.clone(),
                label: p.label.clone().unwrap_or_else(|| p.url.clone()),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;
    use time::macros::datetime;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn publication(server: &MockServer, label: Option<&str>) -> SubstackPublication {
        SubstackPublication {
            url: format!("{}/", server.uri()),
            label: label.map(str::to_string),
        }
    }

    fn source(publications: Vec<SubstackPublication>, sid: Option<&str>) -> SubstackSource {
        SubstackSource::new(
            publications,
            sid.map(|s| SecretString::new(s.into())),
            HttpPolicy {
                timeout: Duration::from_secs(5),
                retries: 0,
            },
        )
        .with_request_delay(Duration::ZERO)
    }

    fn archive_post(id: i64, slug: &str, date: &str, audience: &str) -> serde_json::Value {
        json!({
            "id": id,
            "title": format!("Post {}", id),
            "slug": slug,
            "post_date": date,
            "audience": audience,
            "wordcount": 100,
            "description": "",
            "truncated_body_text": "",
            "canonical_url": format!("https://example.substack.com/p/{}", slug),
            "publishedBylines": [{ "id": 1, "name": "Jane Doe" }]
        })
    }

    fn full_post(id: i64, slug: &str, date: &str) -> serde_json::Value {
        json!({
            "id": id,
            "title": format!("Post {}", id),
            "slug": slug,
            "post_date": date,
            "audience": "everyone",
            "description": "",
            "truncated_body_text": "Body text preview",
            "canonical_url": format!("https://example.substack.com/p/{}", slug),
            "publishedBylines": [{ "id": 1, "name": "Jane Doe" }, { "id": 2, "name": "Co Author" }],
            "body_html": format!("<p>Post {} body</p>", id)
        })
    }

    async fn mount_post(server: &MockServer, id: i64, slug: &str, date: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/posts/{}", slug)))
            .respond_with(ResponseTemplate::new(200).set_body_json(full_post(id, slug, date)))
            .mount(server)
            .await;
    }

    #[test]
    fn test_display_name() {
        let named = |url: &str| SubstackPublication {
            url: url.to_string(),
            label: None,
        };
        assert_eq!(named("https://www.noahpinion.blog/").display_name(), "noahpinion.blog");
        assert_eq!(named("https://astralcodexten.substack.com").display_name(), "astralcodexten");
        assert_eq!(named("https://www.slowboring.com").display_name(), "slowboring");

        let labeled = SubstackPublication {
            url: "https://www.slowboring.com".to_string(),
            label: Some("Slow Boring".to_string()),
        };
        assert_eq!(labeled.display_name(), "Slow Boring");
    }

    #[tokio::test]
    async fn test_fetch_maps_posts_and_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/archive"))
            .and(query_param("offset", "0"))
            .and(query_param("sort", "new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                archive_post(2, "second", "2024-03-02T12:00:00.000Z", "everyone"),
                archive_post(1, "first", "2024-03-01T12:00:00.000Z", "everyone")
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/archive"))
            .and(query_param("offset", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;
        mount_post(&server, 2, "second", "2024-03-02T12:00:00.000Z").await;
        mount_post(&server, 1, "first", "2024-03-01T12:00:00.000Z").await;

        let batches: Vec<Vec<SourceArticle>> =
            source(vec![publication(&server, Some("Example"))], None)
                .fetch_articles(FetchOptions::default())
                .try_collect()
                .await
                .unwrap();

        assert_eq!(batches.len(), 1);
        let article = &batches[0][0];
        assert_eq!(article.source_id, "substack-127.0.0.1-2");
        assert_eq!(article.source_name, "substack");
        assert_eq!(article.author.as_deref(), Some("Jane Doe"));
        assert_eq!(article.publication_name.as_deref(), Some("Example"));
        assert_eq!(article.excerpt.as_deref(), Some("Body text preview"));
        assert_eq!(article.content_html.as_deref(), Some("<p>Post 2 body</p>"));
        assert_eq!(article.published_at, Some(datetime!(2024-03-02 12:00 UTC)));
        assert_eq!(batches[0][1].source_id, "substack-127.0.0.1-1");
    }

    #[tokio::test]
    async fn test_paid_posts_skipped_without_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/archive"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                archive_post(2, "paid", "2024-03-02T12:00:00Z", "only_paid"),
                archive_post(1, "free", "2024-03-01T12:00:00Z", "everyone")
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/archive"))
            .and(query_param("offset", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/posts/paid"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        mount_post(&server, 1, "free", "2024-03-01T12:00:00Z").await;

        let articles: Vec<SourceArticle> = source(vec![publication(&server, None)], None)
            .fetch_articles(FetchOptions::default())
            .try_collect::<Vec<_>>()
            .await
            .unwrap()
            .concat();

        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].source_id, "substack-127.0.0.1-1");
    }

    #[tokio::test]
    async fn test_watermark_stops_publication_and_cookie_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/archive"))
            .and(query_param("offset", "0"))
            .and(header("cookie", "connect.sid=s%3Asecret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                archive_post(3, "new", "2024-03-03T12:00:00Z", "only_paid"),
                archive_post(2, "old", "2024-03-02T12:00:00Z", "everyone")
            ])))
            .expect(1)
            .mount(&server)
            .await;
        mount_post(&server, 3, "new", "2024-03-03T12:00:00Z").await;
        Mock::given(method("GET"))
            .and(path("/api/v1/posts/old"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let articles: Vec<SourceArticle> =
            source(vec![publication(&server, None)], Some("s%3Asecret"))
                .fetch_articles(FetchOptions {
                    newer_than: Some(datetime!(2024-03-02 12:00 UTC)),
                    count: None,
                })
                .try_collect::<Vec<_>>()
                .await
                .unwrap()
                .concat();

        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Post 3");
    }

    #[tokio::test]
    async fn test_count_caps_across_publications() {
        let first = MockServer::start().await;
        let second = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/archive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                archive_post(1, "only", "2024-03-01T12:00:00Z", "everyone")
            ])))
            .up_to_n_times(1)
            .mount(&first)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/archive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&first)
            .await;
        mount_post(&first, 1, "only", "2024-03-01T12:00:00Z").await;
        Mock::given(method("GET"))
            .and(path("/api/v1/archive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                archive_post(7, "a", "2024-03-05T12:00:00Z", "everyone"),
                archive_post(6, "b", "2024-03-04T12:00:00Z", "everyone")
            ])))
            .expect(1)
            .mount(&second)
            .await;
        mount_post(&second, 7, "a", "2024-03-05T12:00:00Z").await;

        let articles: Vec<SourceArticle> = source(
            vec![publication(&first, None), publication(&second, None)],
            None,
        )
        .fetch_articles(FetchOptions {
            newer_than: None,
            count: Some(2),
        })
        .try_collect::<Vec<_>>()
        .await
        .unwrap()
        .concat();

        assert_eq!(articles.len(), 2);
        assert_eq!(articles[1].title, "Post 7");
    }

    #[tokio::test]
    async fn test_expired_cookie_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/archive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                archive_post(1, "locked", "2024-03-01T12:00:00Z", "only_paid")
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/posts/locked"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = source(vec![publication(&server, None)], Some("stale"))
            .fetch_articles(FetchOptions::default())
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();

        match err {
            SourceError::Auth(message) => assert!(message.contains("SUBSTACK_CONNECT_SID")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_validate_requires_publications() {
        let err = source(vec![], None).validate_connection().await.unwrap_err();
        assert!(matches!(err, SourceError::Config(_)));
    }
}
