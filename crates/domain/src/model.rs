//! Domain models and value objects

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use time::OffsetDateTime;

use crate::naming::{count_words, normalize_author};

/// An article as produced by a source adapter, before persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceArticle {
    /// Remote ID, unique within its source
    pub source_id: String,
    /// Name of the adapter that produced it (e.g. "feedly")
    pub source_name: String,
    pub title: String,
    /// Raw author as reported by the source
    pub author: Option<String>,
    pub content_html: Option<String>,
    pub excerpt: Option<String>,
    pub url: Option<String>,
    /// Publication / feed name, used for grouping
    pub publication_name: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    /// Labels in source order (Feedly folders arrive here)
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A normalized article ready to be upserted into the store
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub source: SourceArticle,
    /// Lower-cased, whitespace-collapsed author
    pub author_normalized: Option<String>,
    pub fetched_at: OffsetDateTime,
    pub word_count: Option<u32>,
}

impl NewArticle {
    /// Derive the normalized fields from a freshly fetched source article
    pub fn from_source(source: SourceArticle, fetched_at: OffsetDateTime) -> Self {
        let author_normalized = source.author.as_deref().and_then(normalize_author);
        let word_count = source.content_html.as_deref().map(count_words);
        Self {
            source,
            author_normalized,
            fetched_at,
            word_count,
        }
    }
}

/// A persisted article
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    pub id: i64,
    pub source_id: String,
    pub source_name: String,
    pub title: String,
    pub author: Option<String>,
    pub author_normalized: Option<String>,
    pub content_html: Option<String>,
    pub excerpt: Option<String>,
    pub url: Option<String>,
    pub publication_name: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    pub word_count: Option<u32>,
    pub tags: Vec<String>,
    pub bundled: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_bundled_at: Option<OffsetDateTime>,
}

/// Attribute used to select which unbundled articles are assembled together
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// Normalized author name
    Author(String),
    /// Publication name
    Publication(String),
}

impl GroupKey {
    /// Author key, normalizing the given name
    pub fn author(name: &str) -> Self {
        Self::Author(normalize_author(name).unwrap_or_default())
    }

    pub fn publication(name: impl Into<String>) -> Self {
        Self::Publication(name.into())
    }

    /// The grouping value itself, used as the bundle title prefix
    pub fn label(&self) -> &str {
        match self {
            Self::Author(name) | Self::Publication(name) => name,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Author(name) => write!(f, "author '{}'", name),
            Self::Publication(name) => write!(f, "publication '{}'", name),
        }
    }
}

/// Filter for listing articles
#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    /// Substring match on the normalized author
    pub author: Option<String>,
    pub unbundled_only: bool,
    pub limit: Option<usize>,
}

/// Per-publication counts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicationSummary {
    pub publication_name: String,
    pub article_count: u64,
    pub unbundled_count: u64,
}

/// Per-author counts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorSummary {
    /// One raw spelling of the author
    pub author: String,
    pub author_normalized: String,
    pub article_count: u64,
    pub unbundled_count: u64,
}

/// A bundle about to be recorded
#[derive(Debug, Clone)]
pub struct NewBundle {
    pub title: String,
    pub file_path: PathBuf,
    /// Size of the file as written to disk
    pub file_size: u64,
    /// Member articles in reading order
    pub article_ids: Vec<i64>,
}

/// A persisted bundle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bundle {
    pub id: i64,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub article_count: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub sent_at: Option<OffsetDateTime>,
    /// Recipients exactly as sent
    pub sent_to: Option<Vec<String>>,
}

impl Bundle {
    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }
}

/// Status of an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync status: {}", other)),
        }
    }
}

/// Terminal outcome of an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed { fetched: u64, new_articles: u64 },
    Failed { fetched: u64, new_articles: u64 },
}

/// Options for a source fetch
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Stop once items at or before this instant are observed
    pub newer_than: Option<OffsetDateTime>,
    /// Hard cap on items yielded across all batches
    pub count: Option<usize>,
}

/// A remote grouping (Feedly collection, Substack publication)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Collection {
    pub id: String,
    pub label: String,
}

/// One chapter of an archive, in reading order
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub title: String,
    /// Plain-text byline ("By X · Publication · January 2, 2024")
    pub byline: Option<String>,
    pub source_url: Option<String>,
    /// Unsanitized article HTML
    pub body_html: Option<String>,
}

/// Everything an archive encoder needs to produce one archive
#[derive(Debug, Clone)]
pub struct ArchiveRequest {
    pub title: String,
    /// Creator metadata
    pub author: String,
    pub chapters: Vec<Chapter>,
    /// Embed remote images instead of stripping them
    pub with_images: bool,
    /// Modification stamp written into the package metadata
    pub modified: OffsetDateTime,
}

/// An outgoing email with a single attachment
#[derive(Debug, Clone)]
pub struct MailMessage {
    pub from: String,
    /// All recipients go into the To header of a single message
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment: MailAttachment,
}

#[derive(Debug, Clone)]
pub struct MailAttachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// A bundle file written to storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    /// Size reported by the filesystem after the write
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_source() -> SourceArticle {
        SourceArticle {
            source_id: "entry-1".to_string(),
            source_name: "feedly".to_string(),
            title: "Hello".to_string(),
            author: Some("  Jane   DOE ".to_string()),
            content_html: Some("<p>one two</p><p>three</p>".to_string()),
            excerpt: None,
            url: None,
            publication_name: Some("Weekly".to_string()),
            published_at: None,
            tags: vec![],
        }
    }

    #[test]
    fn test_new_article_derives_normalized_fields() {
        let article = NewArticle::from_source(sample_source(), OffsetDateTime::UNIX_EPOCH);
        assert_eq!(article.author_normalized.as_deref(), Some("jane doe"));
        assert_eq!(article.word_count, Some(3));
    }

    #[test]
    fn test_new_article_without_content_has_no_word_count() {
        let mut source = sample_source();
        source.content_html = None;
        source.author = None;
        let article = NewArticle::from_source(source, OffsetDateTime::UNIX_EPOCH);
        assert_eq!(article.word_count, None);
        assert_eq!(article.author_normalized, None);
    }

    #[test]
    fn test_group_key_author_is_normalized() {
        let key = GroupKey::author("Matt  LEVINE");
        assert_eq!(key, GroupKey::Author("matt levine".to_string()));
        assert_eq!(key.label(), "matt levine");
    }

    #[test]
    fn test_sync_status_parses() {
        assert_eq!("completed".parse::<SyncStatus>(), Ok(SyncStatus::Completed));
        assert!("bogus".parse::<SyncStatus>().is_err());
    }
}
