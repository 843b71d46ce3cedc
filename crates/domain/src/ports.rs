//! Port definitions (traits) for external dependencies
//!
//! These traits define the boundaries between the domain and external systems.
//! Adapters implement these traits to connect to real infrastructure.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::Path;
use thiserror::Error;
use time::OffsetDateTime;

use crate::model::{
    Article, ArticleFilter, ArchiveRequest, AuthorSummary, Bundle, Collection, FetchOptions,
    GroupKey, MailMessage, NewArticle, NewBundle, PublicationSummary, SourceArticle,
    StoredFile, SyncOutcome,
};

/// Error type for source adapter operations
#[derive(Debug, Error)]
pub enum SourceError {
    /// Expired or invalid credential; the user must reconfigure
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Remote API error {status}: {body}")]
    RemoteApi { status: u16, body: String },
    #[error("Invalid response: {0}")]
    Decode(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Lazy, finite sequence of article batches from one fetch
pub type ArticleStream<'a> = BoxStream<'a, Result<Vec<SourceArticle>, SourceError>>;

/// Port for a read-later service
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source name recorded on every article (e.g. "feedly")
    fn name(&self) -> &'static str;

    /// Check that credentials and remote endpoint work
    async fn validate_connection(&self) -> Result<(), SourceError>;

    /// Fetch articles newest first, one page per yielded batch.
    ///
    /// Stops (does not skip) at the first item at or before `newer_than`
    /// and never yields more than `count` items in total.
    fn fetch_articles(&self, options: FetchOptions) -> ArticleStream<'_>;

    /// List the remote groupings (collections, publications)
    async fn list_groups(&self) -> Result<Vec<Collection>, SourceError>;
}

/// Error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Port for persisted articles
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Insert unless `(source_name, source_id)` exists; true if inserted
    async fn upsert(&self, article: &NewArticle) -> Result<bool, StoreError>;

    /// Unbundled articles in a group, newest first, ties by insertion order
    async fn list_unbundled(&self, group: &GroupKey) -> Result<Vec<Article>, StoreError>;

    /// Flip `bundled` and stamp `last_bundled_at` for exactly these articles
    async fn mark_bundled(&self, ids: &[i64], at: OffsetDateTime) -> Result<(), StoreError>;

    async fn list_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>, StoreError>;

    async fn list_publications(&self) -> Result<Vec<PublicationSummary>, StoreError>;

    async fn list_authors(&self) -> Result<Vec<AuthorSummary>, StoreError>;

    /// Distinct publication names with at least one article carrying `tag`
    async fn publications_tagged(&self, tag: &str) -> Result<Vec<String>, StoreError>;

    /// Canonical key for a user-supplied group, if any article matches
    async fn resolve_group(&self, group: &GroupKey) -> Result<Option<GroupKey>, StoreError>;

    /// Mark every article unbundled again; returns how many changed
    async fn reset_bundled(&self) -> Result<u64, StoreError>;
}

/// Port for the ingestion run log (incremental-fetch watermark)
#[async_trait]
pub trait SyncLog: Send + Sync {
    /// Open a run with status `running`; returns its ID
    async fn start_sync(&self, source_name: &str, at: OffsetDateTime)
    -> Result<i64, StoreError>;

    /// Record the single terminal update of a run
    async fn finish_sync(
        &self,
        run_id: i64,
        outcome: SyncOutcome,
        at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Completion time of the latest completed run for a source
    async fn last_successful_sync(
        &self,
        source_name: &str,
    ) -> Result<Option<OffsetDateTime>, StoreError>;
}

/// Port for persisted bundles
#[async_trait]
pub trait BundleStore: Send + Sync {
    /// Atomically create the bundle row, its ordered membership rows and
    /// flip every member article to bundled. Nothing is visible on failure.
    async fn record_bundle(
        &self,
        bundle: &NewBundle,
        created_at: OffsetDateTime,
    ) -> Result<i64, StoreError>;

    async fn get_bundle(&self, id: i64) -> Result<Option<Bundle>, StoreError>;

    /// All bundles, newest first
    async fn list_bundles(&self) -> Result<Vec<Bundle>, StoreError>;

    async fn latest_unsent(&self) -> Result<Option<Bundle>, StoreError>;

    /// Member article IDs in reading order
    async fn bundle_article_ids(&self, id: i64) -> Result<Vec<i64>, StoreError>;

    async fn mark_sent(
        &self,
        id: i64,
        recipients: &[String],
        at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Delete the bundle and its membership rows; articles are untouched
    async fn delete_bundle(&self, id: i64) -> Result<(), StoreError>;
}

/// Error type for bundle file storage
#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Port for the directory holding one file per bundle
#[async_trait]
pub trait BundleFiles: Send + Sync {
    /// Write bytes under a collision-free name derived from `file_name`
    async fn write(&self, file_name: &str, bytes: &[u8]) -> Result<StoredFile, FileError>;

    async fn read(&self, path: &Path) -> Result<Vec<u8>, FileError>;

    /// On-disk size, `None` if the file is missing
    async fn size(&self, path: &Path) -> Result<Option<u64>, FileError>;

    async fn exists(&self, path: &Path) -> bool;

    async fn remove(&self, path: &Path) -> Result<(), FileError>;
}

/// Error type for archive encoding
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Archive error: {0}")]
    Archive(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Port for the e-book archive format.
///
/// Encoding must be deterministic: identical requests yield identical bytes.
#[async_trait]
pub trait ArchiveEncoder: Send + Sync {
    async fn encode(&self, request: &ArchiveRequest) -> Result<Vec<u8>, EncodeError>;

    /// File extension without the dot
    fn extension(&self) -> &'static str;

    fn media_type(&self) -> &'static str;
}

/// Error type for mail transport
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Mail authentication failed: {0}")]
    Auth(String),
    #[error("Message rejected: {0}")]
    Rejected(String),
    #[error("Mail network error: {0}")]
    Network(String),
    #[error("Invalid message: {0}")]
    Build(String),
}

/// Port for sending a message with one attachment
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

/// Port for time/clock operations (enables deterministic testing)
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> OffsetDateTime;
}

/// Real clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}
