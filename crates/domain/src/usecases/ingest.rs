//! Ingest use case - drain a source into the article store

use futures::TryStreamExt;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::{
    model::{FetchOptions, NewArticle, SyncOutcome},
    ports::{ArticleStore, Clock, SourceAdapter, SourceError, StoreError, SyncLog},
};

/// Options for one ingestion run
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    /// Ignore the watermark and fetch everything the source returns
    pub full: bool,
    /// Cap on items fetched
    pub count: Option<usize>,
}

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub source_name: String,
    pub fetched: u64,
    pub new_articles: u64,
    /// Watermark used, if any
    pub newer_than: Option<OffsetDateTime>,
}

/// Errors from ingestion
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Pulls batches from a source and upserts them, logging the run
pub struct Ingestor<S, L, Cl>
where
    S: ArticleStore + ?Sized,
    L: SyncLog + ?Sized,
    Cl: Clock + ?Sized,
{
    store: Arc<S>,
    sync_log: Arc<L>,
    clock: Arc<Cl>,
}

impl<S, L, Cl> Ingestor<S, L, Cl>
where
    S: ArticleStore + ?Sized,
    L: SyncLog + ?Sized,
    Cl: Clock + ?Sized,
{
    pub fn new(store: Arc<S>, sync_log: Arc<L>, clock: Arc<Cl>) -> Self {
        Self {
            store,
            sync_log,
            clock,
        }
    }

    /// Run one ingestion for `source`.
    ///
    /// Articles upserted before a failure are kept; the run is still
    /// recorded as failed so the watermark does not advance.
    pub async fn run(
        &self,
        source: &dyn SourceAdapter,
        options: IngestOptions,
    ) -> Result<IngestReport, IngestError> {
        let source_name = source.name();
        let newer_than = if options.full {
            None
        } else {
            self.sync_log.last_successful_sync(source_name).await?
        };

        tracing::info!(
            source = source_name,
            full = options.full,
            newer_than = ?newer_than,
            count = ?options.count,
            "Starting fetch"
        );

        let run_id = self
            .sync_log
            .start_sync(source_name, self.clock.now())
            .await?;

        let mut fetched = 0u64;
        let mut new_articles = 0u64;
        let result = self
            .drain(
                source,
                FetchOptions {
                    newer_than,
                    count: options.count,
                },
                &mut fetched,
                &mut new_articles,
            )
            .await;

        match result {
            Ok(()) => {
                self.sync_log
                    .finish_sync(
                        run_id,
                        SyncOutcome::Completed {
                            fetched,
                            new_articles,
                        },
                        self.clock.now(),
                    )
                    .await?;
                tracing::info!(
                    source = source_name,
                    fetched,
                    new_articles,
                    "Fetch completed"
                );
                Ok(IngestReport {
                    source_name: source_name.to_string(),
                    fetched,
                    new_articles,
                    newer_than,
                })
            }
            Err(e) => {
                tracing::warn!(
                    source = source_name,
                    fetched,
                    new_articles,
                    error = %e,
                    "Fetch failed"
                );
                if let Err(log_error) = self
                    .sync_log
                    .finish_sync(
                        run_id,
                        SyncOutcome::Failed {
                            fetched,
                            new_articles,
                        },
                        self.clock.now(),
                    )
                    .await
                {
                    tracing::error!(run_id, error = %log_error, "Failed to record failed run");
                }
                Err(e)
            }
        }
    }

    async fn drain(
        &self,
        source: &dyn SourceAdapter,
        options: FetchOptions,
        fetched: &mut u64,
        new_articles: &mut u64,
    ) -> Result<(), IngestError> {
        let mut batches = source.fetch_articles(options);
        while let Some(batch) = batches.try_next().await? {
            tracing::debug!(size = batch.len(), "Received batch");
            for item in batch {
                *fetched += 1;
                let article = NewArticle::from_source(item, self.clock.now());
                if self.store.upsert(&article).await? {
                    *new_articles += 1;
                }
            }
        }
        Ok(())
    }
}
