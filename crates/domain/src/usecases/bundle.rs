//! Bundle use case - select a group, assemble archives, commit them

use std::path::PathBuf;
use std::sync::Arc;

use crate::{
    model::{Article, GroupKey, NewBundle},
    naming::{bundle_title, sanitize_file_name, summarize_authors},
    ports::{
        ArchiveEncoder, ArticleStore, BundleFiles, BundleStore, Clock, EncodeError, FileError,
        StoreError,
    },
    usecases::assemble::{AssembleConfig, Assembler},
};

/// Bundle titles list up to this many authors before "and N others"
const TITLE_AUTHORS_LISTED: usize = 2;

/// Fallback file stem when a title sanitizes to nothing
const FALLBACK_FILE_STEM: &str = "bundle";

/// Publications title as stored; authors use the first raw spelling
fn display_label<'a>(group: &'a GroupKey, articles: &'a [Article]) -> &'a str {
    match group {
        GroupKey::Author(normalized) => articles
            .iter()
            .find_map(|a| a.author.as_deref())
            .unwrap_or(normalized),
        GroupKey::Publication(name) => name,
    }
}

/// A bundle that was written to disk and recorded
#[derive(Debug, Clone)]
pub struct CommittedBundle {
    pub bundle_id: i64,
    pub title: String,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub article_count: usize,
    /// Single article over the ceiling, emitted anyway
    pub oversize: bool,
}

/// Errors from bundling
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("No articles found for {0}")]
    NotFound(String),
    #[error("Encoding failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("File error: {0}")]
    File(#[from] FileError),
    /// File and store disagree about a commit
    #[error("Bundle commit failed: {0}")]
    Integrity(String),
}

/// A group whose bundling stopped part-way.
///
/// Parts committed before the failure stay committed and are listed here.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct BundleFailure {
    pub committed: Vec<CommittedBundle>,
    pub error: BundleError,
}

impl From<BundleError> for BundleFailure {
    fn from(error: BundleError) -> Self {
        Self {
            committed: vec![],
            error,
        }
    }
}

/// Orchestrates selection, assembly and atomic commit of bundles
pub struct BundleService<A, B, F, E, Cl>
where
    A: ArticleStore + ?Sized,
    B: BundleStore + ?Sized,
    F: BundleFiles + ?Sized,
    E: ArchiveEncoder + ?Sized,
    Cl: Clock + ?Sized,
{
    articles: Arc<A>,
    bundles: Arc<B>,
    files: Arc<F>,
    encoder: Arc<E>,
    clock: Arc<Cl>,
    config: AssembleConfig,
}

impl<A, B, F, E, Cl> BundleService<A, B, F, E, Cl>
where
    A: ArticleStore + ?Sized,
    B: BundleStore + ?Sized,
    F: BundleFiles + ?Sized,
    E: ArchiveEncoder + ?Sized,
    Cl: Clock + ?Sized,
{
    pub fn new(
        articles: Arc<A>,
        bundles: Arc<B>,
        files: Arc<F>,
        encoder: Arc<E>,
        clock: Arc<Cl>,
        config: AssembleConfig,
    ) -> Self {
        Self {
            articles,
            bundles,
            files,
            encoder,
            clock,
            config,
        }
    }

    /// Map a user-supplied group to its stored spelling
    pub async fn resolve(&self, group: &GroupKey) -> Result<GroupKey, BundleError> {
        self.articles
            .resolve_group(group)
            .await?
            .ok_or_else(|| BundleError::NotFound(group.to_string()))
    }

    /// Bundle every unbundled article of one group.
    ///
    /// Returns an empty list when the group has nothing left to bundle.
    /// Parts committed before a failure stay committed and are returned
    /// with the error.
    pub async fn bundle_group(
        &self,
        group: &GroupKey,
        title: Option<&str>,
    ) -> Result<Vec<CommittedBundle>, BundleFailure> {
        let articles = self
            .articles
            .list_unbundled(group)
            .await
            .map_err(BundleError::from)?;
        if articles.is_empty() {
            tracing::info!(group = %group, "No unbundled articles");
            return Ok(vec![]);
        }

        let now = self.clock.now();
        let base_title = match title {
            Some(title) => title.to_string(),
            None => bundle_title(
                display_label(group, &articles),
                &summarize_authors(
                    articles.iter().filter_map(|a| a.author.as_deref()),
                    TITLE_AUTHORS_LISTED,
                ),
                now.date(),
            ),
        };

        tracing::info!(
            group = %group,
            articles = articles.len(),
            title = %base_title,
            "Building bundle"
        );

        let assembler = Assembler::new(self.encoder.as_ref(), self.config.clone());
        let parts = assembler
            .assemble(&base_title, &articles, now)
            .await
            .map_err(BundleError::from)?;

        let mut committed = Vec::with_capacity(parts.len());
        for part in parts {
            match self
                .commit(&part.title, &part.archive, &part.article_ids)
                .await
            {
                Ok(mut bundle) => {
                    bundle.oversize = part.oversize;
                    committed.push(bundle);
                }
                Err(error) => return Err(BundleFailure { committed, error }),
            }
        }

        Ok(committed)
    }

    /// Bundle several groups independently; one failure never affects another
    pub async fn bundle_groups(
        &self,
        groups: &[GroupKey],
    ) -> Vec<(GroupKey, Result<Vec<CommittedBundle>, BundleFailure>)> {
        let mut outcomes = Vec::with_capacity(groups.len());
        for group in groups {
            let outcome = self.bundle_group(group, None).await;
            if let Err(failure) = &outcome {
                tracing::warn!(
                    group = %group,
                    error = %failure.error,
                    committed = failure.committed.len(),
                    "Failed to bundle group"
                );
            }
            outcomes.push((group.clone(), outcome));
        }
        outcomes
    }

    /// Write the archive and record it together with its article state.
    ///
    /// If recording fails the written file is removed again, so no reader
    /// ever sees a bundle file without its row or a bundled article without
    /// its bundle.
    pub async fn commit(
        &self,
        title: &str,
        archive: &[u8],
        article_ids: &[i64],
    ) -> Result<CommittedBundle, BundleError> {
        let stem = sanitize_file_name(title);
        let stem = if stem.is_empty() {
            FALLBACK_FILE_STEM
        } else {
            stem.as_str()
        };
        let file_name = format!("{}.{}", stem, self.encoder.extension());

        let stored = self.files.write(&file_name, archive).await?;

        let new_bundle = NewBundle {
            title: title.to_string(),
            file_path: stored.path.clone(),
            file_size: stored.size,
            article_ids: article_ids.to_vec(),
        };

        match self
            .bundles
            .record_bundle(&new_bundle, self.clock.now())
            .await
        {
            Ok(bundle_id) => {
                tracing::info!(
                    bundle_id,
                    title = %title,
                    path = %stored.path.display(),
                    size = stored.size,
                    articles = article_ids.len(),
                    "Bundle created"
                );
                Ok(CommittedBundle {
                    bundle_id,
                    title: title.to_string(),
                    file_path: stored.path,
                    file_size: stored.size,
                    article_count: article_ids.len(),
                    oversize: false,
                })
            }
            Err(record_error) => {
                if let Err(remove_error) = self.files.remove(&stored.path).await {
                    tracing::error!(
                        path = %stored.path.display(),
                        error = %remove_error,
                        "Failed to remove bundle file after failed commit"
                    );
                    return Err(BundleError::Integrity(format!(
                        "'{}' was not recorded ({}) and {} could not be removed ({})",
                        title,
                        record_error,
                        stored.path.display(),
                        remove_error
                    )));
                }
                Err(BundleError::Integrity(format!(
                    "'{}' was not recorded: {}",
                    title, record_error
                )))
            }
        }
    }
}
