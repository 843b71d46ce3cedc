//! Bundle assembly - split candidate articles into size-bounded archives
//!
//! The assembler is a pure function of its inputs: it encodes, measures and
//! decides split points, but never persists anything.

use time::OffsetDateTime;

use crate::{
    model::{ArchiveRequest, Article, Chapter},
    naming::{long_date, part_title, summarize_authors},
    ports::{ArchiveEncoder, EncodeError},
};

/// 20 MiB keeps a bundle under common SMTP provider limits
pub const DEFAULT_MAX_BUNDLE_BYTES: u64 = 20 * 1024 * 1024;

/// Creator metadata lists up to this many names before "and N others"
const ARCHIVE_AUTHORS_LISTED: usize = 3;

/// Configuration for the assembler
#[derive(Debug, Clone)]
pub struct AssembleConfig {
    /// Byte ceiling for one archive
    pub max_bytes: u64,
    /// Embed remote images instead of stripping them
    pub with_images: bool,
}

impl Default for AssembleConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BUNDLE_BYTES,
            with_images: false,
        }
    }
}

/// One archive produced by the assembler
#[derive(Debug, Clone)]
pub struct AssembledPart {
    pub title: String,
    pub archive: Vec<u8>,
    /// Member article IDs in reading order
    pub article_ids: Vec<i64>,
    /// A single article whose archive alone exceeds the ceiling
    pub oversize: bool,
}

impl AssembledPart {
    fn new(title: String, archive: Vec<u8>, members: &[&Article], oversize: bool) -> Self {
        Self {
            title,
            archive,
            article_ids: members.iter().map(|a| a.id).collect(),
            oversize,
        }
    }

    pub fn size(&self) -> u64 {
        self.archive.len() as u64
    }
}

/// Greedy-prefix bundle assembler
pub struct Assembler<'a, E: ArchiveEncoder + ?Sized> {
    encoder: &'a E,
    config: AssembleConfig,
}

impl<'a, E: ArchiveEncoder + ?Sized> Assembler<'a, E> {
    pub fn new(encoder: &'a E, config: AssembleConfig) -> Self {
        Self { encoder, config }
    }

    /// Encode `articles` into one or more archives, each within the ceiling.
    ///
    /// The whole list is tried first. If it does not fit, articles are added
    /// one at a time to a chunk which is re-encoded from scratch under its
    /// part title; the first article that pushes the chunk over the ceiling
    /// closes the chunk with the last encoding that fit and opens the next
    /// part. A single article that is over the ceiling on its own is still
    /// emitted, flagged `oversize`.
    pub async fn assemble(
        &self,
        base_title: &str,
        articles: &[Article],
        modified: OffsetDateTime,
    ) -> Result<Vec<AssembledPart>, EncodeError> {
        if articles.is_empty() {
            return Ok(vec![]);
        }

        let everything: Vec<&Article> = articles.iter().collect();
        let whole = self.encode(base_title, &everything, modified).await?;

        if self.fits(&whole) || everything.len() == 1 {
            let oversize = !self.fits(&whole);
            if oversize {
                self.warn_oversize(base_title, &everything, whole.len());
            }
            return Ok(vec![AssembledPart::new(
                base_title.to_string(),
                whole,
                &everything,
                oversize,
            )]);
        }

        tracing::info!(
            title = %base_title,
            articles = articles.len(),
            size = whole.len(),
            max_bytes = self.config.max_bytes,
            "Bundle too large, splitting into parts"
        );

        let mut parts: Vec<AssembledPart> = Vec::new();
        let mut chunk: Vec<&Article> = Vec::new();
        let mut last_good: Option<Vec<u8>> = None;
        let mut index = 0;

        while index < articles.len() {
            let article = &articles[index];
            let title = part_title(base_title, parts.len() + 1);
            chunk.push(article);

            tracing::debug!(title = %title, members = chunk.len(), "Sizing part");
            let trial = self.encode(&title, &chunk, modified).await?;

            if self.fits(&trial) {
                last_good = Some(trial);
                index += 1;
            } else if chunk.len() == 1 {
                self.warn_oversize(&title, &chunk, trial.len());
                parts.push(AssembledPart::new(title, trial, &chunk, true));
                chunk.clear();
                last_good = None;
                index += 1;
            } else {
                // Close the chunk without this article; it opens the next part
                chunk.pop();
                let archive = self
                    .last_good_or_encode(last_good.take(), &title, &chunk, modified)
                    .await?;
                parts.push(AssembledPart::new(title, archive, &chunk, false));
                chunk.clear();
            }
        }

        if !chunk.is_empty() {
            let title = part_title(base_title, parts.len() + 1);
            let archive = self
                .last_good_or_encode(last_good.take(), &title, &chunk, modified)
                .await?;
            parts.push(AssembledPart::new(title, archive, &chunk, false));
        }

        tracing::info!(title = %base_title, parts = parts.len(), "Split bundle");
        Ok(parts)
    }

    fn fits(&self, archive: &[u8]) -> bool {
        archive.len() as u64 <= self.config.max_bytes
    }

    async fn last_good_or_encode(
        &self,
        last_good: Option<Vec<u8>>,
        title: &str,
        members: &[&Article],
        modified: OffsetDateTime,
    ) -> Result<Vec<u8>, EncodeError> {
        match last_good {
            Some(archive) => Ok(archive),
            None => self.encode(title, members, modified).await,
        }
    }

    async fn encode(
        &self,
        title: &str,
        members: &[&Article],
        modified: OffsetDateTime,
    ) -> Result<Vec<u8>, EncodeError> {
        let request = ArchiveRequest {
            title: title.to_string(),
            author: summarize_authors(
                members.iter().filter_map(|a| a.author.as_deref()),
                ARCHIVE_AUTHORS_LISTED,
            ),
            chapters: members.iter().map(|a| chapter_for(a)).collect(),
            with_images: self.config.with_images,
            modified,
        };
        self.encoder.encode(&request).await
    }

    fn warn_oversize(&self, title: &str, members: &[&Article], size: usize) {
        tracing::warn!(
            title = %title,
            article_id = members.first().map(|a| a.id),
            size,
            max_bytes = self.config.max_bytes,
            "Single article exceeds the bundle ceiling; emitting it anyway"
        );
    }
}

/// Build the chapter for one article
pub fn chapter_for(article: &Article) -> Chapter {
    let mut byline = Vec::new();
    if let Some(author) = &article.author {
        byline.push(format!("By {}", author));
    }
    if let Some(publication) = &article.publication_name {
        byline.push(publication.clone());
    }
    if let Some(published_at) = article.published_at {
        byline.push(long_date(published_at.date()));
    }

    Chapter {
        title: article.title.clone(),
        byline: if byline.is_empty() {
            None
        } else {
            Some(byline.join(" · "))
        },
        source_url: article.url.clone(),
        body_html: article.content_html.clone(),
    }
}
