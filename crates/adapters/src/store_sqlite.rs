//! SQLite store implementation for articles, bundles and the sync log

use async_trait::async_trait;
use articles2kindle_domain::{
    Article, ArticleFilter, ArticleStore, AuthorSummary, Bundle, BundleStore, GroupKey,
    NewArticle, NewBundle, PublicationSummary, StoreError, SyncLog, SyncOutcome, SyncStatus,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const ARTICLE_COLUMNS: &str = "id, source_id, source_name, title, author, author_normalized, \
    content_html, excerpt, url, publication_name, published_at, fetched_at, word_count, tags, \
    bundled, last_bundled_at";

const BUNDLE_COLUMNS: &str =
    "id, title, created_at, file_path, file_size, article_count, sent_at, sent_to";

/// SQLite-backed store
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path` and migrate it
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Database(format!("Failed to create directory: {}", e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing)
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Database(e.to_string()))?
            .foreign_keys(true);

        // One connection that never expires; the database lives inside it
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Close the pool, waiting for connections to finish
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id TEXT NOT NULL,
                source_name TEXT NOT NULL,
                title TEXT NOT NULL,
                author TEXT,
                author_normalized TEXT,
                content_html TEXT,
                excerpt TEXT,
                url TEXT,
                publication_name TEXT,
                published_at TEXT,
                fetched_at TEXT NOT NULL,
                word_count INTEGER,
                tags TEXT NOT NULL DEFAULT '[]',
                bundled INTEGER NOT NULL DEFAULT 0,
                last_bundled_at TEXT,
                UNIQUE(source_name, source_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS bundles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                article_count INTEGER NOT NULL,
                sent_at TEXT,
                sent_to TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS bundle_articles (
                bundle_id INTEGER NOT NULL REFERENCES bundles(id) ON DELETE CASCADE,
                article_id INTEGER NOT NULL REFERENCES articles(id),
                position INTEGER NOT NULL,
                PRIMARY KEY(bundle_id, article_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sync_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_name TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                fetched INTEGER NOT NULL DEFAULT 0,
                new_articles INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_articles_publication ON articles(bundled, publication_name)",
            "CREATE INDEX IF NOT EXISTS idx_articles_author ON articles(bundled, author_normalized)",
            "CREATE INDEX IF NOT EXISTS idx_sync_log_source ON sync_log(source_name, status)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        Ok(())
    }

    async fn flip_bundled(
        conn: &mut SqliteConnection,
        ids: &[i64],
        at: &str,
    ) -> Result<(), StoreError> {
        for id in ids {
            let result = sqlx::query(
                "UPDATE articles SET bundled = 1, last_bundled_at = ? WHERE id = ? AND bundled = 0",
            )
            .bind(at)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

            if result.rows_affected() != 1 {
                return Err(StoreError::NotFound(format!(
                    "article {} is missing or already bundled",
                    id
                )));
            }
        }
        Ok(())
    }
}

/// RFC 3339 in UTC, whole seconds, so text order is time order
fn format_timestamp(at: OffsetDateTime) -> Result<String, StoreError> {
    at.to_offset(time::UtcOffset::UTC)
        .replace_nanosecond(0)
        .map_err(|e| StoreError::Serialization(e.to_string()))?
        .format(&Rfc3339)
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_timestamp(value: &str) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_optional_timestamp(value: Option<String>) -> Result<Option<OffsetDateTime>, StoreError> {
    value.as_deref().map(parse_timestamp).transpose()
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Database(e.to_string()))
}

fn article_from_row(row: &SqliteRow) -> Result<Article, StoreError> {
    let tags: String = column(row, "tags")?;
    let word_count: Option<i64> = column(row, "word_count")?;
    let bundled: i64 = column(row, "bundled")?;
    let fetched_at: String = column(row, "fetched_at")?;

    Ok(Article {
        id: column(row, "id")?,
        source_id: column(row, "source_id")?,
        source_name: column(row, "source_name")?,
        title: column(row, "title")?,
        author: column(row, "author")?,
        author_normalized: column(row, "author_normalized")?,
        content_html: column(row, "content_html")?,
        excerpt: column(row, "excerpt")?,
        url: column(row, "url")?,
        publication_name: column(row, "publication_name")?,
        published_at: parse_optional_timestamp(column(row, "published_at")?)?,
        fetched_at: parse_timestamp(&fetched_at)?,
        word_count: word_count.map(|n| n as u32),
        tags: serde_json::from_str(&tags).map_err(|e| StoreError::Serialization(e.to_string()))?,
        bundled: bundled != 0,
        last_bundled_at: parse_optional_timestamp(column(row, "last_bundled_at")?)?,
    })
}

fn bundle_from_row(row: &SqliteRow) -> Result<Bundle, StoreError> {
    let created_at: String = column(row, "created_at")?;
    let file_path: String = column(row, "file_path")?;
    let file_size: i64 = column(row, "file_size")?;
    let article_count: i64 = column(row, "article_count")?;
    let sent_to: Option<String> = column(row, "sent_to")?;

    Ok(Bundle {
        id: column(row, "id")?,
        title: column(row, "title")?,
        created_at: parse_timestamp(&created_at)?,
        file_path: PathBuf::from(file_path),
        file_size: file_size as u64,
        article_count: article_count as u32,
        sent_at: parse_optional_timestamp(column(row, "sent_at")?)?,
        sent_to: sent_to
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
    })
}

#[async_trait]
impl ArticleStore for SqliteStore {
    async fn upsert(&self, article: &NewArticle) -> Result<bool, StoreError> {
        let source = &article.source;
        let tags = serde_json::to_string(&source.tags)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let published_at = source.published_at.map(format_timestamp).transpose()?;
        let fetched_at = format_timestamp(article.fetched_at)?;

        let result = sqlx::query(
            r#"
            INSERT INTO articles
            (source_id, source_name, title, author, author_normalized, content_html, excerpt,
             url, publication_name, published_at, fetched_at, word_count, tags)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_name, source_id) DO NOTHING
            "#,
        )
        .bind(&source.source_id)
        .bind(&source.source_name)
        .bind(&source.title)
        .bind(&source.author)
        .bind(&article.author_normalized)
        .bind(&source.content_html)
        .bind(&source.excerpt)
        .bind(&source.url)
        .bind(&source.publication_name)
        .bind(&published_at)
        .bind(&fetched_at)
        .bind(article.word_count.map(i64::from))
        .bind(&tags)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_unbundled(&self, group: &GroupKey) -> Result<Vec<Article>, StoreError> {
        let column = match group {
            GroupKey::Author(_) => "author_normalized",
            GroupKey::Publication(_) => "publication_name",
        };
        let sql = format!(
            "SELECT {} FROM articles WHERE bundled = 0 AND {} = ? \
             ORDER BY published_at DESC, id ASC",
            ARTICLE_COLUMNS, column
        );

        let rows = sqlx::query(&sql)
            .bind(group.label())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(article_from_row).collect()
    }

    async fn mark_bundled(&self, ids: &[i64], at: OffsetDateTime) -> Result<(), StoreError> {
        let at = format_timestamp(at)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Self::flip_bundled(&mut *tx, ids, &at).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn list_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>, StoreError> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM articles WHERE 1 = 1", ARTICLE_COLUMNS));

        if let Some(author) = &filter.author {
            let needle = author.trim().to_lowercase();
            query.push(" AND author_normalized LIKE ");
            query.push_bind(format!("%{}%", needle));
        }
        if filter.unbundled_only {
            query.push(" AND bundled = 0");
        }
        query.push(" ORDER BY published_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            query.push(" LIMIT ");
            query.push_bind(limit as i64);
        }

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(article_from_row).collect()
    }

    async fn list_publications(&self) -> Result<Vec<PublicationSummary>, StoreError> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT publication_name,
                   COUNT(*),
                   SUM(CASE WHEN bundled = 0 THEN 1 ELSE 0 END)
            FROM articles
            WHERE publication_name IS NOT NULL
            GROUP BY publication_name
            ORDER BY COUNT(*) DESC, publication_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(publication_name, total, unbundled)| PublicationSummary {
                publication_name,
                article_count: total as u64,
                unbundled_count: unbundled as u64,
            })
            .collect())
    }

    async fn list_authors(&self) -> Result<Vec<AuthorSummary>, StoreError> {
        let rows: Vec<(Option<String>, String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT MIN(author),
                   author_normalized,
                   COUNT(*),
                   SUM(CASE WHEN bundled = 0 THEN 1 ELSE 0 END)
            FROM articles
            WHERE author_normalized IS NOT NULL
            GROUP BY author_normalized
            ORDER BY COUNT(*) DESC, author_normalized ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(author, author_normalized, total, unbundled)| AuthorSummary {
                author: author.unwrap_or_else(|| author_normalized.clone()),
                author_normalized,
                article_count: total as u64,
                unbundled_count: unbundled as u64,
            })
            .collect())
    }

    async fn publications_tagged(&self, tag: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT publication_name
            FROM articles
            WHERE publication_name IS NOT NULL
              AND EXISTS (
                  SELECT 1 FROM json_each(articles.tags)
                  WHERE lower(json_each.value) = lower(?)
              )
            ORDER BY publication_name ASC
            "#,
        )
        .bind(tag)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn resolve_group(&self, group: &GroupKey) -> Result<Option<GroupKey>, StoreError> {
        match group {
            GroupKey::Publication(name) => {
                let row: Option<(String,)> = sqlx::query_as(
                    r#"
                    SELECT publication_name FROM articles
                    WHERE publication_name = ? COLLATE NOCASE
                    ORDER BY publication_name = ? DESC
                    LIMIT 1
                    "#,
                )
                .bind(name)
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;

                Ok(row.map(|(name,)| GroupKey::Publication(name)))
            }
            GroupKey::Author(name) => {
                let row: Option<(String,)> = sqlx::query_as(
                    "SELECT author_normalized FROM articles WHERE author_normalized = ? LIMIT 1",
                )
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;

                Ok(row.map(|(name,)| GroupKey::Author(name)))
            }
        }
    }

    async fn reset_bundled(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE articles SET bundled = 0, last_bundled_at = NULL WHERE bundled = 1",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SyncLog for SqliteStore {
    async fn start_sync(&self, source_name: &str, at: OffsetDateTime) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO sync_log (source_name, started_at, status) VALUES (?, ?, ?)",
        )
        .bind(source_name)
        .bind(format_timestamp(at)?)
        .bind(SyncStatus::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(result.last_insert_rowid())
    }

    async fn finish_sync(
        &self,
        run_id: i64,
        outcome: SyncOutcome,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let (status, fetched, new_articles) = match outcome {
            SyncOutcome::Completed {
                fetched,
                new_articles,
            } => (SyncStatus::Completed, fetched, new_articles),
            SyncOutcome::Failed {
                fetched,
                new_articles,
            } => (SyncStatus::Failed, fetched, new_articles),
        };

        let result = sqlx::query(
            r#"
            UPDATE sync_log
            SET status = ?, completed_at = ?, fetched = ?, new_articles = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(status.as_str())
        .bind(format_timestamp(at)?)
        .bind(fetched as i64)
        .bind(new_articles as i64)
        .bind(run_id)
        .bind(SyncStatus::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("running sync {}", run_id)));
        }
        Ok(())
    }

    async fn last_successful_sync(
        &self,
        source_name: &str,
    ) -> Result<Option<OffsetDateTime>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT completed_at FROM sync_log
            WHERE source_name = ? AND status = ? AND completed_at IS NOT NULL
            ORDER BY completed_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(source_name)
        .bind(SyncStatus::Completed.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(|(completed_at,)| parse_timestamp(&completed_at))
            .transpose()
    }
}

#[async_trait]
impl BundleStore for SqliteStore {
    async fn record_bundle(
        &self,
        bundle: &NewBundle,
        created_at: OffsetDateTime,
    ) -> Result<i64, StoreError> {
        let created_at = format_timestamp(created_at)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO bundles (title, created_at, file_path, file_size, article_count)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&bundle.title)
        .bind(&created_at)
        .bind(bundle.file_path.to_string_lossy().into_owned())
        .bind(bundle.file_size as i64)
        .bind(bundle.article_ids.len() as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        let bundle_id = result.last_insert_rowid();

        for (position, article_id) in bundle.article_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO bundle_articles (bundle_id, article_id, position) VALUES (?, ?, ?)",
            )
            .bind(bundle_id)
            .bind(article_id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        Self::flip_bundled(&mut *tx, &bundle.article_ids, &created_at).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(bundle_id)
    }

    async fn get_bundle(&self, id: i64) -> Result<Option<Bundle>, StoreError> {
        let sql = format!("SELECT {} FROM bundles WHERE id = ?", BUNDLE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        row.as_ref().map(bundle_from_row).transpose()
    }

    async fn list_bundles(&self) -> Result<Vec<Bundle>, StoreError> {
        let sql = format!(
            "SELECT {} FROM bundles ORDER BY created_at DESC, id DESC",
            BUNDLE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(bundle_from_row).collect()
    }

    async fn latest_unsent(&self) -> Result<Option<Bundle>, StoreError> {
        let sql = format!(
            "SELECT {} FROM bundles WHERE sent_at IS NULL ORDER BY created_at DESC, id DESC LIMIT 1",
            BUNDLE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        row.as_ref().map(bundle_from_row).transpose()
    }

    async fn bundle_article_ids(&self, id: i64) -> Result<Vec<i64>, StoreError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT article_id FROM bundle_articles WHERE bundle_id = ? ORDER BY position ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(|(article_id,)| article_id).collect())
    }

    async fn mark_sent(
        &self,
        id: i64,
        recipients: &[String],
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let sent_to = serde_json::to_string(recipients)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query("UPDATE bundles SET sent_at = ?, sent_to = ? WHERE id = ?")
            .bind(format_timestamp(at)?)
            .bind(&sent_to)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("bundle {}", id)));
        }
        Ok(())
    }

    async fn delete_bundle(&self, id: i64) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query("DELETE FROM bundle_articles WHERE bundle_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let result = sqlx::query("DELETE FROM bundles WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("bundle {}", id)));
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use articles2kindle_domain::SourceArticle;
    use time::macros::datetime;

    fn source(id: &str, publication: &str, author: &str) -> SourceArticle {
        SourceArticle {
            source_id: id.to_string(),
            source_name: "feedly".to_string(),
            title: format!("Title {}", id),
            author: Some(author.to_string()),
            content_html: Some("<p>body text</p>".to_string()),
            excerpt: None,
            url: Some(format!("https://example.com/{}", id)),
            publication_name: Some(publication.to_string()),
            published_at: None,
            tags: vec!["Newsletters".to_string()],
        }
    }

    async fn insert(store: &SqliteStore, source: SourceArticle) -> bool {
        store
            .upsert(&NewArticle::from_source(source, datetime!(2024-03-01 12:00 UTC)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_dedups_on_source_key() {
        let store = SqliteStore::in_memory().await.unwrap();

        assert!(insert(&store, source("a", "Pub", "Jane")).await);

        let mut changed = source("a", "Pub", "Jane");
        changed.title = "Rewritten".to_string();
        assert!(!insert(&store, changed).await);

        let articles = store.list_articles(&ArticleFilter::default()).await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Title a");
        assert_eq!(articles[0].word_count, Some(2));
        assert_eq!(articles[0].tags, vec!["Newsletters".to_string()]);

        // Same remote ID from another source is a different article
        let mut other = source("a", "Pub", "Jane");
        other.source_name = "substack".to_string();
        assert!(insert(&store, other).await);
    }

    #[tokio::test]
    async fn test_list_unbundled_orders_newest_first_then_insertion() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut old = source("old", "Pub", "Jane");
        old.published_at = Some(datetime!(2024-01-01 00:00 UTC));
        let mut new = source("new", "Pub", "Jane");
        new.published_at = Some(datetime!(2024-02-01 00:00 UTC));
        let undated = source("undated", "Pub", "Jane");
        let mut tie = source("tie", "Pub", "Jane");
        tie.published_at = Some(datetime!(2024-02-01 00:00 UTC));

        for article in [old, new, undated, tie] {
            insert(&store, article).await;
        }

        let listed = store
            .list_unbundled(&GroupKey::publication("Pub"))
            .await
            .unwrap();
        let ids: Vec<_> = listed.iter().map(|a| a.source_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "tie", "old", "undated"]);
    }

    #[tokio::test]
    async fn test_mark_bundled_excludes_from_unbundled() {
        let store = SqliteStore::in_memory().await.unwrap();
        insert(&store, source("a", "Pub", "Jane Doe")).await;
        insert(&store, source("b", "Pub", "jane  doe")).await;

        let group = GroupKey::author("JANE DOE");
        let listed = store.list_unbundled(&group).await.unwrap();
        assert_eq!(listed.len(), 2);

        store
            .mark_bundled(&[listed[0].id], datetime!(2024-03-02 08:00 UTC))
            .await
            .unwrap();

        let remaining = store.list_unbundled(&group).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, listed[1].id);

        let all = store.list_articles(&ArticleFilter::default()).await.unwrap();
        let marked = all.iter().find(|a| a.id == listed[0].id).unwrap();
        assert!(marked.bundled);
        assert_eq!(marked.last_bundled_at, Some(datetime!(2024-03-02 08:00 UTC)));
    }

    #[tokio::test]
    async fn test_record_bundle_is_atomic() {
        let store = SqliteStore::in_memory().await.unwrap();
        insert(&store, source("a", "Pub", "Jane")).await;
        let article_id = store.list_articles(&ArticleFilter::default()).await.unwrap()[0].id;

        let broken = NewBundle {
            title: "Broken".to_string(),
            file_path: PathBuf::from("/tmp/broken.epub"),
            file_size: 10,
            article_ids: vec![article_id, 9_999],
        };
        let result = store
            .record_bundle(&broken, datetime!(2024-03-02 08:00 UTC))
            .await;

        assert!(result.is_err());
        assert!(store.list_bundles().await.unwrap().is_empty());
        let article = &store.list_articles(&ArticleFilter::default()).await.unwrap()[0];
        assert!(!article.bundled);
        let orphans: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bundle_articles")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(orphans.0, 0);
    }

    #[tokio::test]
    async fn test_bundle_lifecycle() {
        let store = SqliteStore::in_memory().await.unwrap();
        insert(&store, source("a", "Pub", "Jane")).await;
        insert(&store, source("b", "Pub", "Jane")).await;
        let ids: Vec<i64> = store
            .list_unbundled(&GroupKey::publication("Pub"))
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();

        let bundle_id = store
            .record_bundle(
                &NewBundle {
                    title: "Pub - Jane - Created 2024-03-02".to_string(),
                    file_path: PathBuf::from("/tmp/pub.epub"),
                    file_size: 1234,
                    article_ids: ids.clone(),
                },
                datetime!(2024-03-02 08:00 UTC),
            )
            .await
            .unwrap();

        let bundle = store.get_bundle(bundle_id).await.unwrap().unwrap();
        assert_eq!(bundle.article_count, 2);
        assert_eq!(bundle.file_size, 1234);
        assert!(!bundle.is_sent());
        assert_eq!(store.bundle_article_ids(bundle_id).await.unwrap(), ids);
        assert_eq!(
            store.latest_unsent().await.unwrap().map(|b| b.id),
            Some(bundle_id)
        );

        let recipients = vec!["me@kindle.com".to_string()];
        store
            .mark_sent(bundle_id, &recipients, datetime!(2024-03-02 09:00 UTC))
            .await
            .unwrap();
        let sent = store.get_bundle(bundle_id).await.unwrap().unwrap();
        assert_eq!(sent.sent_to, Some(recipients));
        assert!(store.latest_unsent().await.unwrap().is_none());

        store.delete_bundle(bundle_id).await.unwrap();
        assert!(store.get_bundle(bundle_id).await.unwrap().is_none());
        assert!(store.bundle_article_ids(bundle_id).await.unwrap().is_empty());
        // Deleting a bundle never un-bundles its articles
        assert!(
            store
                .list_unbundled(&GroupKey::publication("Pub"))
                .await
                .unwrap()
                .is_empty()
        );

        assert_eq!(store.reset_bundled().await.unwrap(), 2);
        assert_eq!(
            store
                .list_unbundled(&GroupKey::publication("Pub"))
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_summaries_and_lookups() {
        let store = SqliteStore::in_memory().await.unwrap();
        insert(&store, source("a", "Money Stuff", "Matt Levine")).await;
        insert(&store, source("b", "Money Stuff", "Matt Levine")).await;
        let mut untagged = source("c", "Other", "Someone");
        untagged.tags = vec![];
        insert(&store, untagged).await;

        let publications = store.list_publications().await.unwrap();
        assert_eq!(publications[0].publication_name, "Money Stuff");
        assert_eq!(publications[0].article_count, 2);
        assert_eq!(publications[0].unbundled_count, 2);

        let authors = store.list_authors().await.unwrap();
        assert_eq!(authors[0].author, "Matt Levine");
        assert_eq!(authors[0].author_normalized, "matt levine");

        assert_eq!(
            store.publications_tagged("newsletters").await.unwrap(),
            vec!["Money Stuff".to_string()]
        );

        assert_eq!(
            store
                .resolve_group(&GroupKey::publication("money stuff"))
                .await
                .unwrap(),
            Some(GroupKey::publication("Money Stuff"))
        );
        assert_eq!(
            store
                .resolve_group(&GroupKey::author("MATT LEVINE"))
                .await
                .unwrap(),
            Some(GroupKey::Author("matt levine".to_string()))
        );
        assert!(
            store
                .resolve_group(&GroupKey::publication("Nope"))
                .await
                .unwrap()
                .is_none()
        );

        let filtered = store
            .list_articles(&ArticleFilter {
                author: Some("LEVINE".to_string()),
                unbundled_only: true,
                limit: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[tokio::test]
    async fn test_watermark_uses_latest_completed_run() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.last_successful_sync("feedly").await.unwrap().is_none());

        let first = store
            .start_sync("feedly", datetime!(2024-03-01 10:00 UTC))
            .await
            .unwrap();
        store
            .finish_sync(
                first,
                SyncOutcome::Completed {
                    fetched: 3,
                    new_articles: 3,
                },
                datetime!(2024-03-01 10:05 UTC),
            )
            .await
            .unwrap();

        let failed = store
            .start_sync("feedly", datetime!(2024-03-02 10:00 UTC))
            .await
            .unwrap();
        store
            .finish_sync(
                failed,
                SyncOutcome::Failed {
                    fetched: 1,
                    new_articles: 0,
                },
                datetime!(2024-03-02 10:01 UTC),
            )
            .await
            .unwrap();

        assert_eq!(
            store.last_successful_sync("feedly").await.unwrap(),
            Some(datetime!(2024-03-01 10:05 UTC))
        );
        assert!(store.last_successful_sync("substack").await.unwrap().is_none());

        // A run gets exactly one terminal update
        assert!(
            store
                .finish_sync(
                    first,
                    SyncOutcome::Failed {
                        fetched: 0,
                        new_articles: 0
                    },
                    datetime!(2024-03-03 00:00 UTC),
                )
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_timestamps_are_stored_in_utc_seconds() {
        let at = datetime!(2024-03-01 12:30:45.987 +02:00);
        assert_eq!(format_timestamp(at).unwrap(), "2024-03-01T10:30:45Z");
    }
}
