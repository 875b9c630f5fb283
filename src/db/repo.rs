use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::model::{BackupRun, StoredPost};
use crate::model::{Post, RunStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open archive at {}: {source}", .path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to migrate archive schema: {0}")]
    Migrate(#[source] sqlx::migrate::MigrateError),
    #[error("failed to write batch of {batch_len} posts: {source}")]
    Write {
        batch_len: usize,
        #[source]
        source: sqlx::Error,
    },
    #[error("archive query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("invalid post payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown run status {0:?}")]
    Decode(String),
}

const UPSERT_POST: &str = "
    INSERT INTO posts (id, blog_name, post_type, created_at, content)
    VALUES (?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        blog_name = excluded.blog_name,
        post_type = excluded.post_type,
        created_at = excluded.created_at,
        content = excluded.content
";

/// Handle on one archive file. Obtain with [`PostStore::open`] and release
/// with [`PostStore::close`].
#[derive(Debug)]
pub struct PostStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl PostStore {
    /// Open (creating if needed) the archive at `location` and bring its
    /// schema up to date.
    #[instrument(skip_all, fields(path = %location.display()))]
    pub async fn open(location: &Path) -> Result<Self, StoreError> {
        let unavailable = |source| StoreError::Unavailable {
            path: location.to_path_buf(),
            source,
        };
        let path = prepare_sqlite_path(location).map_err(|e| unavailable(sqlx::Error::Io(e)))?;

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));
        // One writer; batches are applied strictly in sequence.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        if let Err(err) = sqlx::migrate!("./migrations").run(&pool).await {
            pool.close().await;
            return Err(StoreError::Migrate(err));
        }

        debug!(path = %path.display(), "archive opened");
        Ok(Self { pool, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert-or-overwrite every post in `batch` inside one transaction.
    ///
    /// Either the whole batch is committed or, on any failure, none of it is:
    /// the transaction rolls back when dropped without a commit.
    #[instrument(skip_all, fields(batch_len = batch.len()))]
    pub async fn put(&self, batch: &[Post]) -> Result<u64, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let write = |source| StoreError::Write {
            batch_len: batch.len(),
            source,
        };

        let mut tx = self.pool.begin().await.map_err(write)?;
        for post in batch {
            let content = serde_json::to_string(&post.content)?;
            sqlx::query(UPSERT_POST)
                .bind(post.id)
                .bind(&post.blog_name)
                .bind(&post.post_type)
                .bind(post.timestamp)
                .bind(content)
                .execute(&mut *tx)
                .await
                .map_err(write)?;
        }
        tx.commit().await.map_err(write)?;
        Ok(batch.len() as u64)
    }

    /// Flush and release the archive. Batches committed so far stay durable.
    pub async fn close(self) {
        self.pool.close().await;
        info!(path = %self.path.display(), "archive closed");
    }

    #[instrument(skip_all)]
    pub async fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    #[instrument(skip_all)]
    pub async fn get(&self, id: i64) -> Result<Option<StoredPost>, StoreError> {
        let row = sqlx::query(
            "SELECT id, blog_name, post_type, created_at, content FROM posts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| stored_post_from_row(&row)).transpose()
    }

    /// Every stored post, ordered by id.
    #[instrument(skip_all)]
    pub async fn all(&self) -> Result<Vec<StoredPost>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, blog_name, post_type, created_at, content FROM posts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(stored_post_from_row).collect()
    }

    #[instrument(skip_all)]
    pub async fn all_ids(&self) -> Result<Vec<i64>, StoreError> {
        let ids = sqlx::query_scalar("SELECT id FROM posts ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    #[instrument(skip_all)]
    pub async fn begin_run(&self, run_id: Uuid, blog: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO backup_runs (id, blog_name, started_at, status) VALUES (?, ?, ?, ?)",
        )
        .bind(run_id.to_string())
        .bind(blog)
        .bind(Utc::now())
        .bind(RunStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        posts_written: u64,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE backup_runs SET finished_at = ?, status = ?, posts_written = ?, error = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(status.as_str())
        .bind(posts_written as i64)
        .bind(error)
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn get_run(&self, run_id: Uuid) -> Result<Option<BackupRun>, StoreError> {
        let row = sqlx::query(
            "SELECT id, blog_name, started_at, finished_at, status, posts_written, error
             FROM backup_runs WHERE id = ?",
        )
        .bind(run_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.try_get("status")?;
        let status = RunStatus::parse_status(&status).ok_or(StoreError::Decode(status))?;
        Ok(Some(BackupRun {
            id: row.try_get("id")?,
            blog_name: row.try_get("blog_name")?,
            started_at: row.try_get::<DateTime<Utc>, _>("started_at")?,
            finished_at: row.try_get::<Option<DateTime<Utc>>, _>("finished_at")?,
            status,
            posts_written: row.try_get("posts_written")?,
            error: row.try_get("error")?,
        }))
    }
}

fn stored_post_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredPost, StoreError> {
    let content: String = row.try_get("content")?;
    Ok(StoredPost {
        id: row.try_get("id")?,
        blog_name: row.try_get("blog_name")?,
        post_type: row.try_get("post_type")?,
        created_at: row.try_get("created_at")?,
        content: serde_json::from_str(&content)?,
    })
}

/// Expand a leading `~/` and make sure the parent directory exists.
fn prepare_sqlite_path(location: &Path) -> std::io::Result<PathBuf> {
    let expanded = match location.strip_prefix("~") {
        Ok(rest) => match std::env::var("HOME") {
            Ok(home) => PathBuf::from(home).join(rest),
            Err(_) => location.to_path_buf(),
        },
        Err(_) => location.to_path_buf(),
    };

    if let Some(parent) = expanded.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(expanded)
}
