use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

use crate::transfer::{Transfer, TransferStatus};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the queue database, by default `~/.local/state/tqm/queue.db`.
#[derive(Clone)]
pub struct QueueDb {
    pool: Pool<Sqlite>,
}

impl QueueDb {
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("tqm")?;
        Self::open_at(xdg_dirs.get_state_home().join("queue.db")).await
    }

    /// Open (or create) the database at `path`, creating parent dirs.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&uri)
            .await
            .with_context(|| format!("open queue db {}", path.display()))?;
        let db = QueueDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfers (
                hash TEXT PRIMARY KEY NOT NULL,
                source TEXT NOT NULL,
                alias TEXT NOT NULL,
                position INTEGER NOT NULL,
                bytes_total INTEGER NOT NULL DEFAULT 0,
                bytes_done INTEGER NOT NULL DEFAULT 0,
                enqueue_order INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace the stored queue with `transfers`, in order, in one transaction.
    pub async fn save(&self, transfers: &[Transfer]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM transfers").execute(&mut *tx).await?;
        for (position, t) in transfers.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO transfers (
                    hash, source, alias, position, bytes_total, bytes_done, enqueue_order
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&t.hash)
            .bind(&t.source)
            .bind(&t.alias)
            .bind(position as i64)
            .bind(t.bytes_total as i64)
            .bind(t.bytes_done as i64)
            .bind(t.enqueue_order as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Stored queue in position order, every transfer as Queued.
    pub async fn load(&self) -> Result<Vec<Transfer>> {
        let rows = sqlx::query(
            r#"
            SELECT hash, source, alias, bytes_total, bytes_done, enqueue_order
            FROM transfers
            ORDER BY position ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let transfers = rows
            .into_iter()
            .map(|row| Transfer {
                hash: row.get("hash"),
                source: row.get("source"),
                alias: row.get("alias"),
                status: TransferStatus::Queued,
                bytes_total: row.get::<i64, _>("bytes_total").max(0) as u64,
                bytes_done: row.get::<i64, _>("bytes_done").max(0) as u64,
                enqueue_order: row.get::<i64, _>("enqueue_order").max(0) as u64,
            })
            .collect();
        Ok(transfers)
    }
}

#[cfg(test)]
/// Open an in-memory database for tests (no disk I/O).
pub(crate) async fn open_memory() -> Result<QueueDb> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let db = QueueDb { pool };
    db.migrate().await?;
    Ok(db)
}
