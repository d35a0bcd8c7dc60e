//! Relational store contract and its `sqlx`-backed implementation.
//!
//! Two tables back the whole service: `sequences` (the allocator's shared
//! row, §3) and `tiny_urls` (the short↔long mapping). The one operation the
//! rest of the crate leans on hardest is [`Store::cas_sequence_row`]: a
//! single conditional `UPDATE` whose affected-row count is the entire
//! concurrency control for segment renewal — no database-level lock is
//! taken anywhere in this module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};

/// A snapshot of the shared sequence row used to drive optimistic CAS.
#[derive(Debug, Clone, Copy)]
pub struct SequenceRow {
    pub sequence: u64,
    pub version: i64,
}

/// A short↔long URL mapping.
#[derive(Debug, Clone)]
pub struct UrlRecord {
    pub short: u64,
    pub long_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// The persistence contract the rest of the crate depends on.
///
/// Implementations must enforce uniqueness on `sequences.name` and on
/// `tiny_urls.long_url` / `tiny_urls.short` among live (non-deleted) rows,
/// and must translate uniqueness violations into [`crate::error::ErrorKind::Conflict`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Return the row id for `name`, inserting a fresh row seeded at
    /// `start_num` if none exists yet.
    async fn ensure_sequence_row(&self, name: &str, start_num: u64) -> Result<i64>;

    /// Read the current `sequence`/`version` of a row.
    async fn load_sequence_row(&self, row_id: i64) -> Result<SequenceRow>;

    /// Atomically set `sequence = new_sequence` iff the row's version still
    /// equals `expected_version`, bumping version by one. Returns whether
    /// the update applied.
    async fn cas_sequence_row(
        &self,
        row_id: i64,
        expected_version: i64,
        new_sequence: u64,
    ) -> Result<bool>;

    /// Insert a new URL record. On a `long_url` uniqueness violation,
    /// returns the pre-existing live record instead (idempotent create).
    async fn insert_url(&self, short: u64, long_url: &str) -> Result<UrlRecord>;

    /// Fetch a live record by its numeric short value.
    async fn find_by_short(&self, short: u64) -> Result<UrlRecord>;

    /// Fetch a live record by its long URL.
    async fn find_by_long_url(&self, long_url: &str) -> Result<UrlRecord>;

    /// Soft-delete a live record. Returns `NotFound` if no live row matched.
    async fn soft_delete_by_short(&self, short: u64) -> Result<()>;
}

/// `sqlx`-backed store. Targets SQLite by default; the Postgres driver
/// feature stays enabled in Cargo.toml for deployments that swap the DSN,
/// since the queries below use only syntax both drivers accept.
pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    pub async fn connect(dsn: &str, max_conn: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_conn)
            .connect(dsn)
            .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sequences (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                sequence INTEGER NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tiny_urls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                long_url TEXT NOT NULL,
                short INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                deleted_at TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS tiny_urls_long_url_live \
             ON tiny_urls(long_url) WHERE deleted_at IS NULL",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS tiny_urls_short_live \
             ON tiny_urls(short) WHERE deleted_at IS NULL",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for SqlStore {
    async fn ensure_sequence_row(&self, name: &str, start_num: u64) -> Result<i64> {
        if let Some(row) = sqlx::query("SELECT id FROM sequences WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(row.get::<i64, _>("id"));
        }
        let result = sqlx::query("INSERT INTO sequences (name, sequence, version) VALUES (?, ?, 0)")
            .bind(name)
            .bind(start_num as i64)
            .execute(&self.pool)
            .await;
        match result {
            Ok(r) => Ok(r.last_insert_rowid()),
            Err(e) => {
                let err: Error = e.into();
                if err.is_conflict() {
                    // Lost the race to create the row; someone else won.
                    let row = sqlx::query("SELECT id FROM sequences WHERE name = ?")
                        .bind(name)
                        .fetch_one(&self.pool)
                        .await?;
                    Ok(row.get::<i64, _>("id"))
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn load_sequence_row(&self, row_id: i64) -> Result<SequenceRow> {
        let row = sqlx::query("SELECT sequence, version FROM sequences WHERE id = ?")
            .bind(row_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(SequenceRow {
            sequence: row.get::<i64, _>("sequence") as u64,
            version: row.get::<i64, _>("version"),
        })
    }

    async fn cas_sequence_row(
        &self,
        row_id: i64,
        expected_version: i64,
        new_sequence: u64,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sequences SET sequence = ?, version = version + 1, \
             updated_at = CURRENT_TIMESTAMP WHERE id = ? AND version = ?",
        )
        .bind(new_sequence as i64)
        .bind(row_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_url(&self, short: u64, long_url: &str) -> Result<UrlRecord> {
        let result = sqlx::query(
            "INSERT INTO tiny_urls (long_url, short) VALUES (?, ?)",
        )
        .bind(long_url)
        .bind(short as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => self.find_by_short(short).await,
            Err(e) => {
                let err: Error = e.into();
                if err.is_conflict() {
                    self.find_by_long_url(long_url).await
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn find_by_short(&self, short: u64) -> Result<UrlRecord> {
        let row = sqlx::query(
            "SELECT long_url, short, created_at, updated_at, deleted_at FROM tiny_urls \
             WHERE short = ? AND deleted_at IS NULL",
        )
        .bind(short as i64)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("short {short} not found")))?;
        row_to_record(row)
    }

    async fn find_by_long_url(&self, long_url: &str) -> Result<UrlRecord> {
        let row = sqlx::query(
            "SELECT long_url, short, created_at, updated_at, deleted_at FROM tiny_urls \
             WHERE long_url = ? AND deleted_at IS NULL",
        )
        .bind(long_url)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("long_url not found"))?;
        row_to_record(row)
    }

    async fn soft_delete_by_short(&self, short: u64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tiny_urls SET deleted_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP \
             WHERE short = ? AND deleted_at IS NULL",
        )
        .bind(short as i64)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("short {short} not found")));
        }
        Ok(())
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<UrlRecord> {
    Ok(UrlRecord {
        short: row.get::<i64, _>("short") as u64,
        long_url: row.get("long_url"),
        created_at: parse_ts(row.get("created_at"))?,
        updated_at: parse_ts(row.get("updated_at"))?,
        deleted_at: row
            .get::<Option<String>, _>("deleted_at")
            .map(|s| parse_ts(s))
            .transpose()?,
    })
}

fn parse_ts(s: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&format!("{}Z", s.replace(' ', "T")))
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| DateTime::from_naive_utc_and_offset(ndt, Utc))
        })
        .map_err(|e| Error::internal(format!("parsing timestamp {s:?}: {e}")))
}

/// An in-memory [`Store`] used by unit tests throughout the crate so they
/// can exercise allocator/service concurrency without a real database.
/// Gated on `feature = "test-util"` too (not just `cfg(test)`) so the
/// integration tests under `tests/` can reach it.
#[cfg(any(test, feature = "test-util"))]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    #[derive(Default)]
    struct Inner {
        sequences: HashMap<String, (i64, SequenceRow)>,
        urls_by_short: HashMap<u64, UrlRecord>,
        urls_by_long: HashMap<String, u64>,
    }

    pub struct MemoryStore {
        inner: Mutex<Inner>,
        next_seq_id: AtomicI64,
    }

    impl MemoryStore {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: Mutex::new(Inner::default()),
                next_seq_id: AtomicI64::new(1),
            })
        }
    }

    pub async fn make_memory_store() -> Arc<dyn Store> {
        MemoryStore::new()
    }

    #[async_trait]
    impl Store for MemoryStore {
        async fn ensure_sequence_row(&self, name: &str, start_num: u64) -> Result<i64> {
            let mut inner = self.inner.lock();
            if let Some((id, _)) = inner.sequences.get(name) {
                return Ok(*id);
            }
            let id = self.next_seq_id.fetch_add(1, Ordering::SeqCst);
            inner.sequences.insert(
                name.to_string(),
                (
                    id,
                    SequenceRow {
                        sequence: start_num,
                        version: 0,
                    },
                ),
            );
            Ok(id)
        }

        async fn load_sequence_row(&self, row_id: i64) -> Result<SequenceRow> {
            let inner = self.inner.lock();
            inner
                .sequences
                .values()
                .find(|(id, _)| *id == row_id)
                .map(|(_, row)| *row)
                .ok_or_else(|| Error::not_found("sequence row not found"))
        }

        async fn cas_sequence_row(
            &self,
            row_id: i64,
            expected_version: i64,
            new_sequence: u64,
        ) -> Result<bool> {
            let mut inner = self.inner.lock();
            for (_, (id, row)) in inner.sequences.iter_mut() {
                if *id == row_id {
                    if row.version != expected_version {
                        return Ok(false);
                    }
                    row.sequence = new_sequence;
                    row.version += 1;
                    return Ok(true);
                }
            }
            Err(Error::not_found("sequence row not found"))
        }

        async fn insert_url(&self, short: u64, long_url: &str) -> Result<UrlRecord> {
            let mut inner = self.inner.lock();
            if let Some(existing_short) = inner.urls_by_long.get(long_url).copied() {
                return Ok(inner.urls_by_short[&existing_short].clone());
            }
            if inner.urls_by_short.contains_key(&short) {
                return Err(Error::internal("duplicate short value, allocator invariant broken"));
            }
            let now = Utc::now();
            let record = UrlRecord {
                short,
                long_url: long_url.to_string(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };
            inner.urls_by_short.insert(short, record.clone());
            inner.urls_by_long.insert(long_url.to_string(), short);
            Ok(record)
        }

        async fn find_by_short(&self, short: u64) -> Result<UrlRecord> {
            self.inner
                .lock()
                .urls_by_short
                .get(&short)
                .filter(|r| r.deleted_at.is_none())
                .cloned()
                .ok_or_else(|| Error::not_found(format!("short {short} not found")))
        }

        async fn find_by_long_url(&self, long_url: &str) -> Result<UrlRecord> {
            let inner = self.inner.lock();
            inner
                .urls_by_long
                .get(long_url)
                .and_then(|short| inner.urls_by_short.get(short))
                .filter(|r| r.deleted_at.is_none())
                .cloned()
                .ok_or_else(|| Error::not_found("long_url not found"))
        }

        async fn soft_delete_by_short(&self, short: u64) -> Result<()> {
            let mut inner = self.inner.lock();
            let record = inner
                .urls_by_short
                .get_mut(&short)
                .filter(|r| r.deleted_at.is_none())
                .ok_or_else(|| Error::not_found(format!("short {short} not found")))?;
            record.deleted_at = Some(Utc::now());
            Ok(())
        }
    }
}
