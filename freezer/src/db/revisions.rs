//! Revision rows: one stored snapshot per `(storage_id, revision_id)`.

use crate::db::connection::DbPool;
use crate::utils::errors::{FreezerError, Result};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};

/// Default base name of the revision table
pub const DEFAULT_TABLE_NAME: &str = "persist";

/// One stored snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub storage_id: String,
    pub revision_id: i64,
    pub data_blob: Vec<u8>,
    pub timestamp: i64,
    pub checksum: String,
}

/// Values written by an upsert
#[derive(Debug, Clone, Copy)]
pub struct RevisionWrite<'a> {
    pub blob: &'a [u8],
    pub timestamp: i64,
    pub checksum: &'a str,
}

/// Access to the revision table
pub trait RevisionStore: Send + Sync {
    /// Highest revision id for `storage_id`, or None when nothing was ever stored.
    fn current_revision(&self, storage_id: &str) -> Result<Option<i64>>;

    /// Insert a new revision (`current + 1`, or 0 when `current` is None) when
    /// `as_new_revision` is set or nothing exists yet; otherwise overwrite
    /// `current` in place. Returns the revision id written.
    fn upsert(
        &self,
        storage_id: &str,
        current: Option<i64>,
        write: &RevisionWrite<'_>,
        as_new_revision: bool,
    ) -> Result<i64>;

    /// Most recent row for `(storage_id, revision_id)` with a timestamp at or
    /// after `not_before`.
    fn fetch(&self, storage_id: &str, revision_id: i64, not_before: i64)
        -> Result<Option<Revision>>;
}

/// Build the physical table name from the configured prefix and base name.
pub fn table_name(prefix: &str, name: &str) -> Result<String> {
    let table = format!("{}{}", prefix, name);

    let valid = table
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid {
        return Err(FreezerError::Config(format!(
            "\"{}\" is not a valid table name",
            table
        )));
    }

    Ok(table)
}

fn row_to_revision(row: &Row) -> rusqlite::Result<Revision> {
    Ok(Revision {
        storage_id: row.get("storage_id")?,
        revision_id: row.get("revision_id")?,
        data_blob: row.get::<_, Option<Vec<u8>>>("data_blob")?.unwrap_or_default(),
        timestamp: row.get("time_stamp")?,
        checksum: row.get("check_sum")?,
    })
}

/// Revision table in a SQLite database
#[derive(Clone)]
pub struct SqliteRevisionStore {
    pool: DbPool,
    table: String,
}

impl SqliteRevisionStore {
    /// Wrap `table` in `pool`, creating the table if it does not exist yet.
    pub fn open(pool: DbPool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        let table = table_name("", &table)?;

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
  storage_id TEXT NOT NULL,
  revision_id INTEGER NOT NULL DEFAULT 0 CHECK(revision_id >= 0),
  data_blob BLOB,
  time_stamp INTEGER NOT NULL,
  check_sum TEXT NOT NULL,
  PRIMARY KEY (storage_id, revision_id)
);"
        );

        let conn = pool.get().map_err(|e| FreezerError::store(&table, e))?;
        conn.execute_batch(&ddl).map_err(|e| {
            FreezerError::store(&table, format!("unable to create storage table: {}", e))
        })?;

        debug!(table = %table, "Storage table ready");
        Ok(Self { pool, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn conn(
        &self,
        storage_id: &str,
    ) -> Result<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>> {
        self.pool.get().map_err(|e| FreezerError::store(storage_id, e))
    }
}

impl RevisionStore for SqliteRevisionStore {
    fn current_revision(&self, storage_id: &str) -> Result<Option<i64>> {
        let conn = self.conn(storage_id)?;
        let sql = format!(
            "SELECT MAX(revision_id) FROM {} WHERE storage_id = ?1",
            self.table
        );

        conn.query_row(&sql, params![storage_id], |row| row.get::<_, Option<i64>>(0))
            .map_err(|e| {
                FreezerError::store(storage_id, format!("revision check failed: {}", e))
            })
    }

    fn upsert(
        &self,
        storage_id: &str,
        current: Option<i64>,
        write: &RevisionWrite<'_>,
        as_new_revision: bool,
    ) -> Result<i64> {
        let conn = self.conn(storage_id)?;

        match current {
            Some(revision_id) if !as_new_revision => {
                let sql = format!(
                    "UPDATE {} SET data_blob = ?1, time_stamp = ?2, check_sum = ?3
                     WHERE storage_id = ?4 AND revision_id = ?5",
                    self.table
                );
                let changed = conn
                    .execute(
                        &sql,
                        params![write.blob, write.timestamp, write.checksum, storage_id, revision_id],
                    )
                    .map_err(|e| FreezerError::store(storage_id, e))?;

                if changed == 0 {
                    return Err(FreezerError::store(
                        storage_id,
                        format!("revision {} disappeared before it could be updated", revision_id),
                    ));
                }

                info!(storage_id, revision_id, "Revision overwritten");
                Ok(revision_id)
            }
            _ => {
                let revision_id = current.map_or(0, |c| c + 1);
                let sql = format!(
                    "INSERT INTO {} (storage_id, revision_id, data_blob, time_stamp, check_sum)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    self.table
                );
                conn.execute(
                    &sql,
                    params![storage_id, revision_id, write.blob, write.timestamp, write.checksum],
                )
                .map_err(|e| FreezerError::store(storage_id, e))?;

                info!(storage_id, revision_id, "Revision inserted");
                Ok(revision_id)
            }
        }
    }

    fn fetch(
        &self,
        storage_id: &str,
        revision_id: i64,
        not_before: i64,
    ) -> Result<Option<Revision>> {
        let conn = self.conn(storage_id)?;
        let sql = format!(
            "SELECT storage_id, revision_id, data_blob, time_stamp, check_sum FROM {}
             WHERE storage_id = ?1 AND revision_id = ?2 AND time_stamp >= ?3
             ORDER BY time_stamp DESC
             LIMIT 1",
            self.table
        );

        conn.query_row(&sql, params![storage_id, revision_id, not_before], |row| {
            row_to_revision(row)
        })
        .optional()
        .map_err(|e| {
            FreezerError::store(storage_id, format!("error retrieving data to restore: {}", e))
        })
    }
}
