use crate::utils::errors::{FreezerError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

pub type DbPool = Pool<SqliteConnectionManager>;

const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode = DELETE;
     PRAGMA synchronous = FULL;
     PRAGMA busy_timeout = 5000;";

pub fn create_pool(db_path: &Path, max_size: u32) -> Result<DbPool> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| FreezerError::store(db_path.display(), e))?;
    }

    // Pragmas are per connection, so they run on every new pooled connection
    let manager = SqliteConnectionManager::file(db_path)
        .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));

    let pool = Pool::builder()
        .max_size(max_size.max(1))
        .build(manager)
        .map_err(|e| FreezerError::store(db_path.display(), e))?;

    tracing::debug!(db = %db_path.display(), max_size, "Database pool ready");
    Ok(pool)
}

pub fn close_pool(pool: &DbPool) {
    // r2d2 closes connections when the pool is dropped.
    // The checkpoint is a no-op in DELETE mode.
    if let Ok(conn) = pool.get() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_pool_creates_parent_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("nested/freezer.db");

        let pool = create_pool(&db_path, 2).unwrap();
        let conn = pool.get().unwrap();
        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();

        assert_eq!(one, 1);
        assert!(db_path.exists());
        close_pool(&pool);

        Ok(())
    }
}
