//! Local persistent cache for resolved date labels and consumption flags.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database Error: {0}")]
    DatabaseError(String),
    #[error("Other Error: {0}")]
    Other(String),
}

#[derive(Clone)]
pub struct CacheManager {
    conn: Arc<Mutex<Connection>>,
}

fn apply_migrations(conn: &mut Connection) -> Result<(), CacheError> {
    let migrations = Migrations::new(vec![
        M::up(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);\
             INSERT INTO schema_version (version) VALUES (1);\
             CREATE TABLE IF NOT EXISTS date_labels (\
                 id TEXT PRIMARY KEY,\
                 label TEXT NOT NULL\
             );"
        ),
        M::up(
            "CREATE TABLE IF NOT EXISTS consumed (\
                 id TEXT PRIMARY KEY,\
                 consumed INTEGER NOT NULL DEFAULT 0,\
                 timestamp TEXT\
             );\
             UPDATE schema_version SET version = 2;"
        ),
    ]);
    migrations
        .to_latest(conn)
        .map_err(|e| CacheError::DatabaseError(format!("Failed to apply migrations: {}", e)))?;
    Ok(())
}

impl CacheManager {
    pub fn new(db_path: &Path) -> Result<Self, CacheError> {
        let mut conn = Connection::open(db_path)
            .map_err(|e| CacheError::DatabaseError(format!("Failed to open database: {}", e)))?;
        apply_migrations(&mut conn)?;

        Ok(CacheManager { conn: Arc::new(Mutex::new(conn)) })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<Connection>, CacheError> {
        self.conn
            .lock()
            .map_err(|_| CacheError::Other("Poisoned lock".into()))
    }

    pub fn get_label(&self, id: &str) -> Result<Option<String>, CacheError> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT label FROM date_labels WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| CacheError::DatabaseError(format!("Failed to query label: {}", e)))
    }

    /// Store a resolved label. Empty labels are skipped so an exhausted
    /// cascade is not permanently pinned to "".
    pub fn put_label(&self, id: &str, label: &str) -> Result<(), CacheError> {
        if label.is_empty() {
            return Ok(());
        }
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO date_labels (id, label) VALUES (?1, ?2)",
            params![id, label],
        )
        .map_err(|e| CacheError::DatabaseError(format!("Failed to insert label: {}", e)))?;
        Ok(())
    }

    pub fn all_labels(&self) -> Result<HashMap<String, String>, CacheError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT id, label FROM date_labels")
            .map_err(|e| CacheError::DatabaseError(format!("Failed to prepare statement: {}", e)))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| CacheError::DatabaseError(format!("Failed to query labels: {}", e)))?;

        let mut map = HashMap::new();
        for row in rows {
            let (id, label) =
                row.map_err(|e| CacheError::DatabaseError(format!("Failed to read row: {}", e)))?;
            map.insert(id, label);
        }
        Ok(map)
    }

    pub fn set_consumed(
        &self,
        id: &str,
        consumed: bool,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), CacheError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO consumed (id, consumed, timestamp) VALUES (?1, ?2, ?3)",
            params![id, consumed as i64, timestamp.map(|t| t.to_rfc3339())],
        )
        .map_err(|e| CacheError::DatabaseError(format!("Failed to set consumed flag: {}", e)))?;
        Ok(())
    }

    pub fn all_consumed(&self) -> Result<HashMap<String, bool>, CacheError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("SELECT id, consumed FROM consumed")
            .map_err(|e| CacheError::DatabaseError(format!("Failed to prepare statement: {}", e)))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0)))
            .map_err(|e| CacheError::DatabaseError(format!("Failed to query consumed: {}", e)))?;

        let mut map = HashMap::new();
        for row in rows {
            let (id, flag) =
                row.map_err(|e| CacheError::DatabaseError(format!("Failed to read row: {}", e)))?;
            map.insert(id, flag);
        }
        Ok(map)
    }

    pub async fn get_label_async(&self, id: String) -> Result<Option<String>, CacheError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.get_label(&id))
            .await
            .map_err(|e| CacheError::Other(e.to_string()))?
    }

    pub async fn put_label_async(&self, id: String, label: String) -> Result<(), CacheError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.put_label(&id, &label))
            .await
            .map_err(|e| CacheError::Other(e.to_string()))?
    }

    pub async fn set_consumed_async(
        &self,
        id: String,
        consumed: bool,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), CacheError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.set_consumed(&id, consumed, timestamp))
            .await
            .map_err(|e| CacheError::Other(e.to_string()))?
    }

    pub async fn all_consumed_async(&self) -> Result<HashMap<String, bool>, CacheError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.all_consumed())
            .await
            .map_err(|e| CacheError::Other(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn label_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let cache = CacheManager::new(file.path()).unwrap();
        assert_eq!(cache.get_label("photos/2025/001.jpg").unwrap(), None);
        cache.put_label("photos/2025/001.jpg", "2024,03,01").unwrap();
        assert_eq!(
            cache.get_label("photos/2025/001.jpg").unwrap().as_deref(),
            Some("2024,03,01")
        );
    }

    #[test]
    fn empty_label_is_not_stored() {
        let file = NamedTempFile::new().unwrap();
        let cache = CacheManager::new(file.path()).unwrap();
        cache.put_label("videos/2025/v001.mp4", "").unwrap();
        assert_eq!(cache.get_label("videos/2025/v001.mp4").unwrap(), None);
    }
}
