//! Local entity storage
//!
//! Reads served by the synced store facade come straight from here; the sync
//! engine never sits between the caller and local data.

use rusqlite::params;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{EntityKind, EntityRecord};
use crate::util::now_ms;

use super::Database;

/// Trait for the authoritative local store the facade writes through.
///
/// Implementations must return full post-write state (generated ids,
/// timestamps) and be durable before returning.
pub trait LocalStore: Send + Sync {
    /// All records in a collection, most recently updated first
    fn list(&self, kind: EntityKind) -> Result<Vec<EntityRecord>>;

    /// Look up one record
    fn get(&self, kind: EntityKind, id: &str) -> Result<Option<EntityRecord>>;

    /// Insert a record, generating an id when the payload carries none
    fn create(&self, kind: EntityKind, data: Value) -> Result<EntityRecord>;

    /// Replace a record's payload
    fn update(&self, kind: EntityKind, id: &str, data: Value) -> Result<EntityRecord>;

    /// Remove a record
    fn delete(&self, kind: EntityKind, id: &str) -> Result<()>;
}

/// `SQLite` implementation of [`LocalStore`] over a generic entity table
pub struct SqliteLocalStore {
    db: Database,
}

impl SqliteLocalStore {
    /// Create a local store over the given database
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    fn fetch(&self, kind: EntityKind, id: &str) -> Result<Option<EntityRecord>> {
        let conn = self.db.lock()?;
        let result = conn.query_row(
            "SELECT id, data, created_at, updated_at FROM entities WHERE kind = ?1 AND id = ?2",
            params![kind.as_str(), id],
            parse_record,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl LocalStore for SqliteLocalStore {
    fn list(&self, kind: EntityKind) -> Result<Vec<EntityRecord>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, data, created_at, updated_at FROM entities
             WHERE kind = ?1 ORDER BY updated_at DESC, rowid DESC",
        )?;
        let records = stmt
            .query_map(params![kind.as_str()], parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn get(&self, kind: EntityKind, id: &str) -> Result<Option<EntityRecord>> {
        self.fetch(kind, id)
    }

    fn create(&self, kind: EntityKind, data: Value) -> Result<EntityRecord> {
        let id = data
            .get("id")
            .and_then(Value::as_str)
            .map_or_else(|| Uuid::now_v7().to_string(), ToString::to_string);
        let now = now_ms();

        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO entities (kind, id, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![kind.as_str(), id, data, now],
        )?;

        Ok(EntityRecord {
            id,
            data,
            created_at: now,
            updated_at: now,
        })
    }

    fn update(&self, kind: EntityKind, id: &str, data: Value) -> Result<EntityRecord> {
        let now = now_ms();
        {
            let conn = self.db.lock()?;
            let rows = conn.execute(
                "UPDATE entities SET data = ?1, updated_at = ?2 WHERE kind = ?3 AND id = ?4",
                params![data, now, kind.as_str(), id],
            )?;
            if rows == 0 {
                return Err(Error::NotFound(format!("{kind}/{id}")));
            }
        }
        self.fetch(kind, id)?
            .ok_or_else(|| Error::NotFound(format!("{kind}/{id}")))
    }

    fn delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        let conn = self.db.lock()?;
        let rows = conn.execute(
            "DELETE FROM entities WHERE kind = ?1 AND id = ?2",
            params![kind.as_str(), id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(format!("{kind}/{id}")));
        }
        Ok(())
    }
}

fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRecord> {
    Ok(EntityRecord {
        id: row.get(0)?,
        data: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> SqliteLocalStore {
        SqliteLocalStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_create_generates_id() {
        let store = setup();
        let record = store
            .create(EntityKind::Player, json!({"name": "Alice"}))
            .unwrap();
        assert!(!record.id.is_empty());
        assert_eq!(record.created_at, record.updated_at);

        let fetched = store.get(EntityKind::Player, &record.id).unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[test]
    fn test_create_honors_caller_id() {
        let store = setup();
        let record = store
            .create(EntityKind::Season, json!({"id": "s-2026", "name": "Spring"}))
            .unwrap();
        assert_eq!(record.id, "s-2026");
    }

    #[test]
    fn test_update_and_delete() {
        let store = setup();
        let record = store
            .create(EntityKind::Player, json!({"name": "Alice"}))
            .unwrap();

        let updated = store
            .update(EntityKind::Player, &record.id, json!({"name": "Alicia"}))
            .unwrap();
        assert_eq!(updated.data, json!({"name": "Alicia"}));
        assert!(updated.updated_at >= record.updated_at);

        store.delete(EntityKind::Player, &record.id).unwrap();
        assert!(store.get(EntityKind::Player, &record.id).unwrap().is_none());
        assert!(store.delete(EntityKind::Player, &record.id).is_err());
    }

    #[test]
    fn test_update_missing_record() {
        let store = setup();
        assert!(store
            .update(EntityKind::Player, "ghost", json!({}))
            .is_err());
    }

    #[test]
    fn test_kinds_are_isolated() {
        let store = setup();
        let record = store
            .create(EntityKind::Player, json!({"id": "x1"}))
            .unwrap();
        assert!(store.get(EntityKind::Season, &record.id).unwrap().is_none());
        assert_eq!(store.list(EntityKind::Player).unwrap().len(), 1);
        assert_eq!(store.list(EntityKind::Session).unwrap().len(), 0);
    }
}
