//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    debug_assert!(version <= CURRENT_VERSION);
    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|v| v != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: queue and local entity store
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;

        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        -- Durable sync queue, scoped per owner identity
        CREATE TABLE IF NOT EXISTS sync_queue (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            entity_kind TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            data TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            timestamp INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 5,
            last_error TEXT,
            last_attempt INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_queue_owner_status
            ON sync_queue(owner, status);
        CREATE INDEX IF NOT EXISTS idx_queue_created
            ON sync_queue(owner, created_at);

        -- At most one pending entry per entity; merges keep this true
        CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_entity_pending
            ON sync_queue(owner, entity_kind, entity_id)
            WHERE status = 'pending';

        -- Generic local entity collections (reference local store)
        CREATE TABLE IF NOT EXISTS entities (
            kind TEXT NOT NULL,
            id TEXT NOT NULL,
            data TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (kind, id)
        );
        CREATE INDEX IF NOT EXISTS idx_entities_updated
            ON entities(kind, updated_at DESC);

        INSERT INTO schema_version (version) VALUES (1);

        COMMIT;",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_twice() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_pending_uniqueness_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();

        let insert = "INSERT INTO sync_queue
            (id, owner, entity_kind, entity_id, operation, status, timestamp, created_at)
            VALUES (?1, 'u1', 'player', 'p1', 'create', 'pending', 0, 0)";
        conn.execute(insert, ["op-1"]).unwrap();
        assert!(conn.execute(insert, ["op-2"]).is_err());

        // A second non-pending row for the same entity is allowed
        conn.execute(
            "INSERT INTO sync_queue
                (id, owner, entity_kind, entity_id, operation, status, timestamp, created_at)
                VALUES ('op-3', 'u1', 'player', 'p1', 'update', 'failed', 0, 0)",
            [],
        )
        .unwrap();
    }
}
