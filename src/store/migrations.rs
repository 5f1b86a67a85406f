//! Database migration runner
//!
//! Migrations run in order on every [`MessageStore`](super::MessageStore)
//! open. Each migration is guarded by the `user_version` pragma so it runs
//! exactly once per database file.

use crate::Result;
use rusqlite::Connection;

/// Current schema version. Bump this and add a new migration whenever the
/// schema changes.
const CURRENT_VERSION: u32 = 1;

/// Run all pending migrations against the open connection.
///
/// Reads `PRAGMA user_version` to determine which migrations have already
/// been applied, then executes any outstanding ones in order.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    tracing::debug!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking database migrations"
    );

    if current < 1 {
        tracing::info!("applying migration v1 (initial schema)");
        v1_initial(conn)?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    // Future migrations would be added here:
    // if current < 2 {
    //     v2_xxx(conn)?;
    //     conn.pragma_update(None, "user_version", 2)?;
    // }

    Ok(())
}

/// Initial schema: rooms, messages, and the room/time query index.
fn v1_initial(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS rooms (
            id TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            participants TEXT NOT NULL DEFAULT '[]',
            last_message_id TEXT,
            unread_count INTEGER NOT NULL DEFAULT 0,
            last_push_preview TEXT,
            last_push_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            room_id TEXT NOT NULL,
            content TEXT NOT NULL,
            files TEXT NOT NULL DEFAULT '[]',
            sender TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0,
            kind TEXT NOT NULL DEFAULT 'text'
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room_created
            ON messages(room_id, created_at);",
    )?;

    Ok(())
}
