//! SQLite-backed store for chat messages and rooms
//!
//! The store is the single owner of persisted chat state. The sync engine and
//! the realtime channel write through it and re-read the canonical lists;
//! neither keeps message state of its own.

use crate::{
    store::{
        message::{Message, MessageKind, Sender},
        migrations,
        room::{Participant, Room},
    },
    Error, Result,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed message and room store
///
/// Concurrent access is serialized by a store-level mutex: a background sync
/// write racing a socket-delivery write to the same room must not corrupt
/// data, and store operations are short enough that coarse locking suffices.
pub struct MessageStore {
    conn: Mutex<Connection>,
}

impl MessageStore {
    /// Open (or create) a store backed by a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Storage(format!("Failed to create data directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;

        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("store mutex poisoned".to_string()))
    }

    // ========== Messages ==========

    /// Save a message with at-most-once semantics
    ///
    /// Upserts by message id: if a record with the same id already exists it
    /// is not overwritten, so a duplicate socket delivery or an overlapping
    /// sync window cannot corrupt an already-materialized record.
    ///
    /// # Returns
    /// * `Ok(true)` - Message was new and is now durably stored
    /// * `Ok(false)` - Message id was already present; nothing changed
    pub fn save_message(&self, message: &Message) -> Result<bool> {
        let conn = self.conn()?;
        Self::insert_message(&conn, message)
    }

    /// Save a batch of messages atomically
    ///
    /// Either every new message in the batch is durably saved or none are;
    /// callers rely on this to avoid reprocessing a half-applied sync window.
    ///
    /// # Returns
    /// The number of newly inserted messages (duplicates are skipped).
    pub fn save_messages(&self, messages: &[Message]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut inserted = 0;
        for message in messages {
            if Self::insert_message(&tx, message)? {
                inserted += 1;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn insert_message(conn: &Connection, message: &Message) -> Result<bool> {
        let files = serde_json::to_string(&message.files)?;
        let sender = serde_json::to_string(&message.sender)?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO messages
             (id, room_id, content, files, sender, created_at, updated_at, is_read, kind)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &message.id,
                &message.room_id,
                &message.content,
                files,
                sender,
                message.created_at.timestamp_millis(),
                message.updated_at.timestamp_millis(),
                message.is_read as i32,
                message.kind.as_str(),
            ],
        )?;

        if inserted > 0 {
            Self::bump_room_last_message(conn, message)?;
        }

        Ok(inserted > 0)
    }

    /// Update the room's last-message reference when this message is newer,
    /// creating the room row if it doesn't exist yet.
    fn bump_room_last_message(conn: &Connection, message: &Message) -> Result<()> {
        conn.execute(
            "INSERT INTO rooms (id, created_at, updated_at, participants, last_message_id)
             VALUES (?1, ?2, ?2, '[]', ?3)
             ON CONFLICT(id) DO UPDATE SET
                last_message_id = excluded.last_message_id,
                updated_at = excluded.updated_at
             WHERE excluded.updated_at >= rooms.updated_at",
            params![
                &message.room_id,
                message.created_at.timestamp_millis(),
                &message.id,
            ],
        )?;
        Ok(())
    }

    /// Load all messages for a room, ascending by creation time
    ///
    /// Ties are broken by arrival order. A room with no local messages yields
    /// an empty list; "no data" is not a failure.
    pub fn messages_for_room(&self, room_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, room_id, content, files, sender, created_at, updated_at, is_read, kind
             FROM messages WHERE room_id = ?1
             ORDER BY created_at ASC, seq ASC",
        )?;

        let rows = stmt.query_map(params![room_id], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Timestamp of the newest locally stored message for a room
    ///
    /// Returns `None` if no local messages exist, which signals "full sync
    /// needed" to the sync engine.
    pub fn last_message_date(&self, room_id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let millis: Option<i64> = conn.query_row(
            "SELECT MAX(created_at) FROM messages WHERE room_id = ?1",
            params![room_id],
            |row| row.get(0),
        )?;

        Ok(millis.and_then(DateTime::from_timestamp_millis))
    }

    // ========== Rooms ==========

    /// Mark a room as read
    ///
    /// Sets the unread count to zero, clears the push preview, and flags the
    /// stored messages read. Creates the room record if absent; calling this
    /// on a room with no prior state is not an error, and repeated calls are
    /// idempotent.
    pub fn mark_room_read(&self, room_id: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO rooms (id, created_at, updated_at, participants)
             VALUES (?1, ?2, ?2, '[]')
             ON CONFLICT(id) DO UPDATE SET
                unread_count = 0,
                last_push_preview = NULL,
                last_push_at = NULL",
            params![room_id, now],
        )?;

        conn.execute(
            "UPDATE messages SET is_read = 1 WHERE room_id = ?1 AND is_read = 0",
            params![room_id],
        )?;

        Ok(())
    }

    /// Record an unread message arrival for a room
    ///
    /// Increments the unread count by one and refreshes the push preview,
    /// creating the room record if absent.
    ///
    /// # Returns
    /// The new unread count.
    pub fn record_unread(&self, room_id: &str, preview: &str, at: DateTime<Utc>) -> Result<u32> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO rooms
             (id, created_at, updated_at, participants, unread_count, last_push_preview, last_push_at)
             VALUES (?1, ?2, ?2, '[]', 1, ?3, ?2)
             ON CONFLICT(id) DO UPDATE SET
                unread_count = rooms.unread_count + 1,
                last_push_preview = excluded.last_push_preview,
                last_push_at = excluded.last_push_at,
                updated_at = MAX(rooms.updated_at, excluded.updated_at)",
            params![room_id, at.timestamp_millis(), preview],
        )?;

        Self::unread_count_in(&conn, room_id)
    }

    /// Current unread count for a room (zero if the room is unknown)
    pub fn unread_count(&self, room_id: &str) -> Result<u32> {
        let conn = self.conn()?;
        Self::unread_count_in(&conn, room_id)
    }

    fn unread_count_in(conn: &Connection, room_id: &str) -> Result<u32> {
        let count: Option<u32> = conn
            .query_row(
                "SELECT unread_count FROM rooms WHERE id = ?1",
                params![room_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(count.unwrap_or(0))
    }

    /// Save or update a room record
    ///
    /// Server-derived fields (participants, last message reference) are
    /// refreshed; locally derived state (unread count, push preview) is left
    /// untouched when the room already exists.
    pub fn upsert_room(&self, room: &Room) -> Result<()> {
        let participants = serde_json::to_string(&room.participants)?;
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO rooms
             (id, created_at, updated_at, participants, last_message_id,
              unread_count, last_push_preview, last_push_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                updated_at = MAX(rooms.updated_at, excluded.updated_at),
                participants = excluded.participants,
                last_message_id = COALESCE(excluded.last_message_id, rooms.last_message_id)",
            params![
                &room.id,
                room.created_at.timestamp_millis(),
                room.updated_at.timestamp_millis(),
                participants,
                &room.last_message_id,
                room.unread_count,
                &room.last_push_preview,
                room.last_push_at.map(|at| at.timestamp_millis()),
            ],
        )?;

        Ok(())
    }

    /// Load a single room record
    pub fn room(&self, room_id: &str) -> Result<Option<Room>> {
        let conn = self.conn()?;
        let room = conn
            .query_row(
                "SELECT id, created_at, updated_at, participants, last_message_id,
                        unread_count, last_push_preview, last_push_at
                 FROM rooms WHERE id = ?1",
                params![room_id],
                row_to_room,
            )
            .optional()?;

        Ok(room)
    }

    /// Load all rooms, most recently active first
    pub fn rooms(&self) -> Result<Vec<Room>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, updated_at, participants, last_message_id,
                    unread_count, last_push_preview, last_push_at
             FROM rooms ORDER BY updated_at DESC",
        )?;

        let rows = stmt.query_map([], row_to_room)?;

        let mut rooms = Vec::new();
        for row in rows {
            rooms.push(row?);
        }
        Ok(rooms)
    }

    // ========== Utility ==========

    /// Clear all data (for testing)
    pub fn clear_all(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM messages", [])?;
        conn.execute("DELETE FROM rooms", [])?;
        Ok(())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let files_json: String = row.get(3)?;
    let sender_json: String = row.get(4)?;
    let created_millis: i64 = row.get(5)?;
    let updated_millis: i64 = row.get(6)?;
    let is_read: i32 = row.get(7)?;
    let kind: String = row.get(8)?;

    let files: Vec<String> = serde_json::from_str(&files_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender: Sender = serde_json::from_str(&sender_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Message {
        id: row.get(0)?,
        room_id: row.get(1)?,
        content: row.get(2)?,
        files,
        sender,
        created_at: millis_to_datetime(created_millis, 5)?,
        updated_at: millis_to_datetime(updated_millis, 6)?,
        is_read: is_read != 0,
        kind: MessageKind::from_str_or_text(&kind),
    })
}

fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    let created_millis: i64 = row.get(1)?;
    let updated_millis: i64 = row.get(2)?;
    let participants_json: String = row.get(3)?;
    let push_millis: Option<i64> = row.get(7)?;

    let participants: Vec<Participant> =
        serde_json::from_str(&participants_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let last_push_at = match push_millis {
        Some(millis) => Some(millis_to_datetime(millis, 7)?),
        None => None,
    };

    Ok(Room {
        id: row.get(0)?,
        created_at: millis_to_datetime(created_millis, 1)?,
        updated_at: millis_to_datetime(updated_millis, 2)?,
        participants,
        last_message_id: row.get(4)?,
        unread_count: row.get(5)?,
        last_push_preview: row.get(6)?,
        last_push_at,
    })
}

fn millis_to_datetime(millis: i64, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(column, millis)
    })
}
