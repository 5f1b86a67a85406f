//! Unread/read-state reconciliation
//!
//! Single authority for unread-count correctness. Three independent triggers
//! funnel through the same store primitives - a message arriving while the
//! room is not open, entering/exiting a room, and the app returning to the
//! foreground - so there is no in-memory counter that can diverge from the
//! persisted value. Every published count is a read-through from the store,
//! never a cached increment.

use crate::{
    store::{MessageStore, Room},
    Result,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Reconciles unread counts against the local message store
pub struct UnreadReconciler {
    store: Arc<MessageStore>,
    rooms_tx: watch::Sender<Vec<Room>>,
}

impl UnreadReconciler {
    /// Create a reconciler over the injected store
    pub fn new(store: Arc<MessageStore>) -> Self {
        let (rooms_tx, _) = watch::channel(Vec::new());
        Self { store, rooms_tx }
    }

    /// Subscribe to room-list snapshots
    ///
    /// The watch channel always holds the latest published snapshot; the
    /// presentation layer awaits changes or borrows the current value.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Room>> {
        self.rooms_tx.subscribe()
    }

    /// Apply a newly arrived message to the room's read state
    ///
    /// Increments the unread count and refreshes the push preview only when
    /// the room is not actively open; a message for the actively viewed room
    /// is reconciled to read immediately.
    pub fn on_message(
        &self,
        room_id: &str,
        preview: &str,
        at: DateTime<Utc>,
        actively_viewing: bool,
    ) -> Result<()> {
        if actively_viewing {
            self.store.mark_room_read(room_id)?;
        } else {
            let count = self.store.record_unread(room_id, preview, at)?;
            debug!("Room {} unread count now {}", room_id, count);
        }
        self.publish_rooms()
    }

    /// The user navigated into a room: mark it read
    pub fn on_room_entered(&self, room_id: &str) -> Result<()> {
        self.store.mark_room_read(room_id)?;
        self.publish_rooms()
    }

    /// The user navigated out of a room
    ///
    /// Marks the room read again defensively - messages that arrived during
    /// the viewing session may never have been explicitly acknowledged - and
    /// republishes so the room list refreshes without a network round trip.
    pub fn on_room_exited(&self, room_id: &str) -> Result<()> {
        self.store.mark_room_read(room_id)?;
        self.publish_rooms()
    }

    /// The app returned to the foreground
    ///
    /// Counts may have changed while the app was suspended and the socket was
    /// disconnected; re-read every room's canonical state and republish.
    pub fn on_foreground(&self) -> Result<()> {
        self.publish_rooms()
    }

    /// Re-read the canonical room list from the store and publish it
    pub fn publish_rooms(&self) -> Result<()> {
        let rooms = self.store.rooms()?;
        self.rooms_tx.send_replace(rooms);
        Ok(())
    }
}
