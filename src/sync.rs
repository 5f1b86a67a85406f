//! Incremental message synchronization
//!
//! Fetches only messages newer than what is already stored, merges them into
//! the local store, and republishes the canonical room history. The engine
//! never holds message state itself: it writes through the store and re-reads
//! the stored list, so the published history is always a superset of what was
//! previously published.
//!
//! Server failures degrade to locally cached state. Stale-but-available beats
//! broken: a chat screen must render its cached history even when the network
//! is gone, so fetch errors are logged and absorbed here rather than
//! propagated to the caller.

use crate::{
    api::{ChatApi, MessageDto, RoomDto},
    store::{Message, MessageStore, Room},
    Result,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Incremental sync engine for chat rooms
pub struct SyncEngine<A: ChatApi> {
    api: Arc<A>,
    store: Arc<MessageStore>,
}

impl<A: ChatApi> Clone for SyncEngine<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            store: Arc::clone(&self.store),
        }
    }
}

impl<A: ChatApi + 'static> SyncEngine<A> {
    /// Create a sync engine over the injected API client and store
    pub fn new(api: Arc<A>, store: Arc<MessageStore>) -> Self {
        Self { api, store }
    }

    /// Synchronize one room and return its canonical message history
    ///
    /// Reads the local cursor (timestamp of the newest stored message),
    /// requests only newer messages - or full history when nothing is stored -
    /// merges the result through the store's at-most-once insert, and re-reads
    /// the stored list. The just-fetched batch is never trusted as canonical.
    ///
    /// A failed fetch resolves successfully with the cached history; only
    /// storage read errors propagate.
    pub async fn sync_room(&self, room_id: &str) -> Result<Vec<Message>> {
        let cursor = self.store.last_message_date(room_id)?;
        match cursor {
            Some(since) => debug!("Syncing room {} since {}", room_id, since),
            None => debug!("Syncing room {} from full history", room_id),
        }

        match self.api.fetch_messages(room_id, cursor).await {
            Ok(batch) => {
                if !batch.is_empty() {
                    let messages: Vec<Message> =
                        batch.into_iter().map(MessageDto::into_message).collect();

                    // The server's cursor semantics may be inclusive; the
                    // store's at-most-once insert collapses any overlap.
                    match self.store.save_messages(&messages) {
                        Ok(inserted) => {
                            info!("Merged {} new messages into room {}", inserted, room_id);
                        }
                        Err(e) => {
                            warn!(
                                "Failed to merge sync batch for room {}: {}. Serving stored history.",
                                room_id, e
                            );
                        }
                    }
                }
            }
            Err(e) => {
                warn!(
                    "Message sync failed for room {}: {}. Serving cached history.",
                    room_id, e
                );
            }
        }

        self.store.messages_for_room(room_id)
    }

    /// Fetch the room list and merge previews into the store
    ///
    /// Embedded last messages are persisted first so room history stays a
    /// superset of everything the server has shown us. Returns the canonical
    /// stored room list; a failed fetch degrades to cached rooms.
    pub async fn sync_rooms(&self) -> Result<Vec<Room>> {
        match self.api.fetch_rooms().await {
            Ok(rooms) => {
                debug!("Fetched {} rooms", rooms.len());
                for dto in rooms {
                    self.merge_room(dto);
                }
            }
            Err(e) => {
                warn!("Room list fetch failed: {}. Serving cached rooms.", e);
            }
        }

        self.store.rooms()
    }

    fn merge_room(&self, dto: RoomDto) {
        if let Some(last) = dto.last_message.clone() {
            if let Err(e) = self.store.save_message(&last.into_message()) {
                warn!("Failed to persist room preview message: {}", e);
            }
        }

        let room = dto.into_room();
        if let Err(e) = self.store.upsert_room(&room) {
            warn!("Failed to persist room {}: {}", room.id, e);
        }
    }

    /// Subscribe to one room's live message list
    ///
    /// Spawns a cancellable task that first publishes the cached history (so
    /// the room renders immediately even on a slow network), then syncs and
    /// publishes the merged list. Dropping the subscription cancels the task;
    /// a late-arriving fetch for an abandoned room is dropped, not merged.
    pub fn subscribe(&self, room_id: &str) -> RoomSubscription {
        let (tx, rx) = mpsc::channel(8);
        let engine = self.clone();
        let room = room_id.to_string();

        let handle = tokio::spawn(async move {
            match engine.store.messages_for_room(&room) {
                Ok(cached) => {
                    if tx.send(cached).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("Failed to read cached history for room {}: {}", room, e);
                }
            }

            match engine.sync_room(&room).await {
                Ok(merged) => {
                    let _ = tx.send(merged).await;
                }
                Err(e) => {
                    warn!("Background sync failed for room {}: {}", room, e);
                }
            }
        });

        RoomSubscription {
            room_id: room_id.to_string(),
            updates: rx,
            handle,
        }
    }
}

/// Handle for one room's published message list
///
/// Holds the subscription task; dropping the handle aborts any in-flight
/// sync so a slow response for an abandoned room can never pollute another
/// room's view.
pub struct RoomSubscription {
    room_id: String,
    updates: mpsc::Receiver<Vec<Message>>,
    handle: JoinHandle<()>,
}

impl RoomSubscription {
    /// Room this subscription belongs to
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Await the next published message list
    ///
    /// Returns `None` once the subscription task has finished and all
    /// published lists were consumed.
    pub async fn recv(&mut self) -> Option<Vec<Message>> {
        self.updates.recv().await
    }
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
