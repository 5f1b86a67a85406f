//! Session-scoped chat controller
//!
//! Owns the store, the API client, the realtime channel, and the unread
//! reconciler for one authenticated user, and wires the realtime event loop
//! that applies incoming messages through the store. Ownership is explicit:
//! the session is constructed with its collaborators, exposes awaitable
//! channels to the presentation layer, and tears everything down in
//! [`shutdown`](ChatSession::shutdown).

use crate::{
    api::{ChatApi, SendMessageRequest},
    config::Config,
    socket::{SocketChannel, SocketEvent},
    store::{Message, MessageStore, Room},
    sync::{RoomSubscription, SyncEngine},
    unread::UnreadReconciler,
    Error, Result,
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session-scoped controller for the chat subsystem
///
/// # Example
/// ```rust,no_run
/// use roomsync::api::HttpChatApi;
/// use roomsync::config::Config;
/// use roomsync::session::ChatSession;
/// use roomsync::store::MessageStore;
/// use std::sync::Arc;
///
/// # async fn example() -> roomsync::Result<()> {
/// let config = Config::load("roomsync.json")?;
/// let store = Arc::new(MessageStore::open(&config.database_path)?);
/// let api = Arc::new(HttpChatApi::new(&config.api_base_url));
///
/// let session = ChatSession::start("user_123", api, store, &config)?;
///
/// let mut thread = session.enter_room("room_1")?;
/// while let Some(messages) = thread.recv().await {
///     println!("{} messages", messages.len());
/// }
/// session.leave_room("room_1")?;
/// session.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct ChatSession<A: ChatApi> {
    user_id: String,
    api: Arc<A>,
    store: Arc<MessageStore>,
    sync: SyncEngine<A>,
    reconciler: Arc<UnreadReconciler>,
    socket: Arc<SocketChannel>,
    active_room: Arc<Mutex<Option<String>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl<A: ChatApi + 'static> ChatSession<A> {
    /// Start a session: connect the realtime channel and begin consuming it
    ///
    /// # Arguments
    /// * `user_id` - Authenticated user; an empty id fails the precondition
    /// * `api` - REST collaborator (injected, substitutable in tests)
    /// * `store` - Local message store
    /// * `config` - Socket address and reconnect policy
    pub fn start(
        user_id: impl Into<String>,
        api: Arc<A>,
        store: Arc<MessageStore>,
        config: &Config,
    ) -> Result<Self> {
        let user_id = user_id.into();
        if user_id.is_empty() {
            return Err(Error::Precondition(
                "chat session requires a user id".to_string(),
            ));
        }

        let (socket, events) = SocketChannel::new(
            &config.socket_addr,
            config.reconnect_base_delay_ms,
            config.reconnect_max_delay_ms,
            config.event_buffer,
        );
        let socket = Arc::new(socket);
        socket.connect(&user_id)?;

        let sync = SyncEngine::new(Arc::clone(&api), Arc::clone(&store));
        let reconciler = Arc::new(UnreadReconciler::new(Arc::clone(&store)));
        let active_room = Arc::new(Mutex::new(None));

        let event_loop = tokio::spawn(run_event_loop(
            events,
            Arc::clone(&store),
            Arc::clone(&reconciler),
            Arc::clone(&active_room),
        ));

        info!("Chat session started for user {}", user_id);
        Ok(Self {
            user_id,
            api,
            store,
            sync,
            reconciler,
            socket,
            active_room,
            event_loop: Mutex::new(Some(event_loop)),
        })
    }

    /// Open a room: mark it read, scope socket delivery, and start syncing
    ///
    /// Marks the room read exactly once per entry regardless of how many
    /// messages arrived while entering. Returns a subscription that publishes
    /// the cached history immediately and the merged history after the
    /// background sync completes.
    pub fn enter_room(&self, room_id: &str) -> Result<RoomSubscription> {
        *self
            .active_room
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(room_id.to_string());

        self.socket.join_room(room_id)?;
        self.reconciler.on_room_entered(room_id)?;

        Ok(self.sync.subscribe(room_id))
    }

    /// Leave a room: mark it read defensively and resync in the background
    ///
    /// The exit-time read-marking guards against messages that arrived during
    /// the viewing session but were never explicitly acknowledged; the
    /// background sync captures anything missed while the socket was the only
    /// delivery channel.
    pub fn leave_room(&self, room_id: &str) -> Result<()> {
        {
            let mut active = self
                .active_room
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if active.as_deref() == Some(room_id) {
                *active = None;
            }
        }

        self.socket.leave_room(room_id)?;
        self.reconciler.on_room_exited(room_id)?;

        let sync = self.sync.clone();
        let reconciler = Arc::clone(&self.reconciler);
        let room = room_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = sync.sync_room(&room).await {
                warn!("Post-exit sync failed for room {}: {}", room, e);
            }
            if let Err(e) = reconciler.publish_rooms() {
                warn!("Room list republish failed after exit: {}", e);
            }
        });

        Ok(())
    }

    /// The app returned to the foreground: refresh rooms and republish counts
    pub async fn handle_foreground(&self) -> Result<Vec<Room>> {
        let rooms = self.sync.sync_rooms().await?;
        self.reconciler.on_foreground()?;
        Ok(rooms)
    }

    /// Send a message to a room
    ///
    /// Delivery is fire-and-forget from the UI's perspective: the server echo
    /// is written through the store and returned. Send failures are
    /// user-actionable and propagate to the caller.
    pub async fn send_message(
        &self,
        room_id: &str,
        content: &str,
        files: &[String],
    ) -> Result<Message> {
        let request = SendMessageRequest {
            client_msg_id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            files: files.to_vec(),
        };

        let echoed = self.api.send_message(room_id, &request).await?;
        let message = echoed.into_message();

        // The socket may deliver our own message back before the echo lands;
        // the store's at-most-once insert makes the order irrelevant.
        if !self.store.save_message(&message)? {
            debug!("Echoed message {} was already stored", message.id);
        }
        self.reconciler.publish_rooms()?;

        Ok(message)
    }

    /// Canonical room list from the local store (no network)
    pub fn rooms(&self) -> Result<Vec<Room>> {
        self.store.rooms()
    }

    /// Subscribe to room-list snapshots published by the reconciler
    pub fn room_updates(&self) -> watch::Receiver<Vec<Room>> {
        self.reconciler.subscribe()
    }

    /// User this session belongs to
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Tear the session down: stop the event loop and close the socket
    pub fn shutdown(&self) {
        self.socket.shutdown();
        if let Some(handle) = self
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        info!("Chat session for user {} shut down", self.user_id);
    }
}

/// Consume realtime events: write messages through the store, reconcile
/// unread state, and surface channel errors as log lines.
async fn run_event_loop(
    mut events: mpsc::Receiver<SocketEvent>,
    store: Arc<MessageStore>,
    reconciler: Arc<UnreadReconciler>,
    active_room: Arc<Mutex<Option<String>>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SocketEvent::Message(dto) => {
                let message = dto.into_message();
                let viewing = active_room
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_deref()
                    == Some(message.room_id.as_str());

                // Write through the store first; duplicate deliveries
                // collapse here and never double-count unread state.
                match store.save_message(&message) {
                    Ok(true) => {
                        if let Err(e) = reconciler.on_message(
                            &message.room_id,
                            &message.preview(),
                            message.created_at,
                            viewing,
                        ) {
                            warn!(
                                "Unread reconciliation failed for room {}: {}",
                                message.room_id, e
                            );
                        }
                    }
                    Ok(false) => {
                        debug!("Dropped duplicate delivery of message {}", message.id);
                    }
                    Err(e) => {
                        warn!("Failed to persist realtime message {}: {}", message.id, e);
                    }
                }
            }
            SocketEvent::Connected => {
                info!("Realtime channel connected");
            }
            SocketEvent::Disconnected => {
                debug!("Realtime channel lost, auto-reconnect in progress");
            }
            SocketEvent::Error(message) => {
                warn!("Realtime channel error: {}", message);
            }
        }
    }
}
