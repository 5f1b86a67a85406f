// Shared test doubles for the sync core
//
// FakeApi substitutes the REST collaborator (injected instead of reached
// through a singleton); FakeSocketServer drives the realtime channel over a
// real TCP socket.

use crate::api::{ChatApi, MessageDto, RoomDto, SendMessageRequest, UserDto};
use crate::socket::{ClientFrame, ServerFrame};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};

/// Fixed timestamp helper so tests control message ordering
pub fn ts(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().expect("valid timestamp")
}

pub fn user(id: &str) -> UserDto {
    UserDto {
        user_id: id.to_string(),
        nickname: format!("user {}", id),
        introduction: None,
        profile_image: None,
    }
}

pub fn message_dto(id: &str, room: &str, content: &str, at: DateTime<Utc>) -> MessageDto {
    MessageDto {
        id: id.to_string(),
        room_id: room.to_string(),
        content: content.to_string(),
        files: vec![],
        sender: user("seller_1"),
        created_at: at,
        updated_at: None,
        kind: Default::default(),
    }
}

pub fn room_dto(id: &str, at: DateTime<Utc>, last_message: Option<MessageDto>) -> RoomDto {
    RoomDto {
        id: id.to_string(),
        created_at: at,
        updated_at: at,
        participants: vec![user("buyer_1"), user("seller_1")],
        last_message,
    }
}

/// In-memory stand-in for the chat REST API
pub struct FakeApi {
    pub messages: Mutex<Vec<MessageDto>>,
    pub rooms: Mutex<Vec<RoomDto>>,
    /// Cursors seen by fetch_messages, in call order
    pub cursors: Mutex<Vec<Option<DateTime<Utc>>>>,
    pub fail_fetch: AtomicBool,
    /// Treat the cursor as inclusive (server returns the boundary message too)
    pub inclusive_cursor: AtomicBool,
    /// When set, fetch_messages blocks until notified (for cancellation tests)
    pub fetch_gate: Option<Arc<Notify>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            rooms: Mutex::new(Vec::new()),
            cursors: Mutex::new(Vec::new()),
            fail_fetch: AtomicBool::new(false),
            inclusive_cursor: AtomicBool::new(false),
            fetch_gate: None,
        }
    }

    pub fn with_messages(messages: Vec<MessageDto>) -> Self {
        let api = Self::new();
        *api.messages.lock().expect("lock") = messages;
        api
    }

    pub fn push_message(&self, message: MessageDto) {
        self.messages.lock().expect("lock").push(message);
    }

    pub fn recorded_cursors(&self) -> Vec<Option<DateTime<Utc>>> {
        self.cursors.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn fetch_rooms(&self) -> Result<Vec<RoomDto>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::Api("injected room fetch failure".to_string()));
        }
        Ok(self.rooms.lock().expect("lock").clone())
    }

    async fn fetch_messages(
        &self,
        room_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageDto>> {
        if let Some(gate) = &self.fetch_gate {
            gate.notified().await;
        }

        self.cursors.lock().expect("lock").push(since);

        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::Api("injected message fetch failure".to_string()));
        }

        let inclusive = self.inclusive_cursor.load(Ordering::SeqCst);
        let messages = self
            .messages
            .lock()
            .expect("lock")
            .iter()
            .filter(|m| m.room_id == room_id)
            .filter(|m| match since {
                Some(cursor) if inclusive => m.created_at >= cursor,
                Some(cursor) => m.created_at > cursor,
                None => true,
            })
            .cloned()
            .collect();

        Ok(messages)
    }

    async fn send_message(
        &self,
        room_id: &str,
        request: &SendMessageRequest,
    ) -> Result<MessageDto> {
        let echoed = MessageDto {
            id: format!("srv_{}", request.client_msg_id),
            room_id: room_id.to_string(),
            content: request.content.clone(),
            files: request.files.clone(),
            sender: user("buyer_1"),
            created_at: Utc::now(),
            updated_at: None,
            kind: Default::default(),
        };

        self.messages.lock().expect("lock").push(echoed.clone());
        Ok(echoed)
    }
}

enum ServerAction {
    Send(ServerFrame),
    DropConnection,
}

/// Scripted realtime server: records client frames, pushes server frames,
/// and can drop the connection to exercise reconnect behavior.
pub struct FakeSocketServer {
    pub addr: String,
    frames: mpsc::UnboundedReceiver<ClientFrame>,
    actions: mpsc::UnboundedSender<ServerAction>,
    pub accepts: Arc<AtomicUsize>,
}

impl FakeSocketServer {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr").to_string();

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (action_tx, mut action_rx) = mpsc::unbounded_channel();
        let accepts = Arc::new(AtomicUsize::new(0));
        let accepts_task = Arc::clone(&accepts);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                accepts_task.fetch_add(1, Ordering::SeqCst);

                let (read_half, mut write_half) = stream.into_split();
                let mut lines = BufReader::new(read_half).lines();

                loop {
                    tokio::select! {
                        line = lines.next_line() => match line {
                            Ok(Some(line)) => {
                                if let Ok(frame) = serde_json::from_str::<ClientFrame>(&line) {
                                    let _ = frame_tx.send(frame);
                                }
                            }
                            // Client went away; accept the next connection
                            _ => break,
                        },
                        action = action_rx.recv() => match action {
                            Some(ServerAction::Send(frame)) => {
                                let mut line = serde_json::to_string(&frame)
                                    .expect("serialize server frame");
                                line.push('\n');
                                if write_half.write_all(line.as_bytes()).await.is_err() {
                                    break;
                                }
                            }
                            Some(ServerAction::DropConnection) => break,
                            None => return,
                        },
                    }
                }
            }
        });

        Self {
            addr,
            frames: frame_rx,
            actions: action_tx,
            accepts,
        }
    }

    pub fn push(&self, frame: ServerFrame) {
        let _ = self.actions.send(ServerAction::Send(frame));
    }

    pub fn drop_connection(&self) {
        let _ = self.actions.send(ServerAction::DropConnection);
    }

    pub async fn next_frame(&mut self) -> ClientFrame {
        tokio::time::timeout(Duration::from_secs(2), self.frames.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("server task ended")
    }
}

/// Poll a condition until it holds or the deadline passes
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
