//! Realtime delivery channel
//!
//! Maintains a persistent socket connection, scoped per authenticated user,
//! that delivers messages sent by other participants while connected. Frames
//! travel as newline-delimited JSON with a tagged envelope. The channel never
//! persists or deduplicates messages - it pushes raw server-shaped records to
//! its event stream and leaves storage to the consumer.
//!
//! Room join/leave requests issued before the connection completes are
//! queued and flushed once authentication finishes, and the same tracked set
//! drives re-joining after a silent reconnect.

use crate::{api::MessageDto, Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection state of the realtime channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Dial or authentication in progress
    Connecting,
    /// Authenticated and receiving
    Connected,
}

/// Frames sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Authenticate the connection for a user
    #[serde(rename_all = "camelCase")]
    Connect {
        /// Id of the authenticated user
        user_id: String,
    },
    /// Scope message delivery to a room
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        /// Room to join
        room_id: String,
    },
    /// Stop message delivery for a room
    #[serde(rename_all = "camelCase")]
    LeaveRoom {
        /// Room to leave
        room_id: String,
    },
}

/// Frames pushed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerFrame {
    /// New message delivered to a joined room
    Message(MessageDto),
    /// Out-of-band error
    #[serde(rename_all = "camelCase")]
    Error {
        /// Human-readable description
        message: String,
    },
}

/// Events surfaced to the channel owner
#[derive(Debug)]
pub enum SocketEvent {
    /// A message pushed by the server (raw, not yet persisted)
    Message(MessageDto),
    /// Connection established (initial or after reconnect)
    Connected,
    /// Connection lost; the channel retries silently
    Disconnected,
    /// User-actionable error reported by the server or the initial dial
    Error(String),
}

enum Command {
    Join(String),
    Leave(String),
    Shutdown,
}

/// Realtime delivery channel
///
/// # Example
/// ```rust,no_run
/// use roomsync::socket::{SocketChannel, SocketEvent};
///
/// # async fn example() -> roomsync::Result<()> {
/// let (channel, mut events) = SocketChannel::new("chat.example.com:9000", 500, 30_000, 64);
/// channel.connect("user_123")?;
/// channel.join_room("room_1")?;
///
/// while let Some(event) = events.recv().await {
///     if let SocketEvent::Message(message) = event {
///         println!("new message in {}", message.room_id);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct SocketChannel {
    addr: String,
    base_delay_ms: u64,
    max_delay_ms: u64,
    state: Arc<Mutex<ConnectionState>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    event_tx: mpsc::Sender<SocketEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SocketChannel {
    /// Create a channel for the given socket address
    ///
    /// Returns the channel and the event stream its connection task will feed.
    /// No connection is made until [`connect`](Self::connect) is called.
    pub fn new(
        addr: impl Into<String>,
        base_delay_ms: u64,
        max_delay_ms: u64,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<SocketEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(event_buffer.max(1));

        let channel = Self {
            addr: addr.into(),
            base_delay_ms,
            max_delay_ms,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
            event_tx,
            task: Mutex::new(None),
        };

        (channel, event_rx)
    }

    /// Connect and authenticate as the given user
    ///
    /// Idempotent: calling while already connecting or connected is a no-op.
    /// An empty user id is a caller bug and fails the precondition instead of
    /// silently doing nothing.
    pub fn connect(&self, user_id: &str) -> Result<()> {
        if user_id.is_empty() {
            return Err(Error::Precondition(
                "realtime channel requires a user id to connect".to_string(),
            ));
        }

        let mut task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                debug!("Realtime channel already connecting or connected");
                return Ok(());
            }
        }

        let receiver = self
            .cmd_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::Socket("realtime channel was shut down".to_string()))?;

        info!("Connecting realtime channel to {}", self.addr);
        let handle = tokio::spawn(run_channel(
            self.addr.clone(),
            user_id.to_string(),
            self.base_delay_ms,
            self.max_delay_ms,
            Arc::clone(&self.state),
            receiver,
            self.event_tx.clone(),
        ));
        *task = Some(handle);

        Ok(())
    }

    /// Request delivery for a room
    ///
    /// Queued until the connection completes if issued early; re-applied
    /// automatically after a reconnect.
    pub fn join_room(&self, room_id: &str) -> Result<()> {
        self.send_command(Command::Join(room_id.to_string()))
    }

    /// Stop delivery for a room
    pub fn leave_room(&self, room_id: &str) -> Result<()> {
        self.send_command(Command::Leave(room_id.to_string()))
    }

    fn send_command(&self, command: Command) -> Result<()> {
        self.cmd_tx
            .send(command)
            .map_err(|_| Error::Socket("realtime channel was shut down".to_string()))
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tear the channel down
    ///
    /// Stops the connection task; the channel cannot be reconnected after
    /// this.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(handle) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) =
            ConnectionState::Disconnected;
    }
}

fn set_state(state: &Arc<Mutex<ConnectionState>>, value: ConnectionState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

enum LoopExit {
    Shutdown,
    Dropped,
}

enum BackoffOutcome {
    Retry,
    Shutdown,
}

/// Connection task: dial, authenticate, join tracked rooms, serve frames,
/// and silently reconnect with backoff when the connection drops.
async fn run_channel(
    addr: String,
    user_id: String,
    base_delay_ms: u64,
    max_delay_ms: u64,
    state: Arc<Mutex<ConnectionState>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::Sender<SocketEvent>,
) {
    let mut rooms: HashSet<String> = HashSet::new();
    let mut attempt: u32 = 0;

    loop {
        set_state(&state, ConnectionState::Connecting);

        // Apply commands queued while disconnected so the tracked-room set is
        // current before joining.
        loop {
            match commands.try_recv() {
                Ok(Command::Join(room)) => {
                    rooms.insert(room);
                }
                Ok(Command::Leave(room)) => {
                    rooms.remove(&room);
                }
                Ok(Command::Shutdown) => {
                    set_state(&state, ConnectionState::Disconnected);
                    return;
                }
                Err(_) => break,
            }
        }

        let stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Realtime connect to {} failed: {}", addr, e);
                set_state(&state, ConnectionState::Disconnected);
                if attempt == 0 {
                    // Initial connect failure is user-actionable; later
                    // attempts self-heal silently.
                    let _ = events
                        .send(SocketEvent::Error(format!("connect failed: {}", e)))
                        .await;
                }
                attempt += 1;
                match wait_backoff(&mut commands, &mut rooms, attempt, base_delay_ms, max_delay_ms)
                    .await
                {
                    BackoffOutcome::Retry => continue,
                    BackoffOutcome::Shutdown => {
                        set_state(&state, ConnectionState::Disconnected);
                        return;
                    }
                }
            }
        };

        let (read_half, mut write_half) = stream.into_split();

        // Authenticate, then scope delivery to every tracked room.
        let auth = ClientFrame::Connect {
            user_id: user_id.clone(),
        };
        let mut handshake_ok = write_frame(&mut write_half, &auth).await.is_ok();
        if handshake_ok {
            for room in &rooms {
                let frame = ClientFrame::JoinRoom {
                    room_id: room.clone(),
                };
                if write_frame(&mut write_half, &frame).await.is_err() {
                    handshake_ok = false;
                    break;
                }
            }
        }

        if !handshake_ok {
            warn!("Realtime handshake to {} failed, retrying", addr);
            set_state(&state, ConnectionState::Disconnected);
            attempt += 1;
            match wait_backoff(&mut commands, &mut rooms, attempt, base_delay_ms, max_delay_ms)
                .await
            {
                BackoffOutcome::Retry => continue,
                BackoffOutcome::Shutdown => {
                    set_state(&state, ConnectionState::Disconnected);
                    return;
                }
            }
        }

        set_state(&state, ConnectionState::Connected);
        attempt = 0;
        info!("Realtime channel connected to {}", addr);
        let _ = events.send(SocketEvent::Connected).await;

        let mut lines = BufReader::new(read_half).lines();
        let exit = loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Join(room)) => {
                        if rooms.insert(room.clone()) {
                            let frame = ClientFrame::JoinRoom { room_id: room };
                            if write_frame(&mut write_half, &frame).await.is_err() {
                                break LoopExit::Dropped;
                            }
                        }
                    }
                    Some(Command::Leave(room)) => {
                        if rooms.remove(&room) {
                            let frame = ClientFrame::LeaveRoom { room_id: room };
                            if write_frame(&mut write_half, &frame).await.is_err() {
                                break LoopExit::Dropped;
                            }
                        }
                    }
                    Some(Command::Shutdown) | None => break LoopExit::Shutdown,
                },
                line = lines.next_line() => match line {
                    Ok(Some(line)) => handle_line(&line, &events).await,
                    Ok(None) => break LoopExit::Dropped,
                    Err(e) => {
                        warn!("Realtime read error: {}", e);
                        break LoopExit::Dropped;
                    }
                },
            }
        };

        match exit {
            LoopExit::Shutdown => {
                set_state(&state, ConnectionState::Disconnected);
                info!("Realtime channel shut down");
                return;
            }
            LoopExit::Dropped => {
                // Silent self-heal: no user-facing error for an unexpected
                // disconnect, just reconnect with backoff.
                set_state(&state, ConnectionState::Disconnected);
                warn!("Realtime connection to {} lost, reconnecting", addr);
                let _ = events.send(SocketEvent::Disconnected).await;
                attempt += 1;
                match wait_backoff(&mut commands, &mut rooms, attempt, base_delay_ms, max_delay_ms)
                    .await
                {
                    BackoffOutcome::Retry => continue,
                    BackoffOutcome::Shutdown => {
                        set_state(&state, ConnectionState::Disconnected);
                        return;
                    }
                }
            }
        }
    }
}

/// Sleep out the backoff window while still tracking room commands.
async fn wait_backoff(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    rooms: &mut HashSet<String>,
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
) -> BackoffOutcome {
    let exponential = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt.min(10)));
    let capped = exponential.min(max_delay_ms);
    let jitter = rand::thread_rng().gen_range(0..=base_delay_ms.max(1));
    let delay = Duration::from_millis(capped.saturating_add(jitter));
    debug!("Realtime reconnect attempt {} in {:?}", attempt, delay);

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return BackoffOutcome::Retry,
            command = commands.recv() => match command {
                Some(Command::Join(room)) => {
                    rooms.insert(room);
                }
                Some(Command::Leave(room)) => {
                    rooms.remove(&room);
                }
                Some(Command::Shutdown) | None => return BackoffOutcome::Shutdown,
            },
        }
    }
}

async fn handle_line(line: &str, events: &mpsc::Sender<SocketEvent>) {
    match serde_json::from_str::<ServerFrame>(line) {
        Ok(ServerFrame::Message(message)) => {
            debug!("Realtime message {} for room {}", message.id, message.room_id);
            let _ = events.send(SocketEvent::Message(message)).await;
        }
        Ok(ServerFrame::Error { message }) => {
            warn!("Realtime server error: {}", message);
            let _ = events.send(SocketEvent::Error(message)).await;
        }
        Err(e) => {
            // A malformed frame is dropped, not fatal to the connection
            warn!("Ignoring unparseable realtime frame: {}", e);
        }
    }
}

async fn write_frame(write_half: &mut OwnedWriteHalf, frame: &ClientFrame) -> Result<()> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    write_half
        .write_all(line.as_bytes())
        .await
        .map_err(|e| Error::Socket(format!("Failed to send frame: {}", e)))?;
    write_half
        .flush()
        .await
        .map_err(|e| Error::Socket(format!("Failed to flush frame: {}", e)))?;
    Ok(())
}
