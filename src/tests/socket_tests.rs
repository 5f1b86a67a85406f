// Realtime channel tests - handshake, join queueing, reconnect, events

use super::harness::{message_dto, ts, FakeSocketServer};
use crate::socket::{ClientFrame, ConnectionState, ServerFrame, SocketChannel, SocketEvent};
use crate::Error;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;

fn channel_for(server: &FakeSocketServer) -> (SocketChannel, mpsc::Receiver<SocketEvent>) {
    SocketChannel::new(&server.addr, 10, 100, 16)
}

async fn next_event(events: &mut mpsc::Receiver<SocketEvent>) -> SocketEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for socket event")
        .expect("event channel closed")
}

async fn wait_for_message(events: &mut mpsc::Receiver<SocketEvent>) -> crate::api::MessageDto {
    loop {
        if let SocketEvent::Message(message) = next_event(events).await {
            return message;
        }
    }
}

#[tokio::test]
async fn test_connect_sends_auth_frame() {
    let mut server = FakeSocketServer::spawn().await;
    let (channel, _events) = channel_for(&server);

    channel.connect("buyer_1").expect("connect");

    assert_eq!(
        server.next_frame().await,
        ClientFrame::Connect {
            user_id: "buyer_1".to_string()
        }
    );
}

#[tokio::test]
async fn test_connect_with_empty_user_id_fails_precondition() {
    let server = FakeSocketServer::spawn().await;
    let (channel, _events) = channel_for(&server);

    // A missing session identity is a caller bug, not a silent no-op
    match channel.connect("") {
        Err(Error::Precondition(_)) => {}
        other => panic!("expected precondition failure, got {:?}", other.map(|_| ())),
    }
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_join_issued_before_connect_is_queued() {
    let mut server = FakeSocketServer::spawn().await;
    let (channel, _events) = channel_for(&server);

    // Join before the connection exists: queued, not dropped
    channel.join_room("room_1").expect("join");
    channel.connect("buyer_1").expect("connect");

    assert_eq!(
        server.next_frame().await,
        ClientFrame::Connect {
            user_id: "buyer_1".to_string()
        }
    );
    assert_eq!(
        server.next_frame().await,
        ClientFrame::JoinRoom {
            room_id: "room_1".to_string()
        }
    );
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let mut server = FakeSocketServer::spawn().await;
    let (channel, _events) = channel_for(&server);

    channel.connect("buyer_1").expect("first connect");
    channel.connect("buyer_1").expect("second connect");
    channel.join_room("room_1").expect("join");

    // A second Connect frame would show up before the join if the second
    // connect call had spawned another connection
    assert_eq!(
        server.next_frame().await,
        ClientFrame::Connect {
            user_id: "buyer_1".to_string()
        }
    );
    assert_eq!(
        server.next_frame().await,
        ClientFrame::JoinRoom {
            room_id: "room_1".to_string()
        }
    );
    assert_eq!(server.accepts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_join_and_leave_send_control_frames() {
    let mut server = FakeSocketServer::spawn().await;
    let (channel, _events) = channel_for(&server);

    channel.connect("buyer_1").expect("connect");
    server.next_frame().await; // Connect

    channel.join_room("room_1").expect("join");
    assert_eq!(
        server.next_frame().await,
        ClientFrame::JoinRoom {
            room_id: "room_1".to_string()
        }
    );

    channel.leave_room("room_1").expect("leave");
    assert_eq!(
        server.next_frame().await,
        ClientFrame::LeaveRoom {
            room_id: "room_1".to_string()
        }
    );
}

#[tokio::test]
async fn test_message_frames_reach_the_event_stream() {
    let mut server = FakeSocketServer::spawn().await;
    let (channel, mut events) = channel_for(&server);

    channel.connect("buyer_1").expect("connect");
    server.next_frame().await; // Connect

    server.push(ServerFrame::Message(message_dto(
        "msg_1",
        "room_1",
        "hello there",
        ts(100),
    )));

    let message = wait_for_message(&mut events).await;
    assert_eq!(message.id, "msg_1");
    assert_eq!(message.room_id, "room_1");
    assert_eq!(message.content, "hello there");
}

#[tokio::test]
async fn test_server_error_frame_surfaces_on_event_stream() {
    let mut server = FakeSocketServer::spawn().await;
    let (channel, mut events) = channel_for(&server);

    channel.connect("buyer_1").expect("connect");
    server.next_frame().await; // Connect

    server.push(ServerFrame::Error {
        message: "session expired".to_string(),
    });

    loop {
        match next_event(&mut events).await {
            SocketEvent::Error(message) => {
                assert_eq!(message, "session expired");
                break;
            }
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_reconnect_reauthenticates_and_rejoins_rooms() {
    let mut server = FakeSocketServer::spawn().await;
    let (channel, _events) = channel_for(&server);

    channel.connect("buyer_1").expect("connect");
    channel.join_room("room_1").expect("join");
    server.next_frame().await; // Connect
    server.next_frame().await; // JoinRoom

    // Kill the connection; the channel must silently heal itself
    server.drop_connection();

    assert_eq!(
        server.next_frame().await,
        ClientFrame::Connect {
            user_id: "buyer_1".to_string()
        }
    );
    assert_eq!(
        server.next_frame().await,
        ClientFrame::JoinRoom {
            room_id: "room_1".to_string()
        }
    );
    assert!(server.accepts.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_shutdown_stops_the_channel() {
    let mut server = FakeSocketServer::spawn().await;
    let (channel, _events) = channel_for(&server);

    channel.connect("buyer_1").expect("connect");
    server.next_frame().await; // Connect

    channel.shutdown();
    assert_eq!(channel.state(), ConnectionState::Disconnected);

    // The channel cannot be revived after shutdown
    match channel.connect("buyer_1") {
        Err(Error::Socket(_)) => {}
        other => panic!("expected socket error, got {:?}", other.map(|_| ())),
    }
}
