//! Chat REST API collaborator
//!
//! Thin client for the chat endpoints the sync core depends on:
//! - `GET /chats` - room list with embedded last-message preview
//! - `GET /chats/{roomId}?next={cursor}` - messages newer than the cursor
//! - `POST /chats/{roomId}` - send a message, echoed back as created
//!
//! The core consumes this through the [`ChatApi`] trait so tests can
//! substitute a fake; [`HttpChatApi`] is the production implementation.

use crate::{
    store::{Message, MessageKind, Participant, Room, Sender},
    Error, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// User record as shipped by the server (sender snapshots and participants)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    /// User id
    pub user_id: String,
    /// Display name
    pub nickname: String,
    /// Profile introduction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduction: Option<String>,
    /// Avatar path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

impl UserDto {
    /// Convert into a frozen sender snapshot
    pub fn into_sender(self) -> Sender {
        Sender {
            user_id: self.user_id,
            nickname: self.nickname,
            introduction: self.introduction,
            profile_image: self.profile_image,
        }
    }

    /// Convert into a room participant snapshot
    pub fn into_participant(self) -> Participant {
        Participant {
            user_id: self.user_id,
            nickname: self.nickname,
            introduction: self.introduction,
            profile_image: self.profile_image,
        }
    }
}

/// Message record as shipped by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    /// Server-assigned message id
    pub id: String,
    /// Room the message belongs to
    #[serde(alias = "room_id")]
    pub room_id: String,
    /// Text content; empty when the payload is attachments only
    #[serde(default)]
    pub content: String,
    /// Attached file paths
    #[serde(default)]
    pub files: Vec<String>,
    /// Sender snapshot
    pub sender: UserDto,
    /// Creation timestamp (server-authoritative)
    pub created_at: DateTime<Utc>,
    /// Update timestamp; servers omitting it imply "same as created"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Message kind
    #[serde(default)]
    pub kind: MessageKind,
}

impl MessageDto {
    /// Convert into the domain message; new arrivals start unread
    pub fn into_message(self) -> Message {
        let updated_at = self.updated_at.unwrap_or(self.created_at);
        Message {
            id: self.id,
            room_id: self.room_id,
            content: self.content,
            files: self.files,
            sender: self.sender.into_sender(),
            created_at: self.created_at,
            updated_at,
            is_read: false,
            kind: self.kind,
        }
    }
}

/// Room record as shipped by `GET /chats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDto {
    /// Room id
    pub id: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Latest-activity timestamp
    pub updated_at: DateTime<Utc>,
    /// Participants
    #[serde(default)]
    pub participants: Vec<UserDto>,
    /// Embedded preview of the newest message, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageDto>,
}

impl RoomDto {
    /// Convert into the domain room
    ///
    /// Unread count and push preview are locally derived state and are never
    /// taken from the server.
    pub fn into_room(self) -> Room {
        let last_message_id = self.last_message.as_ref().map(|m| m.id.clone());
        Room {
            id: self.id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            participants: self
                .participants
                .into_iter()
                .map(UserDto::into_participant)
                .collect(),
            last_message_id,
            unread_count: 0,
            last_push_preview: None,
            last_push_at: None,
        }
    }
}

/// Body for `POST /chats/{roomId}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Client-generated id so a retried send stays idempotent on the server
    pub client_msg_id: String,
    /// Text content
    pub content: String,
    /// Attached file paths
    #[serde(default)]
    pub files: Vec<String>,
}

/// Network collaborator for the chat sync core
///
/// Injected into the sync engine and session at startup rather than reached
/// through an ambient singleton, so tests can substitute a fake.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Fetch the room list with last-message previews
    async fn fetch_rooms(&self) -> Result<Vec<RoomDto>>;

    /// Fetch messages for a room strictly newer than `since`
    ///
    /// `None` requests full history; the server decides page size and order.
    async fn fetch_messages(
        &self,
        room_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageDto>>;

    /// Send a message; the server echoes the created record
    async fn send_message(&self, room_id: &str, request: &SendMessageRequest)
        -> Result<MessageDto>;
}

/// HTTP implementation of [`ChatApi`]
pub struct HttpChatApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpChatApi {
    /// Create a client against the given API base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_rooms(&self) -> Result<Vec<RoomDto>> {
        debug!("Fetching room list");

        let response = self.client.get(self.url("/chats")).send().await?;
        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "Room list fetch failed with status {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn fetch_messages(
        &self,
        room_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<MessageDto>> {
        let mut request = self.client.get(self.url(&format!("/chats/{}", room_id)));

        // The cursor travels as an ISO-8601 UTC timestamp; omitting it
        // requests full history.
        if let Some(since) = since {
            let cursor = since.to_rfc3339_opts(SecondsFormat::Millis, true);
            debug!("Fetching messages for room {} since {}", room_id, cursor);
            request = request.query(&[("next", cursor)]);
        } else {
            debug!("Fetching full message history for room {}", room_id);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "Message fetch for room {} failed with status {}",
                room_id,
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    async fn send_message(
        &self,
        room_id: &str,
        request: &SendMessageRequest,
    ) -> Result<MessageDto> {
        debug!("Sending message to room {}", room_id);

        let response = self
            .client
            .post(self.url(&format!("/chats/{}", room_id)))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "Message send to room {} failed with status {}",
                room_id,
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}
