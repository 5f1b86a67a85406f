//! Message structures and sender snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of chat message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text message
    #[default]
    Text,
    /// Message carrying image attachments
    Image,
    /// Server-generated system notice
    System,
}

impl MessageKind {
    /// Database column representation
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::System => "system",
        }
    }

    /// Parse the database column representation; unknown values fall back to text
    pub fn from_str_or_text(value: &str) -> Self {
        match value {
            "image" => MessageKind::Image,
            "system" => MessageKind::System,
            _ => MessageKind::Text,
        }
    }
}

/// Snapshot of the sending user, frozen at send time
///
/// Not a live reference: profile edits made after the message was sent do not
/// rewrite history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// User id of the sender
    pub user_id: String,
    /// Display name at send time
    pub nickname: String,
    /// Profile introduction at send time
    pub introduction: Option<String>,
    /// Avatar path at send time
    pub profile_image: Option<String>,
}

impl Sender {
    /// Create a sender snapshot with only the required fields
    pub fn new(user_id: String, nickname: String) -> Self {
        Self {
            user_id,
            nickname,
            introduction: None,
            profile_image: None,
        }
    }
}

/// A chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned message id, globally unique
    pub id: String,
    /// Room this message belongs to
    pub room_id: String,
    /// Text content; may be empty when files are attached
    pub content: String,
    /// Attached file paths, in order
    pub files: Vec<String>,
    /// Sender snapshot
    pub sender: Sender,
    /// Server-authoritative creation timestamp
    pub created_at: DateTime<Utc>,
    /// Server-authoritative update timestamp
    pub updated_at: DateTime<Utc>,
    /// Local-only read flag
    pub is_read: bool,
    /// Message kind
    pub kind: MessageKind,
}

impl Message {
    /// Create a text message
    pub fn text(
        id: String,
        room_id: String,
        sender: Sender,
        content: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            room_id,
            content,
            files: Vec::new(),
            sender,
            created_at,
            updated_at: created_at,
            is_read: false,
            kind: MessageKind::Text,
        }
    }

    /// Short text used for room-list previews and push fields
    pub fn preview(&self) -> String {
        if !self.content.is_empty() {
            self.content.clone()
        } else if !self.files.is_empty() {
            "[attachment]".to_string()
        } else {
            String::new()
        }
    }
}
