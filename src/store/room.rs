//! Room records and participants

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user participating in a room
///
/// Immutable snapshot semantics: once embedded in a room record the
/// participant is not live-updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// User id
    pub user_id: String,
    /// Display name
    pub nickname: String,
    /// Profile introduction
    pub introduction: Option<String>,
    /// Avatar path
    pub profile_image: Option<String>,
}

/// A chat room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    /// Room id
    pub id: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Timestamp of the latest activity in this room
    pub updated_at: DateTime<Utc>,
    /// Participants, unique by user id
    pub participants: Vec<Participant>,
    /// Id of the newest message (lookup reference, not ownership)
    pub last_message_id: Option<String>,
    /// Number of locally unread messages
    pub unread_count: u32,
    /// Transient notification-derived preview, cleared on read
    pub last_push_preview: Option<String>,
    /// Timestamp of the push preview, cleared on read
    pub last_push_at: Option<DateTime<Utc>>,
}

impl Room {
    /// Create a new room with no participants or messages
    pub fn new(id: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            updated_at: created_at,
            participants: Vec::new(),
            last_message_id: None,
            unread_count: 0,
            last_push_preview: None,
            last_push_at: None,
        }
    }

    /// Add a participant, keeping the set unique by user id
    pub fn add_participant(&mut self, participant: Participant) {
        if !self
            .participants
            .iter()
            .any(|p| p.user_id == participant.user_id)
        {
            self.participants.push(participant);
        }
    }

    /// Record a newer last message for this room
    pub fn record_message(&mut self, message_id: String, at: DateTime<Utc>) {
        self.last_message_id = Some(message_id);
        if at > self.updated_at {
            self.updated_at = at;
        }
    }

    /// Reset unread state and clear the push preview
    pub fn mark_read(&mut self) {
        self.unread_count = 0;
        self.last_push_preview = None;
        self.last_push_at = None;
    }
}
