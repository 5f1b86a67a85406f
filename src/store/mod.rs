//! Local message store
//!
//! This module owns persistent chat state:
//! - Message history per room
//! - Room records with unread counts
//! - Participant snapshots
//!
//! The module is organized into submodules:
//! - `message` - Message structures and sender snapshots
//! - `room` - Room records and participants
//! - `db` - SQLite-backed store
//! - `migrations` - Schema versioning

// Submodules
pub mod db;
pub mod message;
pub mod migrations;
pub mod room;

// Re-export commonly used types
pub use db::MessageStore;
pub use message::{Message, MessageKind, Sender};
pub use room::{Participant, Room};
