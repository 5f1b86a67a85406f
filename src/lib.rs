//! Roomsync - chat synchronization core for the marketplace client
//!
//! This library provides the client-side chat subsystem: durable local
//! message storage, incremental server sync, realtime socket delivery,
//! and unread-count reconciliation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod session;
pub mod socket;
pub mod store;
pub mod sync;
pub mod unread;

#[cfg(test)]
mod tests;

/// Result type alias for roomsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for roomsync operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Storage operation error
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Chat API error
    #[error("API error: {0}")]
    Api(String),

    /// Realtime socket error
    #[error("Socket error: {0}")]
    Socket(String),

    /// Required precondition not met (surfaced instead of silently ignored)
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Initialize the roomsync library with logging
pub fn init() {
    tracing_subscriber::fmt::init();
}
