//! Messages module for Parley Server
//!
//! The durable message log. Every routed message is appended here whether
//! or not the recipient was online; the history endpoint reads it back.

mod repository;

pub use repository::MessageRepository;

use serde::Serialize;

/// Maximum rows returned by one history query.
pub const MAX_HISTORY_LIMIT: u32 = 200;

/// Rows returned when the caller does not ask for a limit.
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// A logged message with usernames resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: i64,
    pub sender_username: String,
    pub receiver_username: String,
    pub content: String,
    pub created_at: String,
}
