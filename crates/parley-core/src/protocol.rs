//! Wire protocol for the persistent session channel.
//!
//! All frames are JSON text. The first client frame is a [`Handshake`];
//! after that clients send [`ChatMessage`] frames and the server sends
//! [`ChatMessage`] (forwarded) or [`Notice`] frames.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::types::Profile;

/// Acknowledgment sent to the sender after every routed message.
pub const STATUS_MESSAGE_SENT: &str = "Message sent!";
/// Sent when the receiver username does not resolve.
pub const ERROR_USER_NOT_FOUND: &str = "User not found";
/// Sent when the receiver lookup fails for a reason other than absence.
pub const ERROR_LOOKUP_FAILED: &str = "Recipient lookup failed";
/// Sent when handshake credentials are rejected.
pub const ERROR_INVALID_CREDENTIALS: &str = "Invalid credentials";
/// Sent when registration-on-connect fails.
pub const ERROR_REGISTRATION_FAILED: &str = "Registration failed";
/// Sent to a session superseded by a newer login.
pub const ERROR_SUPERSEDED: &str = "Signed in from another connection";
/// Sent after a successful registration-on-connect.
pub const SUCCESS_REGISTERED: &str = "User registered successfully!";

/// First frame on a new connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Display name, used only when the handshake registers a new identity
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "deviceID")]
    pub device_id: Option<String>,
}

impl Handshake {
    /// Decode a handshake frame.
    pub fn parse(frame: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Password supplied with the handshake, empty if absent.
    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }

    /// Build the registration profile for this handshake.
    pub fn to_profile(&self) -> Profile {
        Profile {
            name: self.name.clone(),
            username: self.username.clone(),
            password: self.password().to_string(),
            device_id: self.device_id.clone(),
        }
    }
}

/// A direct message between two usernames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, alias = "sender_username")]
    pub sender_username: String,
    #[serde(alias = "receiver_username")]
    pub receiver_username: String,
    /// Missing content decodes as empty
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: String,
}

impl ChatMessage {
    /// Create a message stamped with the current server time.
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender_username: sender.into(),
            receiver_username: receiver.into(),
            content: content.into(),
            timestamp: server_timestamp(),
        }
    }

    /// Decode a chat frame received from a client.
    pub fn parse(frame: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Rewrite a client-supplied message as received from `sender`.
    ///
    /// The sender is always the authenticated username. A missing or
    /// empty timestamp is replaced by the server time.
    pub fn stamped(mut self, sender: &str) -> Self {
        self.sender_username = sender.to_string();
        if self.timestamp.trim().is_empty() {
            self.timestamp = server_timestamp();
        }
        self
    }

    /// Encode as a JSON text frame.
    pub fn to_frame(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server-to-client status or error notification.
///
/// Serializes as a single-key object, e.g. `{"error":"User not found"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Notice {
    Error(String),
    Status(String),
    Success(String),
}

impl Notice {
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error(msg.into())
    }

    pub fn status(msg: impl Into<String>) -> Self {
        Self::Status(msg.into())
    }

    pub fn success(msg: impl Into<String>) -> Self {
        Self::Success(msg.into())
    }

    /// The delivery acknowledgment.
    pub fn message_sent() -> Self {
        Self::status(STATUS_MESSAGE_SENT)
    }

    /// Encode as a JSON text frame.
    pub fn to_frame(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Anything the server writes to a client.
///
/// Used by clients to decode frames without knowing their kind up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Chat(ChatMessage),
    Notice(Notice),
}

impl ServerFrame {
    /// Decode a server frame.
    pub fn parse(frame: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// RFC 3339 UTC timestamp with millisecond precision.
pub fn server_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
