//! Common types for the routing core.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier issued by the identity store for a username.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub i64);

impl IdentityId {
    /// Get the raw numeric value.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for IdentityId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A registered identity. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub username: String,
}

/// Registration input for a new identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Unique username (routing key)
    pub username: String,
    /// Plaintext password; hashed by the identity store
    pub password: String,
    /// Client-reported device identifier
    #[serde(default, rename = "deviceID")]
    pub device_id: Option<String>,
}

/// Identifier of one live connection.
///
/// Two sessions registered under the same username in sequence have
/// different session IDs, which lets cleanup remove only its own entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Router state in the session lifecycle, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Waiting for the handshake frame
    Connecting,
    /// Verifying or registering the identity
    Authenticating,
    /// Registered and routing messages
    Active,
    /// Terminal
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Connecting => write!(f, "connecting"),
            SessionPhase::Authenticating => write!(f, "authenticating"),
            SessionPhase::Active => write!(f, "active"),
            SessionPhase::Closed => write!(f, "closed"),
        }
    }
}
