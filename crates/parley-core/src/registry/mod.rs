//! Session Registry for real-time message routing.
//!
//! This module provides a thread-safe registry that tracks which usernames
//! currently have a live session, enabling direct delivery between sessions.
//!
//! ## Architecture
//!
//! Each router registers its session's outbound channel once the session
//! authenticates. Other routers look the recipient up by username and hand
//! the message to that channel without waiting.
//!
//! ```text
//! Router (alice) <-> SessionRegistry <-> Router (bob)
//!       |                  |                  |
//!       v                  v                  v
//!  mpsc::Sender      DashMap<String,     mpsc::Sender
//!                     SessionHandle>
//! ```

mod session_registry;

pub use session_registry::{Outbound, SendResult, SessionHandle, SessionRegistry};
