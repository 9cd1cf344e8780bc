//! # parley-core
//!
//! Session registry and message routing for the Parley direct-message relay.
//!
//! This crate is transport-agnostic: it consumes a stream of text frames
//! per connection and produces [`registry::Outbound`] items on a channel.
//! `parley-server` binds it to WebSockets, SQL storage and argon2.
//!
//! ## Architecture
//!
//! - **Session Registry**: concurrent map from username to the outbound
//!   channel of that user's live session
//! - **Router**: one per connection, drives the handshake, authentication
//!   and message routing state machine
//! - **Identity Store / Message Log**: traits implemented by the host
//!
//! Forwarding to another session never waits on that session, so a slow
//! or dead recipient only affects itself.

pub mod identity;
pub mod message_log;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod router;

mod error;
mod types;

pub use error::RelayError;
pub use identity::{IdentityError, IdentityStore};
pub use message_log::{MessageLog, MessageLogError};
pub use protocol::{ChatMessage, Handshake, Notice, ServerFrame};
pub use registry::{Outbound, SendResult, SessionHandle, SessionRegistry};
pub use router::{DuplicateLoginPolicy, Router, RouterConfig};
pub use types::*;
