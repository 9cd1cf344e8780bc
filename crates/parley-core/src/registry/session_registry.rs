//! Session Registry implementation.
//!
//! Tracks active sessions by username for message routing.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, instrument, warn};

use crate::protocol::{ChatMessage, Notice};
use crate::types::SessionId;

/// Item sent through a session's outbound channel.
///
/// The transport adapter drains the channel and writes each item to
/// the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A message forwarded from another session
    Chat(ChatMessage),
    /// A status or error notification for this session
    Notice(Notice),
    /// Final notice; the adapter closes the connection after writing it
    Close(Notice),
}

/// Registry entry for one live session.
///
/// Cloning shares the underlying sender and eviction signal; the
/// connection itself stays owned by its transport adapter.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    sender: mpsc::Sender<Outbound>,
    evict: Arc<Notify>,
}

impl SessionHandle {
    /// Create a handle for a fresh session.
    pub fn new(sender: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: SessionId::new(),
            sender,
            evict: Arc::new(Notify::new()),
        }
    }

    /// The session this handle belongs to.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Queue an item without waiting.
    ///
    /// A full or closed channel is reported, never awaited, so a slow
    /// recipient cannot stall the caller.
    pub fn try_deliver(&self, outbound: Outbound) -> SendResult {
        match self.sender.try_send(outbound) {
            Ok(()) => SendResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendResult::ChannelFull,
            Err(mpsc::error::TrySendError::Closed(_)) => SendResult::ChannelClosed,
        }
    }

    /// Queue an item, waiting for buffer space.
    pub async fn deliver(&self, outbound: Outbound) -> Result<(), mpsc::error::SendError<Outbound>> {
        self.sender.send(outbound).await
    }

    /// Ask the owning session to close.
    ///
    /// Signalled out of band, so it is never lost to a full outbound queue.
    /// A signal sent before the session starts waiting is kept.
    pub fn evict(&self) {
        self.evict.notify_one();
    }

    /// Resolves once [`SessionHandle::evict`] has been called on any clone.
    pub async fn evicted(&self) {
        self.evict.notified().await;
    }
}

/// Result of attempting to send to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Queued for delivery
    Sent,
    /// No session registered under the username
    NotConnected,
    /// The recipient's channel is full (backpressure)
    ChannelFull,
    /// The recipient's channel is closed
    ChannelClosed,
}

impl SendResult {
    /// Label used for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            SendResult::Sent => "delivered",
            SendResult::NotConnected => "offline",
            SendResult::ChannelFull => "backpressure",
            SendResult::ChannelClosed => "disconnected",
        }
    }
}

/// Registry of sessions that are currently online.
///
/// Maps usernames to session handles. Each operation is atomic with
/// respect to every other operation; DashMap shards the locking so
/// writes to different usernames never interfere.
///
/// ## Usage
///
/// ```ignore
/// let registry = SessionRegistry::new();
///
/// // When a session authenticates:
/// let (tx, rx) = mpsc::channel(256);
/// let handle = SessionHandle::new(tx);
/// registry.put("alice", handle.clone());
///
/// // When routing a message:
/// let result = registry.send_to("alice", Outbound::Chat(msg));
///
/// // When the session closes:
/// registry.remove_session("alice", handle.id());
/// ```
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        info!("Creating session registry");
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Insert or replace the session for a username.
    ///
    /// Last writer wins. The superseded handle, if any, is returned so the
    /// caller can decide whether to close that connection.
    #[instrument(skip(self, handle), fields(username = %username, session = %handle.id()))]
    pub fn put(&self, username: &str, handle: SessionHandle) -> Option<SessionHandle> {
        let existing = self.sessions.insert(username.to_string(), handle);
        if existing.is_some() {
            debug!("Replaced existing session registration");
        } else {
            debug!("Registered new session");
        }
        existing
    }

    /// Look up the session for a username.
    pub fn get(&self, username: &str) -> Option<SessionHandle> {
        self.sessions.get(username).map(|entry| entry.value().clone())
    }

    /// Remove the entry for a username. No-op if absent.
    #[instrument(skip(self), fields(username = %username))]
    pub fn remove(&self, username: &str) -> Option<SessionHandle> {
        let removed = self.sessions.remove(username);
        if removed.is_some() {
            debug!("Unregistered session");
        } else {
            debug!("Session was not registered");
        }
        removed.map(|(_, handle)| handle)
    }

    /// Remove the entry for a username only if it belongs to `session`.
    ///
    /// Returns true if an entry was removed. A session that was superseded
    /// by a newer login leaves the newer entry untouched.
    #[instrument(skip(self), fields(username = %username, session = %session))]
    pub fn remove_session(&self, username: &str, session: SessionId) -> bool {
        let removed = self
            .sessions
            .remove_if(username, |_, handle| handle.id() == session)
            .is_some();
        if removed {
            debug!("Unregistered session");
        } else {
            debug!("Session not registered or already superseded");
        }
        removed
    }

    /// Check if a username currently has a session.
    pub fn is_online(&self, username: &str) -> bool {
        self.sessions.contains_key(username)
    }

    /// Get the number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Queue an item for the session registered under `username`.
    ///
    /// Never blocks. Stale entries are left in place; they are removed when
    /// their own router observes the disconnect.
    #[instrument(skip(self, outbound), fields(to = %username))]
    pub fn send_to(&self, username: &str, outbound: Outbound) -> SendResult {
        let handle = match self.get(username) {
            Some(handle) => handle,
            None => {
                debug!("Recipient not connected");
                return SendResult::NotConnected;
            }
        };

        let result = handle.try_deliver(outbound);
        match result {
            SendResult::Sent => debug!("Queued for delivery"),
            SendResult::ChannelFull => warn!("Outbound channel full, dropping forward"),
            SendResult::ChannelClosed => {
                debug!("Outbound channel closed, connection may have dropped")
            }
            SendResult::NotConnected => {}
        }
        result
    }

    /// List all online usernames.
    pub fn online_usernames(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("session_count", &self.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(to: &str, content: &str) -> Outbound {
        Outbound::Chat(ChatMessage::new("sender", to, content))
    }

    #[tokio::test]
    async fn test_evict_reaches_full_session() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = SessionHandle::new(tx);
        assert_eq!(handle.try_deliver(chat("alice", "fills")), SendResult::Sent);
        assert_eq!(handle.try_deliver(chat("alice", "dropped")), SendResult::ChannelFull);

        // Signalled through a clone before anyone waits
        handle.clone().evict();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle.evicted())
            .await
            .expect("eviction signal was lost");
    }

    #[test]
    fn test_registry_creation() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_put_and_get() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(16);
        let handle = SessionHandle::new(tx);
        let id = handle.id();

        assert!(registry.put("alice", handle).is_none());

        assert!(registry.is_online("alice"));
        assert_eq!(registry.get("alice").map(|h| h.id()), Some(id));
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_get_is_case_sensitive() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(16);
        registry.put("alice", SessionHandle::new(tx));

        assert!(registry.get("Alice").is_none());
        assert!(registry.get("alice ").is_none());
    }

    #[test]
    fn test_put_replaces_existing() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = mpsc::channel(16);
        let (tx2, _rx2) = mpsc::channel(16);
        let first = SessionHandle::new(tx1);
        let second = SessionHandle::new(tx2);
        let (first_id, second_id) = (first.id(), second.id());

        registry.put("alice", first);
        let superseded = registry.put("alice", second);

        assert_eq!(superseded.map(|h| h.id()), Some(first_id));
        assert_eq!(registry.get("alice").map(|h| h.id()), Some(second_id));
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(16);
        let (tx_other, _rx_other) = mpsc::channel(16);
        registry.put("alice", SessionHandle::new(tx));
        registry.put("bob", SessionHandle::new(tx_other));

        assert!(registry.remove("alice").is_some());
        assert!(registry.remove("alice").is_none());
        assert!(registry.remove("nobody").is_none());

        assert!(!registry.is_online("alice"));
        assert!(registry.is_online("bob"));
    }

    #[test]
    fn test_remove_session_only_removes_own_entry() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = mpsc::channel(16);
        let (tx2, _rx2) = mpsc::channel(16);
        let old = SessionHandle::new(tx1);
        let new = SessionHandle::new(tx2);
        let (old_id, new_id) = (old.id(), new.id());

        registry.put("alice", old);
        registry.put("alice", new);

        // The superseded session disconnecting must not evict its successor
        assert!(!registry.remove_session("alice", old_id));
        assert!(registry.is_online("alice"));

        assert!(registry.remove_session("alice", new_id));
        assert!(!registry.remove_session("alice", new_id));
        assert!(!registry.is_online("alice"));
    }

    #[tokio::test]
    async fn test_send_to_connected_user() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::channel(16);
        registry.put("bob", SessionHandle::new(tx));

        let result = registry.send_to("bob", chat("bob", "hi"));
        assert_eq!(result, SendResult::Sent);

        match rx.recv().await {
            Some(Outbound::Chat(msg)) => assert_eq!(msg.content, "hi"),
            other => panic!("unexpected outbound: {:?}", other),
        }
    }

    #[test]
    fn test_send_to_disconnected_user() {
        let registry = SessionRegistry::new();
        let result = registry.send_to("bob", chat("bob", "hi"));
        assert_eq!(result, SendResult::NotConnected);
    }

    #[test]
    fn test_send_to_closed_channel_keeps_entry() {
        let registry = SessionRegistry::new();
        let (tx, rx) = mpsc::channel(16);
        registry.put("bob", SessionHandle::new(tx));

        drop(rx);

        let result = registry.send_to("bob", chat("bob", "hi"));
        assert_eq!(result, SendResult::ChannelClosed);

        // Eviction is left to bob's own router
        assert!(registry.is_online("bob"));
    }

    #[test]
    fn test_send_to_full_channel() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        registry.put("bob", SessionHandle::new(tx));

        assert_eq!(registry.send_to("bob", chat("bob", "one")), SendResult::Sent);
        assert_eq!(
            registry.send_to("bob", chat("bob", "two")),
            SendResult::ChannelFull
        );
    }

    #[test]
    fn test_online_usernames() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = mpsc::channel(16);
        let (tx2, _rx2) = mpsc::channel(16);
        registry.put("alice", SessionHandle::new(tx1));
        registry.put("bob", SessionHandle::new(tx2));

        let mut online = registry.online_usernames();
        online.sort();
        assert_eq!(online, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn test_send_result_labels() {
        assert_eq!(SendResult::Sent.as_str(), "delivered");
        assert_eq!(SendResult::NotConnected.as_str(), "offline");
        assert_eq!(SendResult::ChannelFull.as_str(), "backpressure");
        assert_eq!(SendResult::ChannelClosed.as_str(), "disconnected");
    }
}
