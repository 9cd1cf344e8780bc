//! Per-connection session router.
//!
//! Each connection is driven by one [`Router::serve`] call through the
//! states `Connecting -> Authenticating -> Active -> Closed`. Routers share
//! nothing except the [`SessionRegistry`] and the outbound channels handed
//! out by it.
//!
//! ## Lifecycle
//!
//! ```text
//! Connecting --handshake--> Authenticating --accepted--> Active --read error/evicted--> Closed
//!     |                           |                        ^  |
//!     +--malformed/closed-------->+--rejected----------> Closed
//!                                                          +--message--+
//! ```
//!
//! While `Active`, the session's registry entry is owned by a
//! [`Registration`] guard. Leaving `Active` for any reason (including the
//! serving future being dropped) drops the guard and removes the entry.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::error::RelayError;
use crate::identity::{IdentityError, IdentityStore};
use crate::message_log::MessageLog;
use crate::metrics;
use crate::protocol::{
    ChatMessage, Handshake, Notice, ERROR_INVALID_CREDENTIALS, ERROR_LOOKUP_FAILED,
    ERROR_REGISTRATION_FAILED, ERROR_SUPERSEDED, ERROR_USER_NOT_FOUND, SUCCESS_REGISTERED,
};
use crate::registry::{Outbound, SendResult, SessionHandle, SessionRegistry};
use crate::types::{Identity, IdentityId, SessionId, SessionPhase};

/// Default capacity of each session's outbound channel.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// What happens to an existing session when the same username logs in again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateLoginPolicy {
    /// Replace the registry entry and close the superseded connection.
    #[default]
    Evict,
    /// Replace the registry entry; the superseded connection stays open
    /// but no longer receives forwarded messages.
    Replace,
}

impl fmt::Display for DuplicateLoginPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateLoginPolicy::Evict => write!(f, "evict"),
            DuplicateLoginPolicy::Replace => write!(f, "replace"),
        }
    }
}

impl FromStr for DuplicateLoginPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "evict" => Ok(DuplicateLoginPolicy::Evict),
            "replace" => Ok(DuplicateLoginPolicy::Replace),
            other => Err(format!(
                "unknown duplicate login policy '{}', expected 'evict' or 'replace'",
                other
            )),
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Capacity of each session's outbound channel (default: 256)
    pub outbound_buffer: usize,
    /// Register unknown usernames from their handshake (default: true)
    pub auto_register: bool,
    /// Duplicate login handling (default: evict)
    pub duplicate_login: DuplicateLoginPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            auto_register: true,
            duplicate_login: DuplicateLoginPolicy::Evict,
        }
    }
}

/// Shared routing service.
///
/// Constructed once at startup and shared by every connection. Cloning is
/// cheap and shares the registry and stores.
pub struct Router<I: IdentityStore, L: MessageLog> {
    registry: Arc<SessionRegistry>,
    identities: Arc<I>,
    message_log: Arc<L>,
    config: RouterConfig,
}

impl<I: IdentityStore, L: MessageLog> Clone for Router<I, L> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            identities: Arc::clone(&self.identities),
            message_log: Arc::clone(&self.message_log),
            config: self.config.clone(),
        }
    }
}

impl<I: IdentityStore, L: MessageLog> Router<I, L> {
    /// Create a new router.
    pub fn new(
        registry: Arc<SessionRegistry>,
        identities: Arc<I>,
        message_log: Arc<L>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            identities,
            message_log,
            config,
        }
    }

    /// The registry shared by all sessions.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// The router configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Create the outbound channel for a new connection.
    ///
    /// The transport adapter keeps the receiver and writes every item to
    /// the connection; the sender is passed to [`Router::serve`].
    pub fn outbound_channel(&self) -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
        mpsc::channel(self.config.outbound_buffer.max(1))
    }

    /// Drive one connection until it closes.
    ///
    /// `inbound` yields text frames from the client. Returns once the
    /// session reaches `Closed`; the registry entry (if any) is gone by then.
    #[instrument(
        name = "parley.session",
        skip_all,
        fields(session = tracing::field::Empty, username = tracing::field::Empty)
    )]
    pub async fn serve<S>(&self, mut inbound: S, outbound: mpsc::Sender<Outbound>)
    where
        S: Stream<Item = Result<String, RelayError>> + Unpin + Send,
    {
        let driver = SessionDriver {
            router: self,
            handle: SessionHandle::new(outbound),
        };
        tracing::Span::current().record("session", driver.handle.id().to_string());
        debug!("Session opened");

        let mut state = SessionState::Connecting;
        loop {
            debug!(phase = %state.phase(), "Session state");
            state = match state {
                SessionState::Connecting => {
                    let frame = next_frame(&mut inbound).await;
                    driver.on_handshake(frame)
                }
                SessionState::Authenticating(handshake) => {
                    let outcome = driver.authenticate(&handshake).await;
                    driver.on_auth_result(handshake, outcome).await
                }
                SessionState::Active(active) => {
                    tokio::select! {
                        biased;
                        _ = driver.handle.evicted() => driver.on_evicted(active).await,
                        frame = next_frame(&mut inbound) => match frame {
                            Ok(frame) => driver.on_message(active, &frame).await,
                            Err(reason) => driver.on_channel_closed(active, reason),
                        },
                    }
                }
                SessionState::Closed => break,
            };
        }

        debug!("Session closed");
    }
}

/// Explicit session state.
enum SessionState {
    Connecting,
    Authenticating(Handshake),
    Active(ActiveSession),
    Closed,
}

impl SessionState {
    fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Connecting => SessionPhase::Connecting,
            SessionState::Authenticating(_) => SessionPhase::Authenticating,
            SessionState::Active(_) => SessionPhase::Active,
            SessionState::Closed => SessionPhase::Closed,
        }
    }
}

/// An authenticated, registered session.
struct ActiveSession {
    identity: Identity,
    _registration: Registration,
}

/// Ownership of a registry entry.
///
/// Dropping it removes the entry if it still belongs to this session.
struct Registration {
    registry: Arc<SessionRegistry>,
    username: String,
    session: SessionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.registry.remove_session(&self.username, self.session) {
            metrics::record_session_count(self.registry.session_count());
        }
    }
}

/// Result of the authentication sub-flow.
#[derive(Debug)]
enum AuthOutcome {
    /// Existing identity, credentials verified
    Authenticated(IdentityId),
    /// New identity created from the handshake
    Registered(IdentityId),
    /// Rejected; the notice is sent before closing
    Rejected(Notice),
}

/// Per-connection state machine driver.
struct SessionDriver<'a, I: IdentityStore, L: MessageLog> {
    router: &'a Router<I, L>,
    handle: SessionHandle,
}

impl<'a, I: IdentityStore, L: MessageLog> SessionDriver<'a, I, L> {
    /// Handshake received (or the connection ended before one arrived).
    fn on_handshake(&self, frame: Result<String, RelayError>) -> SessionState {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(reason = %e, "Connection ended before handshake");
                return SessionState::Closed;
            }
        };

        match Handshake::parse(&frame) {
            Ok(handshake) => {
                debug!(username = %handshake.username, "Handshake received");
                SessionState::Authenticating(handshake)
            }
            Err(e) => {
                warn!(error = %e, "Malformed handshake");
                SessionState::Closed
            }
        }
    }

    /// Verify the handshake credentials, registering a new identity when
    /// the username is unknown and auto-registration is enabled.
    async fn authenticate(&self, handshake: &Handshake) -> AuthOutcome {
        let identities = &self.router.identities;

        if self.router.config.auto_register {
            match identities.resolve(&handshake.username).await {
                Err(IdentityError::NotFound(_)) => {
                    info!(username = %handshake.username, "User not found, registering");
                    return match identities.register(&handshake.to_profile()).await {
                        Ok(id) => {
                            metrics::record_auth_attempt("register", true);
                            AuthOutcome::Registered(id)
                        }
                        Err(e) => {
                            warn!(username = %handshake.username, error = %e, "Registration failed");
                            metrics::record_auth_attempt("register", false);
                            AuthOutcome::Rejected(Notice::error(ERROR_REGISTRATION_FAILED))
                        }
                    };
                }
                Err(e) => {
                    debug!(error = %e, "Identity lookup failed, falling back to verification");
                }
                Ok(_) => {}
            }
        }

        match identities.verify(&handshake.username, handshake.password()).await {
            Ok(id) => {
                metrics::record_auth_attempt("verify", true);
                AuthOutcome::Authenticated(id)
            }
            Err(e) => {
                warn!(username = %handshake.username, error = %e, "Authentication failed");
                metrics::record_auth_attempt("verify", false);
                AuthOutcome::Rejected(Notice::error(ERROR_INVALID_CREDENTIALS))
            }
        }
    }

    /// Authentication finished.
    async fn on_auth_result(&self, handshake: Handshake, outcome: AuthOutcome) -> SessionState {
        let id = match outcome {
            AuthOutcome::Authenticated(id) => id,
            AuthOutcome::Registered(id) => {
                if self.notify(Notice::success(SUCCESS_REGISTERED)).await.is_err() {
                    return SessionState::Closed;
                }
                id
            }
            AuthOutcome::Rejected(notice) => {
                // Best effort; the client may already be gone
                let _ = self.handle.deliver(Outbound::Close(notice)).await;
                return SessionState::Closed;
            }
        };

        let identity = Identity {
            id,
            username: handshake.username,
        };
        SessionState::Active(self.activate(identity))
    }

    /// Register the session and apply the duplicate login policy.
    fn activate(&self, identity: Identity) -> ActiveSession {
        let registry = &self.router.registry;
        let superseded = registry.put(&identity.username, self.handle.clone());
        metrics::record_session_count(registry.session_count());

        if let Some(previous) = superseded {
            match self.router.config.duplicate_login {
                DuplicateLoginPolicy::Evict => {
                    previous.evict();
                    info!(superseded = %previous.id(), "Evicting superseded session");
                }
                DuplicateLoginPolicy::Replace => {
                    info!(superseded = %previous.id(), "Replaced superseded session");
                }
            }
        }

        tracing::Span::current().record("username", identity.username.as_str());
        info!(id = %identity.id, "Session established");

        ActiveSession {
            _registration: Registration {
                registry: Arc::clone(registry),
                username: identity.username.clone(),
                session: self.handle.id(),
            },
            identity,
        }
    }

    /// Inbound frame while active.
    async fn on_message(&self, active: ActiveSession, frame: &str) -> SessionState {
        let message = match ChatMessage::parse(frame) {
            Ok(message) => message.stamped(&active.identity.username),
            Err(e) => {
                warn!(error = %e, "Malformed chat frame, closing session");
                return SessionState::Closed;
            }
        };

        match self.route(&active.identity, message).await {
            Ok(()) => SessionState::Active(active),
            Err(e) => {
                debug!(error = %e, "Session outbound failed");
                SessionState::Closed
            }
        }
    }

    /// Another connection logged in under this username.
    ///
    /// The close notice waits for queue space behind anything already
    /// queued; the registry entry already belongs to the new session.
    async fn on_evicted(&self, active: ActiveSession) -> SessionState {
        info!(username = %active.identity.username, "Session superseded, closing");
        if self
            .handle
            .deliver(Outbound::Close(Notice::error(ERROR_SUPERSEDED)))
            .await
            .is_err()
        {
            debug!("Superseded session's channel already closed");
        }
        SessionState::Closed
    }

    /// The inbound stream ended or failed.
    fn on_channel_closed(&self, active: ActiveSession, reason: RelayError) -> SessionState {
        info!(username = %active.identity.username, reason = %reason, "Session disconnected");
        SessionState::Closed
    }

    /// Resolve, persist, forward, acknowledge.
    #[instrument(
        name = "parley.message.route",
        skip(self, sender, message),
        fields(to = %message.receiver_username, outcome = tracing::field::Empty)
    )]
    async fn route(&self, sender: &Identity, message: ChatMessage) -> Result<(), RelayError> {
        let receiver_id = match self
            .router
            .identities
            .resolve(&message.receiver_username)
            .await
        {
            Ok(id) => id,
            Err(IdentityError::NotFound(_)) => {
                debug!("Recipient not found");
                metrics::record_message_routed("unknown_recipient");
                return self.notify(Notice::error(ERROR_USER_NOT_FOUND)).await;
            }
            Err(e) => {
                warn!(error = %e, "Recipient lookup failed");
                metrics::record_message_routed("lookup_failed");
                return self.notify(Notice::error(ERROR_LOOKUP_FAILED)).await;
            }
        };

        if let Err(e) = self
            .router
            .message_log
            .append(sender.id, receiver_id, &message.content)
            .await
        {
            warn!(error = %e, "Failed to append message to log");
            metrics::record_message_log_failure();
        }

        let receiver = message.receiver_username.clone();
        let result = self.router.registry.send_to(&receiver, Outbound::Chat(message));
        match result {
            SendResult::Sent | SendResult::NotConnected => {}
            SendResult::ChannelFull | SendResult::ChannelClosed => {
                warn!(result = result.as_str(), "Forwarding failed, treating recipient as offline");
            }
        }
        tracing::Span::current().record("outcome", result.as_str());
        metrics::record_message_routed(result.as_str());

        self.notify(Notice::message_sent()).await
    }

    /// Send a notice on this session's own channel.
    async fn notify(&self, notice: Notice) -> Result<(), RelayError> {
        self.handle
            .deliver(Outbound::Notice(notice))
            .await
            .map_err(|_| RelayError::OutboundClosed)
    }
}

/// Read the next frame; end of stream reads as a closed connection.
async fn next_frame<S>(inbound: &mut S) -> Result<String, RelayError>
where
    S: Stream<Item = Result<String, RelayError>> + Unpin,
{
    inbound
        .next()
        .await
        .unwrap_or(Err(RelayError::ConnectionClosed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_login_policy_from_str() {
        assert_eq!(
            "evict".parse::<DuplicateLoginPolicy>(),
            Ok(DuplicateLoginPolicy::Evict)
        );
        assert_eq!(
            " Replace ".parse::<DuplicateLoginPolicy>(),
            Ok(DuplicateLoginPolicy::Replace)
        );
        assert!("coexist".parse::<DuplicateLoginPolicy>().is_err());
    }

    #[test]
    fn test_duplicate_login_policy_display() {
        assert_eq!(DuplicateLoginPolicy::Evict.to_string(), "evict");
        assert_eq!(DuplicateLoginPolicy::Replace.to_string(), "replace");
    }

    #[test]
    fn test_router_config_default() {
        let config = RouterConfig::default();
        assert_eq!(config.outbound_buffer, DEFAULT_OUTBOUND_BUFFER);
        assert!(config.auto_register);
        assert_eq!(config.duplicate_login, DuplicateLoginPolicy::Evict);
    }

    #[tokio::test]
    async fn test_next_frame_end_of_stream() {
        let mut inbound = futures::stream::empty::<Result<String, RelayError>>();
        let result = next_frame(&mut inbound).await;
        assert!(matches!(result, Err(RelayError::ConnectionClosed)));
    }

    #[test]
    fn test_registration_drop_removes_own_entry() {
        let registry = Arc::new(SessionRegistry::new());
        let (tx, _rx) = mpsc::channel(4);
        let handle = SessionHandle::new(tx);
        let session = handle.id();
        registry.put("alice", handle);

        let registration = Registration {
            registry: Arc::clone(&registry),
            username: "alice".to_string(),
            session,
        };
        drop(registration);

        assert!(!registry.is_online("alice"));
    }
}
