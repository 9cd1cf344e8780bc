//! Test utilities for routing tests.
//!
//! Provides in-memory identity and message log stores plus a client
//! harness that drives a [`Router`] through channels instead of a socket.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use futures::channel::mpsc::{unbounded, UnboundedSender};
use parley_core::{
    IdentityError, IdentityId, IdentityStore, MessageLog, MessageLogError, Notice, Outbound,
    Profile, RelayError, Router, RouterConfig, SessionRegistry,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize tracing once for the test binary.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("parley_core=debug")
            .with_test_writer()
            .try_init();
    });
}

/// Identity store backed by a HashMap.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    users: Mutex<HashMap<String, (IdentityId, String)>>,
    fail_lookups: AtomicBool,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register a user and return its ID.
    pub fn with_user(&self, username: &str, password: &str) -> IdentityId {
        let mut users = self.users.lock().unwrap();
        let id = IdentityId(users.len() as i64 + 1);
        users.insert(username.to_string(), (id, password.to_string()));
        id
    }

    /// Make every `resolve` fail with a backend error.
    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.lock().unwrap().contains_key(username)
    }

    pub fn id_of(&self, username: &str) -> Option<IdentityId> {
        self.users.lock().unwrap().get(username).map(|(id, _)| *id)
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<IdentityId, IdentityError>> + Send {
        let result = match self.users.lock().unwrap().get(username) {
            Some((id, stored)) if stored == password => Ok(*id),
            _ => Err(IdentityError::AuthenticationFailed),
        };
        async move { result }
    }

    fn register(
        &self,
        profile: &Profile,
    ) -> impl Future<Output = Result<IdentityId, IdentityError>> + Send {
        let result = if profile.username.is_empty() {
            Err(IdentityError::InvalidUsername("empty".to_string()))
        } else {
            let mut users = self.users.lock().unwrap();
            if users.contains_key(&profile.username) {
                Err(IdentityError::DuplicateUsername(profile.username.clone()))
            } else {
                let id = IdentityId(users.len() as i64 + 1);
                users.insert(profile.username.clone(), (id, profile.password.clone()));
                Ok(id)
            }
        };
        async move { result }
    }

    fn resolve(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<IdentityId, IdentityError>> + Send {
        let result = if self.fail_lookups.load(Ordering::SeqCst) {
            Err(IdentityError::backend("lookup unavailable"))
        } else {
            match self.users.lock().unwrap().get(username) {
                Some((id, _)) => Ok(*id),
                None => Err(IdentityError::NotFound(username.to_string())),
            }
        };
        async move { result }
    }
}

/// One appended log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedMessage {
    pub sender: IdentityId,
    pub receiver: IdentityId,
    pub content: String,
}

/// Message log that records appends in memory.
#[derive(Default)]
pub struct InMemoryMessageLog {
    entries: Mutex<Vec<LoggedMessage>>,
    failing: AtomicBool,
}

impl InMemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every append fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<LoggedMessage> {
        self.entries.lock().unwrap().clone()
    }
}

impl MessageLog for InMemoryMessageLog {
    fn append(
        &self,
        sender: IdentityId,
        receiver: IdentityId,
        content: &str,
    ) -> impl Future<Output = Result<(), MessageLogError>> + Send {
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(MessageLogError::Storage("disk full".to_string()))
        } else {
            self.entries.lock().unwrap().push(LoggedMessage {
                sender,
                receiver,
                content: content.to_string(),
            });
            Ok(())
        };
        async move { result }
    }
}

pub type TestRouter = Router<InMemoryIdentityStore, InMemoryMessageLog>;

/// Router plus handles to its stores.
pub struct Harness {
    pub router: TestRouter,
    pub registry: Arc<SessionRegistry>,
    pub identities: Arc<InMemoryIdentityStore>,
    pub log: Arc<InMemoryMessageLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    pub fn with_config(config: RouterConfig) -> Self {
        init_tracing();
        let registry = Arc::new(SessionRegistry::new());
        let identities = Arc::new(InMemoryIdentityStore::new());
        let log = Arc::new(InMemoryMessageLog::new());
        let router = Router::new(
            Arc::clone(&registry),
            Arc::clone(&identities),
            Arc::clone(&log),
            config,
        );
        Self {
            router,
            registry,
            identities,
            log,
        }
    }

    /// Open a new connection served by the router.
    pub fn connect(&self) -> TestClient {
        let (inbound_tx, inbound_rx) = unbounded();
        let (outbound_tx, outbound_rx) = self.router.outbound_channel();
        let router = self.router.clone();
        let task = tokio::spawn(async move { router.serve(inbound_rx, outbound_tx).await });
        TestClient {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
            task,
        }
    }

    /// Connect and complete the handshake for an existing user.
    pub async fn login(&self, username: &str, password: &str) -> TestClient {
        let client = self.connect();
        client.send_json(serde_json::json!({ "username": username, "password": password }));
        self.wait_online(username).await;
        client
    }

    /// Wait until `username` appears in the registry.
    pub async fn wait_online(&self, username: &str) {
        let registry = Arc::clone(&self.registry);
        wait_until(move || registry.is_online(username)).await;
    }

    /// Wait until `username` leaves the registry.
    pub async fn wait_offline(&self, username: &str) {
        let registry = Arc::clone(&self.registry);
        wait_until(move || !registry.is_online(username)).await;
    }
}

/// Poll a condition until it holds or the default timeout elapses.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let result = timeout(DEFAULT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not met within timeout");
}

/// Client side of a router-driven connection.
pub struct TestClient {
    inbound: Option<UnboundedSender<Result<String, RelayError>>>,
    outbound: mpsc::Receiver<Outbound>,
    task: JoinHandle<()>,
}

impl TestClient {
    /// Send a raw text frame.
    pub fn send_raw(&self, frame: &str) {
        if let Some(inbound) = &self.inbound {
            inbound
                .unbounded_send(Ok(frame.to_string()))
                .expect("router stopped reading");
        }
    }

    pub fn send_json(&self, value: serde_json::Value) {
        self.send_raw(&value.to_string());
    }

    /// Send a chat message.
    pub fn chat(&self, to: &str, content: &str) {
        self.send_json(serde_json::json!({
            "senderUsername": "",
            "receiverUsername": to,
            "content": content,
        }));
    }

    /// Report a transport error to the router.
    pub fn fail_transport(&self) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.unbounded_send(Err(RelayError::transport("reset by peer")));
        }
    }

    /// Close the inbound side, as if the peer hung up.
    pub fn hang_up(&mut self) {
        self.inbound.take();
    }

    /// Next outbound item.
    pub async fn recv(&mut self) -> Option<Outbound> {
        timeout(DEFAULT_TIMEOUT, self.outbound.recv())
            .await
            .expect("timed out waiting for outbound")
    }

    /// Outbound item already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }

    /// Next outbound item, which must be a notice.
    pub async fn recv_notice(&mut self) -> Notice {
        match self.recv().await {
            Some(Outbound::Notice(notice)) => notice,
            other => panic!("expected notice, got {:?}", other),
        }
    }

    /// Assert nothing is queued right now.
    pub async fn assert_idle(&mut self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        match self.outbound.try_recv() {
            Err(mpsc::error::TryRecvError::Empty) => {}
            other => panic!("expected no outbound, got {:?}", other),
        }
    }

    /// Wait for the router task to finish.
    pub async fn closed(self) {
        timeout(DEFAULT_TIMEOUT, self.task)
            .await
            .expect("router did not close")
            .expect("router task panicked");
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
