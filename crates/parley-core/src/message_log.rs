//! Message log interface consumed by the router.
//!
//! Appends are fire-and-forget from the router's point of view: a failure
//! is logged and counted, and never blocks live delivery.

use std::future::Future;

use thiserror::Error;

use crate::types::IdentityId;

/// Message log errors.
#[derive(Debug, Error)]
pub enum MessageLogError {
    /// The underlying store rejected or failed the write
    #[error("Message log storage error: {0}")]
    Storage(String),
}

/// Durable append-only record of sent messages.
pub trait MessageLog: Send + Sync + 'static {
    /// Append one message.
    fn append(
        &self,
        sender: IdentityId,
        receiver: IdentityId,
        content: &str,
    ) -> impl Future<Output = Result<(), MessageLogError>> + Send;
}
