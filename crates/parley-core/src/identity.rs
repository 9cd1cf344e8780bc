//! Identity store interface consumed by the router.

use std::future::Future;

use thiserror::Error;

use crate::types::{IdentityId, Profile};

/// Identity store errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Username unknown or password mismatch. Deliberately indistinguishable.
    #[error("Invalid username or password")]
    AuthenticationFailed,

    /// Username already taken
    #[error("Username already exists: {0}")]
    DuplicateUsername(String),

    /// Username does not resolve to an identity
    #[error("User not found: {0}")]
    NotFound(String),

    /// Username rejected by validation
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    /// Storage or hashing failure
    #[error("Identity store error: {0}")]
    Backend(String),
}

impl IdentityError {
    /// Create a new backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Credential verification and identity lookup.
///
/// Implementations must be safe to call concurrently from many routers.
/// Username uniqueness is enforced here, not by the router.
pub trait IdentityStore: Send + Sync + 'static {
    /// Verify a username/password pair and return the identity ID.
    fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<IdentityId, IdentityError>> + Send;

    /// Create a new identity.
    ///
    /// # Errors
    /// * `IdentityError::DuplicateUsername` if the username is taken
    /// * `IdentityError::InvalidUsername` if the username fails validation
    fn register(
        &self,
        profile: &Profile,
    ) -> impl Future<Output = Result<IdentityId, IdentityError>> + Send;

    /// Resolve a username to its identity ID.
    fn resolve(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<IdentityId, IdentityError>> + Send;
}
