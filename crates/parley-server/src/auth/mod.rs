//! Authentication module.
//!
//! Native username/password identities with Argon2id hashes. The store
//! implements the routing core's `IdentityStore`, so the same accounts back
//! the HTTP endpoints and the session handshake.

pub mod native;

pub use native::NativeUserStore;
