//! Native username/password identities.
//!
//! ## Security Model
//!
//! - Passwords are hashed using Argon2id (memory-hard, recommended by OWASP)
//! - Plaintext passwords are never stored
//! - Each user has a unique random salt
//! - Unknown usernames and wrong passwords fail identically

use std::future::Future;
use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use parley_core::{IdentityError, IdentityId, IdentityStore, Profile};
use tracing::{debug, instrument};

use crate::db::{ConnectionGuard, Database};

/// Longest accepted username, in bytes.
pub const MAX_USERNAME_LEN: usize = 64;

/// Identity store backed by the `users` table.
#[derive(Clone)]
pub struct NativeUserStore {
    db: Arc<Database>,
}

impl NativeUserStore {
    /// Create a new native user store.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn connection(&self) -> Result<ConnectionGuard<'_>, IdentityError> {
        self.db.connection().await.map_err(db_err)
    }

    /// Register a new user and return its ID.
    #[instrument(skip(self, profile), fields(username = %profile.username))]
    pub async fn register_user(&self, profile: &Profile) -> Result<IdentityId, IdentityError> {
        validate_username(&profile.username)?;

        if self.lookup_id(&profile.username).await?.is_some() {
            return Err(IdentityError::DuplicateUsername(profile.username.clone()));
        }

        let password_hash = hash_password(&profile.password)?;

        let conn = self.connection().await?;
        conn.as_ref()
            .execute(
                r#"
                INSERT INTO users (name, username, password_hash, device_id)
                VALUES (?, ?, ?, ?)
                "#,
                (
                    profile.name.as_deref(),
                    profile.username.as_str(),
                    password_hash.as_str(),
                    profile.device_id.as_deref(),
                ),
            )
            .await
            .map_err(|e| {
                // Lost a race with a concurrent registration
                if e.to_string().contains("UNIQUE") {
                    IdentityError::DuplicateUsername(profile.username.clone())
                } else {
                    db_err(e)
                }
            })?;

        let user_id = conn.as_ref().last_insert_rowid();
        debug!(user_id = user_id, "User registered");

        Ok(IdentityId(user_id))
    }

    /// Verify a password with Argon2id.
    #[instrument(skip(self, password))]
    pub async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<IdentityId, IdentityError> {
        let record = {
            let conn = self.connection().await?;
            let mut rows = conn
                .as_ref()
                .query(
                    "SELECT id, password_hash FROM users WHERE username = ?",
                    [username],
                )
                .await
                .map_err(db_err)?;

            match rows.next().await.map_err(db_err)? {
                Some(row) => {
                    let id: i64 = row.get(0).map_err(db_err)?;
                    let hash: String = row.get(1).map_err(db_err)?;
                    Some((id, hash))
                }
                None => None,
            }
        };

        let (id, hash) = record.ok_or(IdentityError::AuthenticationFailed)?;
        let parsed_hash = PasswordHash::new(&hash)
            .map_err(|e| IdentityError::backend(format!("Invalid password hash: {}", e)))?;

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| IdentityError::AuthenticationFailed)?;

        Ok(IdentityId(id))
    }

    /// Resolve a username to its ID.
    pub async fn resolve_username(&self, username: &str) -> Result<IdentityId, IdentityError> {
        self.lookup_id(username)
            .await?
            .ok_or_else(|| IdentityError::NotFound(username.to_string()))
    }

    async fn lookup_id(&self, username: &str) -> Result<Option<IdentityId>, IdentityError> {
        let conn = self.connection().await?;
        let mut rows = conn
            .as_ref()
            .query("SELECT id FROM users WHERE username = ?", [username])
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(IdentityId(row.get(0).map_err(db_err)?))),
            None => Ok(None),
        }
    }
}

impl IdentityStore for NativeUserStore {
    fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<IdentityId, IdentityError>> + Send {
        self.verify_password(username, password)
    }

    fn register(
        &self,
        profile: &Profile,
    ) -> impl Future<Output = Result<IdentityId, IdentityError>> + Send {
        self.register_user(profile)
    }

    fn resolve(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<IdentityId, IdentityError>> + Send {
        self.resolve_username(username)
    }
}

fn hash_password(password: &str) -> Result<String, IdentityError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| IdentityError::backend(format!("Failed to hash password: {}", e)))
}

fn db_err<E: std::fmt::Display>(e: E) -> IdentityError {
    IdentityError::Backend(e.to_string())
}

/// Validate a username.
///
/// The username must:
/// - Not be empty
/// - Not exceed [`MAX_USERNAME_LEN`] bytes in UTF-8
/// - Not contain whitespace or control characters
pub fn validate_username(username: &str) -> Result<(), IdentityError> {
    if username.is_empty() {
        return Err(IdentityError::InvalidUsername(
            "Username cannot be empty".to_string(),
        ));
    }

    if username.len() > MAX_USERNAME_LEN {
        return Err(IdentityError::InvalidUsername("Username too long".to_string()));
    }

    if username.chars().any(char::is_whitespace) {
        return Err(IdentityError::InvalidUsername(
            "Username contains whitespace".to_string(),
        ));
    }

    if username.chars().any(char::is_control) {
        return Err(IdentityError::InvalidUsername(
            "Username contains control characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MigrationRunner;

    async fn create_test_store() -> NativeUserStore {
        let db = Database::in_memory("test-native-users")
            .await
            .expect("Failed to create test database");
        MigrationRunner::parley()
            .run(&db)
            .await
            .expect("Failed to run migrations");
        NativeUserStore::new(Arc::new(db))
    }

    fn profile(username: &str, password: &str) -> Profile {
        Profile {
            name: Some(username.to_uppercase()),
            username: username.to_string(),
            password: password.to_string(),
            device_id: Some("device-1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let store = create_test_store().await;

        let id = store.register(&profile("alice", "secret123")).await.unwrap();
        assert!(id.get() > 0);

        assert_eq!(store.resolve("alice").await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_duplicate_user() {
        let store = create_test_store().await;

        store.register(&profile("bob", "secret123")).await.unwrap();
        let result = store.register(&profile("bob", "other")).await;
        assert!(matches!(result, Err(IdentityError::DuplicateUsername(u)) if u == "bob"));
    }

    #[tokio::test]
    async fn test_verify_password() {
        let store = create_test_store().await;
        let id = store
            .register(&profile("dave", "correctpassword"))
            .await
            .unwrap();

        assert_eq!(store.verify("dave", "correctpassword").await.unwrap(), id);
        assert!(matches!(
            store.verify("dave", "wrongpassword").await,
            Err(IdentityError::AuthenticationFailed)
        ));
        assert!(matches!(
            store.verify("nonexistent", "anypassword").await,
            Err(IdentityError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_empty_password_round_trip() {
        let store = create_test_store().await;
        store.register(&profile("erin", "")).await.unwrap();

        assert!(store.verify("erin", "").await.is_ok());
        assert!(store.verify("erin", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_password_is_not_stored_in_plaintext() {
        let store = create_test_store().await;
        store.register(&profile("frank", "hunter2")).await.unwrap();

        let conn = store.db.connection().await.unwrap();
        let mut rows = conn
            .as_ref()
            .query("SELECT password_hash FROM users WHERE username = 'frank'", ())
            .await
            .unwrap();
        let hash: String = rows.next().await.unwrap().unwrap().get(0).unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_resolve_unknown_user() {
        let store = create_test_store().await;
        assert!(matches!(
            store.resolve("ghost").await,
            Err(IdentityError::NotFound(u)) if u == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_username() {
        let store = create_test_store().await;
        assert!(matches!(
            store.register(&profile("", "pw")).await,
            Err(IdentityError::InvalidUsername(_))
        ));
        assert!(matches!(
            store.register(&profile("two words", "pw")).await,
            Err(IdentityError::InvalidUsername(_))
        ));
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("alice.smith-99").is_ok());
        assert!(validate_username(&"a".repeat(MAX_USERNAME_LEN)).is_ok());

        assert!(validate_username("").is_err());
        assert!(validate_username(&"a".repeat(MAX_USERNAME_LEN + 1)).is_err());
        assert!(validate_username("tab\there").is_err());
        assert!(validate_username("bell\u{7}").is_err());
    }
}
