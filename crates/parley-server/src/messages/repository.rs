//! Message repository for Parley Server

use std::future::Future;
use std::sync::Arc;

use parley_core::{IdentityId, MessageLog, MessageLogError};
use tracing::{debug, instrument};

use super::{StoredMessage, MAX_HISTORY_LIMIT};
use crate::db::Database;

/// Repository over the `messages` table.
#[derive(Clone)]
pub struct MessageRepository {
    db: Arc<Database>,
}

impl MessageRepository {
    /// Create a new message repository
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append one message.
    #[instrument(skip(self, content), fields(sender = %sender, receiver = %receiver))]
    pub async fn insert(
        &self,
        sender: IdentityId,
        receiver: IdentityId,
        content: &str,
    ) -> Result<i64, MessageLogError> {
        let conn = self.db.connection().await.map_err(storage_err)?;
        conn.as_ref()
            .execute(
                "INSERT INTO messages (sender_id, receiver_id, content) VALUES (?, ?, ?)",
                libsql::params![sender.get(), receiver.get(), content],
            )
            .await
            .map_err(|e| MessageLogError::Storage(format!("Failed to insert message: {}", e)))?;

        let id = conn.as_ref().last_insert_rowid();
        debug!(message_id = id, "Message logged");
        Ok(id)
    }

    /// Messages exchanged between two users in either direction, newest
    /// first. `limit` is capped at [`MAX_HISTORY_LIMIT`].
    #[instrument(skip(self))]
    pub async fn conversation(
        &self,
        a: IdentityId,
        b: IdentityId,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, MessageLogError> {
        let limit = limit.min(MAX_HISTORY_LIMIT) as i64;
        let conn = self.db.connection().await.map_err(storage_err)?;

        let mut rows = conn
            .as_ref()
            .query(
                r#"
                SELECT m.id, s.username, r.username, m.content, m.created_at
                FROM messages m
                JOIN users s ON s.id = m.sender_id
                JOIN users r ON r.id = m.receiver_id
                WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
                   OR (m.sender_id = ?2 AND m.receiver_id = ?1)
                ORDER BY m.created_at DESC, m.id DESC
                LIMIT ?3
                "#,
                libsql::params![a.get(), b.get(), limit],
            )
            .await
            .map_err(|e| MessageLogError::Storage(format!("Failed to query messages: {}", e)))?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            messages.push(StoredMessage {
                id: row.get(0).map_err(storage_err)?,
                sender_username: row.get(1).map_err(storage_err)?,
                receiver_username: row.get(2).map_err(storage_err)?,
                content: row.get(3).map_err(storage_err)?,
                created_at: row.get(4).map_err(storage_err)?,
            });
        }

        Ok(messages)
    }
}

impl MessageLog for MessageRepository {
    fn append(
        &self,
        sender: IdentityId,
        receiver: IdentityId,
        content: &str,
    ) -> impl Future<Output = Result<(), MessageLogError>> + Send {
        async move {
            self.insert(sender, receiver, content).await?;
            Ok(())
        }
    }
}

fn storage_err<E: std::fmt::Display>(e: E) -> MessageLogError {
    MessageLogError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NativeUserStore;
    use crate::db::MigrationRunner;
    use parley_core::{IdentityStore, Profile};

    async fn setup() -> (MessageRepository, IdentityId, IdentityId, IdentityId) {
        let db = Database::in_memory("test-messages").await.unwrap();
        MigrationRunner::parley().run(&db).await.unwrap();
        let db = Arc::new(db);

        let users = NativeUserStore::new(Arc::clone(&db));
        let mut ids = Vec::new();
        for name in ["alice", "bob", "carol"] {
            let profile = Profile {
                username: name.to_string(),
                password: "pw".to_string(),
                ..Profile::default()
            };
            ids.push(users.register(&profile).await.unwrap());
        }

        (MessageRepository::new(db), ids[0], ids[1], ids[2])
    }

    #[tokio::test]
    async fn test_append_and_conversation() {
        let (repo, alice, bob, carol) = setup().await;

        repo.append(alice, bob, "hi bob").await.unwrap();
        repo.append(bob, alice, "hi alice").await.unwrap();
        repo.append(alice, carol, "hi carol").await.unwrap();

        let history = repo.conversation(alice, bob, 50).await.unwrap();
        assert_eq!(history.len(), 2);

        // Newest first
        assert_eq!(history[0].content, "hi alice");
        assert_eq!(history[0].sender_username, "bob");
        assert_eq!(history[0].receiver_username, "alice");
        assert_eq!(history[1].content, "hi bob");
        assert!(history[0].id > history[1].id);

        // Symmetric
        assert_eq!(repo.conversation(bob, alice, 50).await.unwrap(), history);
    }

    #[tokio::test]
    async fn test_conversation_limit() {
        let (repo, alice, bob, _) = setup().await;
        for i in 0..5 {
            repo.append(alice, bob, &format!("msg {}", i)).await.unwrap();
        }

        let history = repo.conversation(alice, bob, 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "msg 4");
        assert_eq!(history[1].content, "msg 3");
    }

    #[tokio::test]
    async fn test_self_conversation_and_empty_content() {
        let (repo, alice, _, _) = setup().await;
        repo.append(alice, alice, "").await.unwrap();

        let history = repo.conversation(alice, alice, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "");
    }

    #[tokio::test]
    async fn test_append_fails_without_schema() {
        let db = Database::in_memory("test-no-schema").await.unwrap();
        let repo = MessageRepository::new(Arc::new(db));

        let result = repo.append(IdentityId(1), IdentityId(2), "lost").await;
        assert!(matches!(result, Err(MessageLogError::Storage(_))));
    }
}
