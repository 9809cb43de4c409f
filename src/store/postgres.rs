//! Postgres implementation of the store traits.
//!
//! DESIGN
//! ======
//! One `PgStore` wraps the shared pool and implements all three store traits,
//! so `AppState` can hand out the same instance behind each trait object.
//!
//! CONCURRENCY
//! ===========
//! `add_member` runs in a transaction that takes a row lock on the chatroom
//! (`SELECT ... FOR UPDATE`). Concurrent joins on the same chatroom serialize
//! on that lock, so the count they observe is always the committed count and
//! the capacity bound holds. The `(chatroom_id, user_id)` primary key backs
//! the duplicate check.

use sqlx::PgPool;
use time::OffsetDateTime;

use super::{
    AccountStore, AddMember, Chatroom, ChatroomStore, Member, Message, MessageStore, MessageWithSender, NewMessage,
    NewUser, PublicUser, StoreError, User,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type UserRow = (i64, String, String, String, String, OffsetDateTime);

fn user_from_row((id, name, email, username, password_hash, created_at): UserRow) -> User {
    User { id, name, email, username, password_hash, created_at }
}

/// Map a unique violation on `users` to the field that collided.
fn user_conflict(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return match db.constraint() {
                Some("users_email_key") => StoreError::Conflict("email"),
                Some("users_username_key") => StoreError::Conflict("username"),
                _ => StoreError::Conflict("user"),
            };
        }
    }
    StoreError::Database(err)
}

// =============================================================================
// ACCOUNTS
// =============================================================================

#[async_trait::async_trait]
impl AccountStore for PgStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (name, email, username, password_hash)
             VALUES ($1, $2, $3, $4)
             RETURNING id, name, email, username, password_hash, created_at",
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(user_conflict)?;

        Ok(user_from_row(row))
    }

    async fn resolve_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, username, password_hash, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, username, password_hash, created_at
             FROM users
             WHERE username = $1 OR email = lower($1)
             ORDER BY (username = $1) DESC
             LIMIT 1",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn insert_token(&self, token_hash: &str, user_id: i64, expires_at: OffsetDateTime) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO access_tokens (token_hash, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(token_hash)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn user_for_token(&self, token_hash: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT u.id, u.name, u.email, u.username, u.password_hash, u.created_at
             FROM access_tokens t
             JOIN users u ON u.id = t.user_id
             WHERE t.token_hash = $1 AND t.expires_at > now()",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn delete_token(&self, token_hash: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM access_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_ws_ticket(&self, ticket: &str, user_id: i64, expires_at: OffsetDateTime) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO ws_tickets (ticket, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(ticket)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn take_ws_ticket(&self, ticket: &str) -> Result<Option<i64>, StoreError> {
        let user_id = sqlx::query_scalar::<_, i64>(
            "DELETE FROM ws_tickets WHERE ticket = $1 AND expires_at > now() RETURNING user_id",
        )
        .bind(ticket)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user_id)
    }
}

// =============================================================================
// CHATROOMS + MEMBERSHIP
// =============================================================================

#[async_trait::async_trait]
impl ChatroomStore for PgStore {
    async fn create_chatroom(&self, name: &str, max_members: i32) -> Result<Chatroom, StoreError> {
        let (id, name, max_members, created_at) = sqlx::query_as::<_, (i64, String, i32, OffsetDateTime)>(
            "INSERT INTO chatrooms (name, max_members) VALUES ($1, $2)
             RETURNING id, name, max_members, created_at",
        )
        .bind(name)
        .bind(max_members)
        .fetch_one(&self.pool)
        .await?;

        Ok(Chatroom { id, name, max_members, created_at })
    }

    async fn get_chatroom(&self, id: i64) -> Result<Option<Chatroom>, StoreError> {
        let row = sqlx::query_as::<_, (i64, String, i32, OffsetDateTime)>(
            "SELECT id, name, max_members, created_at FROM chatrooms WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name, max_members, created_at)| Chatroom { id, name, max_members, created_at }))
    }

    async fn list_chatrooms(&self) -> Result<Vec<Chatroom>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, String, i32, OffsetDateTime)>(
            "SELECT id, name, max_members, created_at FROM chatrooms ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, max_members, created_at)| Chatroom { id, name, max_members, created_at })
            .collect())
    }

    async fn add_member(&self, chatroom_id: i64, user_id: i64) -> Result<AddMember, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent joins on this chatroom until commit/rollback.
        let max_members =
            sqlx::query_scalar::<_, i32>("SELECT max_members FROM chatrooms WHERE id = $1 FOR UPDATE")
                .bind(chatroom_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(max_members) = max_members else {
            return Ok(AddMember::NoChatroom);
        };

        let already: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM chatroom_user WHERE chatroom_id = $1 AND user_id = $2)",
        )
        .bind(chatroom_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        if already {
            return Ok(AddMember::AlreadyMember);
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chatroom_user WHERE chatroom_id = $1")
            .bind(chatroom_id)
            .fetch_one(&mut *tx)
            .await?;
        if count >= i64::from(max_members) {
            return Ok(AddMember::AtCapacity { max_members });
        }

        sqlx::query(
            "INSERT INTO chatroom_user (chatroom_id, user_id) VALUES ($1, $2)
             ON CONFLICT (chatroom_id, user_id) DO NOTHING",
        )
        .bind(chatroom_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(AddMember::Inserted)
    }

    async fn remove_member(&self, chatroom_id: i64, user_id: i64) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM chatrooms WHERE id = $1 FOR UPDATE")
            .bind(chatroom_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Ok(false);
        }

        sqlx::query("DELETE FROM chatroom_user WHERE chatroom_id = $1 AND user_id = $2")
            .bind(chatroom_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn members(&self, chatroom_id: i64) -> Result<Vec<Member>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, String, String, OffsetDateTime)>(
            "SELECT u.id, u.name, u.username, cu.joined_at
             FROM chatroom_user cu
             JOIN users u ON u.id = cu.user_id
             WHERE cu.chatroom_id = $1
             ORDER BY cu.joined_at ASC, u.id ASC",
        )
        .bind(chatroom_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, username, joined_at)| Member { user: PublicUser { id, name, username }, joined_at })
            .collect())
    }

    async fn is_member(&self, chatroom_id: i64, user_id: i64) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM chatroom_user WHERE chatroom_id = $1 AND user_id = $2)",
        )
        .bind(chatroom_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

#[async_trait::async_trait]
impl MessageStore for PgStore {
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError> {
        let (id, created_at) = sqlx::query_as::<_, (i64, OffsetDateTime)>(
            "INSERT INTO messages (chatroom_id, user_id, content, attachment)
             VALUES ($1, $2, $3, $4)
             RETURNING id, created_at",
        )
        .bind(message.chatroom_id)
        .bind(message.user_id)
        .bind(&message.content)
        .bind(&message.attachment)
        .fetch_one(&self.pool)
        .await?;

        Ok(Message {
            id,
            chatroom_id: message.chatroom_id,
            user_id: message.user_id,
            content: message.content,
            attachment: message.attachment,
            created_at,
        })
    }

    async fn list_for_chatroom(&self, chatroom_id: i64) -> Result<Vec<MessageWithSender>, StoreError> {
        let rows = sqlx::query_as::<
            _,
            (i64, i64, i64, Option<String>, Option<String>, OffsetDateTime, String, String),
        >(
            "SELECT m.id, m.chatroom_id, m.user_id, m.content, m.attachment, m.created_at, u.name, u.username
             FROM messages m
             JOIN users u ON u.id = m.user_id
             WHERE m.chatroom_id = $1
             ORDER BY m.created_at ASC, m.id ASC",
        )
        .bind(chatroom_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, chatroom_id, user_id, content, attachment, created_at, name, username)| MessageWithSender {
                message: Message { id, chatroom_id, user_id, content, attachment, created_at },
                user: PublicUser { id: user_id, name, username },
            })
            .collect())
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "postgres_test.rs"]
mod tests;
