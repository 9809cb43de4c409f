//! Repository contracts for accounts, chatrooms, and messages.
//!
//! ARCHITECTURE
//! ============
//! Services never touch SQL directly. Each entity family has an explicit
//! store trait with typed CRUD + query operations; relations are fetched by
//! explicit calls (`members`, `list_for_chatroom`), never lazily.
//!
//! `postgres` holds the production implementation. `memory` is a test double
//! that honors the same atomicity contract with a single async mutex.
//!
//! INVARIANTS
//! ==========
//! - `ChatroomStore::add_member` performs the existence check, duplicate
//!   check, capacity check, and insert as one atomic step.
//! - `MessageStore::insert` returns only after the row is committed.

pub mod postgres;

#[cfg(test)]
pub mod memory;

use serde::Serialize;
use time::OffsetDateTime;

// =============================================================================
// RECORDS
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl User {
    #[must_use]
    pub fn profile(&self) -> PublicUser {
        PublicUser { id: self.id, name: self.name.clone(), username: self.username.clone() }
    }
}

/// Profile fields safe to show to other users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub name: String,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chatroom {
    pub id: i64,
    pub name: String,
    pub max_members: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// One membership row joined with the member's public profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    #[serde(flatten)]
    pub user: PublicUser,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
}

/// Result of the atomic membership insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddMember {
    Inserted,
    AlreadyMember,
    AtCapacity { max_members: i32 },
    NoChatroom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: i64,
    pub chatroom_id: i64,
    pub user_id: i64,
    pub content: Option<String>,
    pub attachment: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chatroom_id: i64,
    pub user_id: i64,
    pub content: Option<String>,
    pub attachment: Option<String>,
}

/// A message with its sender's profile attached, as returned by history reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageWithSender {
    #[serde(flatten)]
    pub message: Message,
    pub user: PublicUser,
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint rejected the write; carries the offending field.
    #[error("{0} already taken")]
    Conflict(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

// =============================================================================
// TRAITS
// =============================================================================

#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a user. Fails with [`StoreError::Conflict`] on duplicate email/username.
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn resolve_user(&self, id: i64) -> Result<Option<User>, StoreError>;

    /// Find a user whose username or (lowercased) email equals `login`.
    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError>;

    async fn insert_token(
        &self,
        token_hash: &str,
        user_id: i64,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Resolve a non-expired token hash to its user.
    async fn user_for_token(&self, token_hash: &str) -> Result<Option<User>, StoreError>;

    async fn delete_token(&self, token_hash: &str) -> Result<(), StoreError>;

    async fn insert_ws_ticket(
        &self,
        ticket: &str,
        user_id: i64,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Delete a non-expired ticket and return its user id. Single use.
    async fn take_ws_ticket(&self, ticket: &str) -> Result<Option<i64>, StoreError>;
}

#[async_trait::async_trait]
pub trait ChatroomStore: Send + Sync {
    async fn create_chatroom(&self, name: &str, max_members: i32) -> Result<Chatroom, StoreError>;

    async fn get_chatroom(&self, id: i64) -> Result<Option<Chatroom>, StoreError>;

    /// All chatrooms, oldest first.
    async fn list_chatrooms(&self) -> Result<Vec<Chatroom>, StoreError>;

    /// Atomically check existence, duplicate, and capacity, then insert.
    async fn add_member(&self, chatroom_id: i64, user_id: i64) -> Result<AddMember, StoreError>;

    /// Delete a membership row if present. Returns `false` if the chatroom does not exist.
    async fn remove_member(&self, chatroom_id: i64, user_id: i64) -> Result<bool, StoreError>;

    /// Members in join order.
    async fn members(&self, chatroom_id: i64) -> Result<Vec<Member>, StoreError>;

    async fn is_member(&self, chatroom_id: i64, user_id: i64) -> Result<bool, StoreError>;
}

#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a message and return the committed row.
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Messages for a chatroom in ascending creation order.
    async fn list_for_chatroom(&self, chatroom_id: i64) -> Result<Vec<MessageWithSender>, StoreError>;
}
