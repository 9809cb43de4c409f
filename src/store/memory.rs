//! In-memory store used by unit tests in place of Postgres.
//!
//! Every operation takes the one `tokio::sync::Mutex`, which makes
//! `add_member` atomic the same way the row lock does in `postgres`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::{
    AccountStore, AddMember, Chatroom, ChatroomStore, Member, Message, MessageStore, MessageWithSender, NewMessage,
    NewUser, StoreError, User,
};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    tokens: HashMap<String, (i64, OffsetDateTime)>,
    tickets: HashMap<String, (i64, OffsetDateTime)>,
    chatrooms: Vec<Chatroom>,
    memberships: Vec<(i64, i64, OffsetDateTime)>,
    messages: Vec<Message>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_message_inserts: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored message rows across all chatrooms.
    pub async fn message_count(&self) -> usize {
        self.tables.lock().await.messages.len()
    }

    /// Make every subsequent message insert fail as if the database were down.
    pub fn fail_message_inserts(&self, fail: bool) {
        self.fail_message_inserts.store(fail, Ordering::SeqCst);
    }
}

fn next_id(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX - 1) + 1
}

#[async_trait::async_trait]
impl AccountStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("email"));
        }
        if tables.users.iter().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict("username"));
        }
        let row = User {
            id: next_id(tables.users.len()),
            name: user.name,
            email: user.email,
            username: user.username,
            password_hash: user.password_hash,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.users.push(row.clone());
        Ok(row)
    }

    async fn resolve_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        let email = login.to_ascii_lowercase();
        let by_username = tables.users.iter().find(|u| u.username == login);
        Ok(by_username
            .or_else(|| tables.users.iter().find(|u| u.email == email))
            .cloned())
    }

    async fn insert_token(&self, token_hash: &str, user_id: i64, expires_at: OffsetDateTime) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.tokens.insert(token_hash.to_owned(), (user_id, expires_at));
        Ok(())
    }

    async fn user_for_token(&self, token_hash: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        let now = OffsetDateTime::now_utc();
        let Some((user_id, _)) = tables.tokens.get(token_hash).filter(|(_, exp)| *exp > now) else {
            return Ok(None);
        };
        Ok(tables.users.iter().find(|u| u.id == *user_id).cloned())
    }

    async fn delete_token(&self, token_hash: &str) -> Result<(), StoreError> {
        self.tables.lock().await.tokens.remove(token_hash);
        Ok(())
    }

    async fn insert_ws_ticket(&self, ticket: &str, user_id: i64, expires_at: OffsetDateTime) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.tickets.insert(ticket.to_owned(), (user_id, expires_at));
        Ok(())
    }

    async fn take_ws_ticket(&self, ticket: &str) -> Result<Option<i64>, StoreError> {
        let mut tables = self.tables.lock().await;
        let now = OffsetDateTime::now_utc();
        Ok(tables
            .tickets
            .remove(ticket)
            .filter(|(_, exp)| *exp > now)
            .map(|(user_id, _)| user_id))
    }
}

#[async_trait::async_trait]
impl ChatroomStore for MemoryStore {
    async fn create_chatroom(&self, name: &str, max_members: i32) -> Result<Chatroom, StoreError> {
        let mut tables = self.tables.lock().await;
        let row = Chatroom {
            id: next_id(tables.chatrooms.len()),
            name: name.to_owned(),
            max_members,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.chatrooms.push(row.clone());
        Ok(row)
    }

    async fn get_chatroom(&self, id: i64) -> Result<Option<Chatroom>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.chatrooms.iter().find(|c| c.id == id).cloned())
    }

    async fn list_chatrooms(&self) -> Result<Vec<Chatroom>, StoreError> {
        Ok(self.tables.lock().await.chatrooms.clone())
    }

    async fn add_member(&self, chatroom_id: i64, user_id: i64) -> Result<AddMember, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(max_members) = tables
            .chatrooms
            .iter()
            .find(|c| c.id == chatroom_id)
            .map(|c| c.max_members)
        else {
            return Ok(AddMember::NoChatroom);
        };
        if tables
            .memberships
            .iter()
            .any(|(c, u, _)| *c == chatroom_id && *u == user_id)
        {
            return Ok(AddMember::AlreadyMember);
        }
        let count = tables
            .memberships
            .iter()
            .filter(|(c, _, _)| *c == chatroom_id)
            .count();
        if i64::try_from(count).unwrap_or(i64::MAX) >= i64::from(max_members) {
            return Ok(AddMember::AtCapacity { max_members });
        }
        // Yield while holding the lock so racing joins genuinely contend.
        tokio::task::yield_now().await;
        tables
            .memberships
            .push((chatroom_id, user_id, OffsetDateTime::now_utc()));
        Ok(AddMember::Inserted)
    }

    async fn remove_member(&self, chatroom_id: i64, user_id: i64) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.chatrooms.iter().any(|c| c.id == chatroom_id) {
            return Ok(false);
        }
        tables
            .memberships
            .retain(|(c, u, _)| !(*c == chatroom_id && *u == user_id));
        Ok(true)
    }

    async fn members(&self, chatroom_id: i64) -> Result<Vec<Member>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .memberships
            .iter()
            .filter(|(c, _, _)| *c == chatroom_id)
            .filter_map(|(_, u, joined_at)| {
                let user = tables.users.iter().find(|row| row.id == *u)?;
                Some(Member { user: user.profile(), joined_at: *joined_at })
            })
            .collect())
    }

    async fn is_member(&self, chatroom_id: i64, user_id: i64) -> Result<bool, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .memberships
            .iter()
            .any(|(c, u, _)| *c == chatroom_id && *u == user_id))
    }
}

#[async_trait::async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError> {
        if self.fail_message_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut tables = self.tables.lock().await;
        let row = Message {
            id: next_id(tables.messages.len()),
            chatroom_id: message.chatroom_id,
            user_id: message.user_id,
            content: message.content,
            attachment: message.attachment,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.messages.push(row.clone());
        Ok(row)
    }

    async fn list_for_chatroom(&self, chatroom_id: i64) -> Result<Vec<MessageWithSender>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.chatroom_id == chatroom_id)
            .filter_map(|m| {
                let user = tables.users.iter().find(|u| u.id == m.user_id)?;
                Some(MessageWithSender { message: m.clone(), user: user.profile() })
            })
            .collect())
    }
}
