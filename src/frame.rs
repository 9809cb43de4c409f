//! JSON envelope exchanged over `/api/ws`.
//!
//! A socket carries three kinds of traffic, all as [`Frame`]s:
//! - client requests: `channel:subscribe`, `channel:unsubscribe`
//! - the server's answer to each request, with `parent_id` pointing back at it
//!   and `status` of `done` or `error`
//! - pushed events such as `message:created`, tagged with the chatroom
//!   channel they were published on
//!
//! `data` is a single-level JSON object. A `message:created` event puts the
//! stored message's columns (`id`, `chatroom_id`, `user_id`, `content`,
//! `attachment`, `created_at`) straight into it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Keys an error answer puts in `data`.
pub const ERR_MESSAGE_KEY: &str = "message";
pub const ERR_CODE_KEY: &str = "code";
pub const ERR_RETRYABLE_KEY: &str = "retryable";

pub type Data = HashMap<String, serde_json::Value>;

/// `request` for client requests and pushed events; `done`/`error` for answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    /// Set on answers: the `id` of the request being answered.
    pub parent_id: Option<Uuid>,
    /// Unix epoch milliseconds when the frame was built.
    pub ts: i64,
    /// Chatroom channel (`chatroom.<id>`) the frame concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// `<prefix>:<op>`, e.g. `channel:subscribe`.
    pub syscall: String,
    pub status: Status,
    #[serde(default)]
    pub data: Data,
}

/// Domain errors that can be reported to a client with a stable code.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

fn epoch_millis() -> i64 {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).unwrap_or(0)
}

impl Frame {
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: epoch_millis(),
            channel: None,
            syscall: syscall.into(),
            status: Status::Request,
            data,
        }
    }

    #[must_use]
    pub fn done(&self) -> Self {
        self.answer(Status::Done, Data::new())
    }

    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        self.answer(Status::Done, data)
    }

    /// Error answer with only a human-readable `message`.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        let data = Data::from([(ERR_MESSAGE_KEY.to_owned(), serde_json::Value::from(message.into()))]);
        self.answer(Status::Error, data)
    }

    /// Error answer carrying the error's code, text, and retry hint.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        let data = Data::from([
            (ERR_CODE_KEY.to_owned(), serde_json::Value::from(err.error_code())),
            (ERR_MESSAGE_KEY.to_owned(), serde_json::Value::from(err.to_string())),
            (ERR_RETRYABLE_KEY.to_owned(), serde_json::Value::from(err.retryable())),
        ]);
        self.answer(Status::Error, data)
    }

    // Answers keep the request's syscall and channel so clients can match
    // them without tracking ids.
    fn answer(&self, status: Status, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: epoch_millis(),
            channel: self.channel.clone(),
            syscall: self.syscall.clone(),
            status,
            data,
        }
    }

    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// `channel` in `channel:subscribe`; the whole syscall when there is no `:`.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.syscall.split_once(':').map_or(self.syscall.as_str(), |(prefix, _)| prefix)
    }

    /// `subscribe` in `channel:subscribe`; empty when there is no `:`.
    #[must_use]
    pub fn op(&self) -> &str {
        self.syscall.split_once(':').map_or("", |(_, op)| op)
    }
}
