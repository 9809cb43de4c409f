//! Broadcast channels — per-chatroom notification topics.
//!
//! DESIGN
//! ======
//! Each chatroom has one logical channel named `chatroom.<id>`. A channel is
//! just a map of subscriber id -> bounded `mpsc` sender owned by a websocket
//! connection. Publishing walks the map and `try_send`s a clone of the frame.
//!
//! DELIVERY
//! ========
//! At most once, to subscribers connected at publish time. A full or closed
//! queue drops the event for that subscriber; nothing is retried, persisted,
//! or replayed to later subscribers. The hub is process-local.
//!
//! AUTHORIZATION
//! =============
//! Subscribing requires an authenticated connection (enforced by the WS
//! ticket) and a well-formed channel name. By default every authenticated
//! user may attach to any chatroom channel; `channel_require_membership`
//! narrows that to current members.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::frame::{Data, ErrorCode, Frame};
use crate::state::AppState;
use crate::store::{Message, StoreError};

pub const CHANNEL_PREFIX: &str = "chatroom.";

/// Syscall carried by message-created event frames.
pub const MESSAGE_CREATED: &str = "message:created";

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("invalid channel name: {0}")]
    InvalidName(String),
    #[error("not allowed to subscribe to {0}")]
    Forbidden(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ErrorCode for ChannelError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidName(_) => "E_CHANNEL_INVALID",
            Self::Forbidden(_) => "E_CHANNEL_FORBIDDEN",
            Self::Store(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

#[must_use]
pub fn channel_name(chatroom_id: i64) -> String {
    format!("{CHANNEL_PREFIX}{chatroom_id}")
}

/// Parse `chatroom.<id>` back into the chatroom id.
///
/// # Errors
///
/// Returns [`ChannelError::InvalidName`] for anything else.
pub fn parse_channel(name: &str) -> Result<i64, ChannelError> {
    name.strip_prefix(CHANNEL_PREFIX)
        .filter(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|id| id.parse::<i64>().ok())
        .ok_or_else(|| ChannelError::InvalidName(name.to_owned()))
}

// =============================================================================
// HUB
// =============================================================================

#[derive(Clone, Default)]
pub struct BroadcastHub {
    channels: Arc<RwLock<HashMap<String, HashMap<Uuid, mpsc::Sender<Frame>>>>>,
}

impl BroadcastHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a subscriber. Re-subscribing replaces the previous sender.
    pub async fn subscribe(&self, channel: &str, subscriber_id: Uuid, tx: mpsc::Sender<Frame>) {
        let mut channels = self.channels.write().await;
        let subscribers = channels.entry(channel.to_owned()).or_default();
        subscribers.insert(subscriber_id, tx);
        info!(%channel, %subscriber_id, subscribers = subscribers.len(), "subscriber attached");
    }

    pub async fn unsubscribe(&self, channel: &str, subscriber_id: Uuid) {
        let mut channels = self.channels.write().await;
        let Some(subscribers) = channels.get_mut(channel) else {
            return;
        };
        subscribers.remove(&subscriber_id);
        if subscribers.is_empty() {
            channels.remove(channel);
        }
        info!(%channel, %subscriber_id, "subscriber detached");
    }

    /// Drop every subscription held by one connection.
    pub async fn unsubscribe_all(&self, subscriber_id: Uuid) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, subscribers| {
            subscribers.remove(&subscriber_id);
            !subscribers.is_empty()
        });
    }

    pub async fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.channels.read().await;
        channels.get(channel).map_or(0, HashMap::len)
    }

    /// Push a frame to every current subscriber of `channel`.
    /// Returns how many subscribers accepted it.
    pub async fn publish(&self, channel: &str, frame: &Frame) -> usize {
        let channels = self.channels.read().await;
        let Some(subscribers) = channels.get(channel) else {
            return 0;
        };

        let mut delivered = 0;
        for (subscriber_id, tx) in subscribers {
            // Best-effort: a full or closed queue misses this event.
            if tx.try_send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(%channel, %subscriber_id, "dropped event for slow or closed subscriber");
            }
        }
        delivered
    }
}

// =============================================================================
// MESSAGE EVENTS
// =============================================================================

/// Build the `message:created` event for a persisted message.
#[must_use]
pub fn message_event(message: &Message) -> Frame {
    let data: Data = match serde_json::to_value(message) {
        Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
        _ => Data::new(),
    };
    Frame::request(MESSAGE_CREATED, data).with_channel(channel_name(message.chatroom_id))
}

/// Publish a committed message to its chatroom channel.
pub async fn publish_message(hub: &BroadcastHub, message: &Message) -> usize {
    let channel = channel_name(message.chatroom_id);
    let delivered = hub.publish(&channel, &message_event(message)).await;
    info!(%channel, message_id = message.id, delivered, "published message");
    delivered
}

// =============================================================================
// AUTHORIZATION
// =============================================================================

/// Decide whether `user_id` may subscribe to `channel`. Returns the chatroom id.
///
/// # Errors
///
/// Returns [`ChannelError::InvalidName`] for malformed names and
/// [`ChannelError::Forbidden`] when membership is required but absent.
pub async fn authorize_subscription(state: &AppState, user_id: i64, channel: &str) -> Result<i64, ChannelError> {
    let chatroom_id = parse_channel(channel)?;

    if state.config.channel_require_membership && !state.chatrooms.is_member(chatroom_id, user_id).await? {
        return Err(ChannelError::Forbidden(channel.to_owned()));
    }

    Ok(chatroom_id)
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
