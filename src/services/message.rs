//! Message service — persist a message, then announce it on the chatroom channel.
//!
//! ORDERING
//! ========
//! 1. chatroom exists, sender exists
//! 2. attachment (if any) handed to `FileStorage`; rejection stops here
//! 3. row inserted; on failure the stored file is removed
//! 4. `message:created` published, only after the insert returned
//!
//! A request cancelled between 3 and 4 leaves a persisted message that was
//! never broadcast. Subscribers recover by listing history.

use tracing::{info, warn};

use crate::services::ChatError;
use crate::services::attachment::Upload;
use crate::services::broadcast;
use crate::services::chatroom::{require_chatroom, require_user};
use crate::state::AppState;
use crate::store::{Message, MessageWithSender, NewMessage};

#[derive(Debug, Clone)]
pub struct SendMessage {
    pub chatroom_id: i64,
    pub user_id: i64,
    pub content: Option<String>,
    pub attachment: Option<Upload>,
}

/// Persist a message and publish it to the chatroom's subscribers.
///
/// # Errors
///
/// - [`ChatError::NotFound`] if the chatroom does not exist.
/// - [`ChatError::Validation`] if the sender does not exist.
/// - [`ChatError::Storage`] if the attachment is rejected or cannot be written.
pub async fn send(state: &AppState, req: SendMessage) -> Result<Message, ChatError> {
    require_chatroom(state, req.chatroom_id).await?;
    require_user(state, req.user_id).await?;

    let attachment = match req.attachment {
        Some(upload) => Some(state.files.store(upload).await?),
        None => None,
    };

    let new_message = NewMessage {
        chatroom_id: req.chatroom_id,
        user_id: req.user_id,
        content: req.content,
        attachment: attachment.clone(),
    };

    let message = match state.messages.insert(new_message).await {
        Ok(message) => message,
        Err(e) => {
            if let Some(reference) = attachment.as_deref() {
                if let Err(cleanup) = state.files.remove(reference).await {
                    warn!(%reference, error = %cleanup, "failed to remove orphaned attachment");
                }
            }
            return Err(e.into());
        }
    };

    info!(
        chatroom_id = message.chatroom_id,
        message_id = message.id,
        user_id = message.user_id,
        has_attachment = message.attachment.is_some(),
        "message stored"
    );

    broadcast::publish_message(&state.hub, &message).await;
    Ok(message)
}

/// Full history for a chatroom, oldest first, with sender profiles.
///
/// # Errors
///
/// Returns [`ChatError::NotFound`] if the chatroom does not exist.
pub async fn list_messages(state: &AppState, chatroom_id: i64) -> Result<Vec<MessageWithSender>, ChatError> {
    require_chatroom(state, chatroom_id).await?;
    Ok(state.messages.list_for_chatroom(chatroom_id).await?)
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
