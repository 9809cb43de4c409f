//! Chatroom service — create and list.

use tracing::info;

use crate::services::ChatError;
use crate::state::AppState;
use crate::store::Chatroom;

const MAX_NAME_LEN: usize = 255;
pub const MIN_MEMBERS: i64 = 2;

/// Create a chatroom.
///
/// # Errors
///
/// Returns [`ChatError::Validation`] for an empty/overlong name or a
/// `max_members` below two.
pub async fn create_chatroom(state: &AppState, name: &str, max_members: i64) -> Result<Chatroom, ChatError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::validation("the name field is required"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ChatError::validation(format!(
            "the name may not be greater than {MAX_NAME_LEN} characters"
        )));
    }
    if max_members < MIN_MEMBERS {
        return Err(ChatError::validation(format!("the max_members must be at least {MIN_MEMBERS}")));
    }
    let max_members =
        i32::try_from(max_members).map_err(|_| ChatError::validation("the max_members is too large"))?;

    let chatroom = state.chatrooms.create_chatroom(name, max_members).await?;
    info!(chatroom_id = chatroom.id, max_members, "created chatroom");
    Ok(chatroom)
}

/// List all chatrooms, oldest first.
///
/// # Errors
///
/// Returns a store error if the query fails.
pub async fn list_chatrooms(state: &AppState) -> Result<Vec<Chatroom>, ChatError> {
    Ok(state.chatrooms.list_chatrooms().await?)
}

/// Fetch a chatroom or fail with [`ChatError::NotFound`].
pub(crate) async fn require_chatroom(state: &AppState, chatroom_id: i64) -> Result<Chatroom, ChatError> {
    state
        .chatrooms
        .get_chatroom(chatroom_id)
        .await?
        .ok_or(ChatError::NotFound(chatroom_id))
}

/// Ensure `user_id` references an existing user.
pub(crate) async fn require_user(state: &AppState, user_id: i64) -> Result<(), ChatError> {
    if state.accounts.resolve_user(user_id).await?.is_none() {
        return Err(ChatError::Validation(format!("the selected user_id {user_id} is invalid")));
    }
    Ok(())
}
