//! Membership service — capacity-bounded, idempotent join and leave.
//!
//! DESIGN
//! ======
//! The existence, duplicate, and capacity checks plus the insert are one
//! atomic store call (`ChatroomStore::add_member`). This module only orders
//! the up-front validation, maps store outcomes to `ChatError`, and logs.
//!
//! IDEMPOTENCE
//! ===========
//! Joining a room you are already in succeeds without a write. Leaving a
//! room you are not in succeeds without a write. Only a missing chatroom is
//! an error for either operation.

use tracing::{info, warn};

use crate::services::ChatError;
use crate::services::chatroom::{require_chatroom, require_user};
use crate::state::AppState;
use crate::store::{AddMember, Member};

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// True when the user was already a member and nothing changed.
    pub already_member: bool,
    pub members: Vec<Member>,
}

/// Add `user_id` to a chatroom.
///
/// # Errors
///
/// - [`ChatError::NotFound`] if the chatroom does not exist.
/// - [`ChatError::Validation`] if the user does not exist.
/// - [`ChatError::CapacityExceeded`] if the room is full.
pub async fn join(state: &AppState, chatroom_id: i64, user_id: i64) -> Result<JoinOutcome, ChatError> {
    require_chatroom(state, chatroom_id).await?;
    require_user(state, user_id).await?;

    let already_member = match state.chatrooms.add_member(chatroom_id, user_id).await? {
        AddMember::Inserted => {
            info!(chatroom_id, user_id, "user joined chatroom");
            false
        }
        AddMember::AlreadyMember => {
            info!(chatroom_id, user_id, "user already in chatroom");
            true
        }
        AddMember::AtCapacity { max_members } => {
            warn!(chatroom_id, user_id, max_members, "join rejected: chatroom full");
            return Err(ChatError::CapacityExceeded { chatroom_id, max_members });
        }
        // Deleted between the lookup and the locked insert.
        AddMember::NoChatroom => return Err(ChatError::NotFound(chatroom_id)),
    };

    let members = state.chatrooms.members(chatroom_id).await?;
    Ok(JoinOutcome { already_member, members })
}

/// Remove `user_id` from a chatroom. Not being a member is not an error.
///
/// # Errors
///
/// - [`ChatError::NotFound`] if the chatroom does not exist.
/// - [`ChatError::Validation`] if the user does not exist.
pub async fn leave(state: &AppState, chatroom_id: i64, user_id: i64) -> Result<(), ChatError> {
    require_chatroom(state, chatroom_id).await?;
    require_user(state, user_id).await?;

    if !state.chatrooms.remove_member(chatroom_id, user_id).await? {
        return Err(ChatError::NotFound(chatroom_id));
    }
    info!(chatroom_id, user_id, "user left chatroom");
    Ok(())
}

/// Current members in join order.
///
/// # Errors
///
/// Returns [`ChatError::NotFound`] if the chatroom does not exist.
pub async fn members(state: &AppState, chatroom_id: i64) -> Result<Vec<Member>, ChatError> {
    require_chatroom(state, chatroom_id).await?;
    Ok(state.chatrooms.members(chatroom_id).await?)
}

#[cfg(test)]
#[path = "membership_test.rs"]
mod tests;
