//! Error taxonomy shared by the chatroom, membership, and message services.

use crate::frame::ErrorCode;
use crate::services::attachment::AttachmentError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chatroom not found: {0}")]
    NotFound(i64),
    #[error("{0}")]
    Validation(String),
    #[error("chatroom {chatroom_id} is full (max {max_members} members)")]
    CapacityExceeded { chatroom_id: i64, max_members: i32 },
    #[error(transparent)]
    Storage(#[from] AttachmentError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ChatError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl ErrorCode for ChatError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_CHATROOM_NOT_FOUND",
            Self::Validation(_) => "E_VALIDATION",
            Self::CapacityExceeded { .. } => "E_CHATROOM_FULL",
            Self::Storage(AttachmentError::Rejected(_)) => "E_ATTACHMENT_REJECTED",
            Self::Storage(AttachmentError::Io(_)) => "E_STORAGE",
            Self::Store(_) => "E_DATABASE",
        }
    }
}
