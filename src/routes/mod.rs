//! Router assembly and the JSON response envelope.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the account, chatroom, and message HTTP endpoints plus the websocket
//! endpoint under one Axum router. Stored attachments are served read-only
//! from `<STORAGE_DIR>/attachments` at `/storage/attachments`.
//!
//! ENVELOPE
//! ========
//! Success: `{"message": ..., "data": ...}`.
//! Failure: `{"message": ..., "error": ..., "code": ...}` where `code` is the
//! grepable `ErrorCode` of the underlying domain error.

pub mod auth;
pub mod chatrooms;
pub mod ws;

use axum::Router;
use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::frame::ErrorCode;
use crate::services::ChatError;
use crate::services::account::AccountError;
use crate::services::attachment::AttachmentError;
use crate::state::AppState;

/// Multipart framing overhead allowed on top of the attachment limit.
const BODY_LIMIT_SLACK: usize = 1024 * 1024;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let attachments_dir = state.config.storage_dir.join("attachments");
    let body_limit = state.config.max_attachment_bytes.saturating_add(BODY_LIMIT_SLACK);

    Router::new()
        .route("/api/register", post(auth::register))
        .route("/api/login", post(auth::login))
        .route("/api/user", get(auth::me))
        .route("/api/logout", post(auth::logout))
        .route("/api/ws-ticket", post(auth::ws_ticket))
        .route(
            "/api/chatrooms",
            get(chatrooms::list_chatrooms).post(chatrooms::create_chatroom),
        )
        .route("/api/chatrooms/{id}/enter", post(chatrooms::enter_chatroom))
        .route("/api/chatrooms/{id}/leave", post(chatrooms::leave_chatroom))
        .route("/api/chatrooms/{id}/members", get(chatrooms::list_members))
        .route(
            "/api/chatrooms/{id}/messages",
            get(chatrooms::list_messages).post(chatrooms::send_message),
        )
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .nest_service("/storage/attachments", ServeDir::new(attachments_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// Wrap `data` in the success envelope.
pub(crate) fn respond<T: Serialize>(status: StatusCode, message: &str, data: T) -> Response {
    (status, Json(serde_json::json!({ "message": message, "data": data }))).into_response()
}

/// Decode an optional JSON body. An empty body or `null` yields `T::default()`.
pub(crate) fn parse_body<T: DeserializeOwned + Default>(bytes: &Bytes) -> Result<T, ApiError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ApiError::bad_request(format!("invalid json body: {e}")))?;
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value).map_err(|e| ApiError::bad_request(format!("invalid json body: {e}")))
}

/// Failure half of the envelope. Every handler error converts into this.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: &'static str,
    pub error: String,
    pub code: &'static str,
}

impl ApiError {
    pub(crate) fn unauthenticated() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "Unauthenticated",
            error: "a valid bearer token is required".into(),
            code: "E_UNAUTHENTICATED",
        }
    }

    pub(crate) fn bad_request(error: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: "Malformed request", error: error.into(), code: "E_BAD_REQUEST" }
    }

    fn from_code(status: StatusCode, message: &'static str, err: &impl ErrorCode) -> Self {
        if status.is_server_error() {
            error!(code = err.error_code(), error = %err, "request failed");
        }
        Self { status, message, error: err.to_string(), code: err.error_code() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "message": self.message, "error": self.error, "code": self.code });
        (self.status, Json(body)).into_response()
    }
}

pub(crate) fn chat_error_to_status(err: &ChatError) -> StatusCode {
    match err {
        ChatError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatError::Validation(_) | ChatError::Storage(AttachmentError::Rejected(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        ChatError::CapacityExceeded { .. } => StatusCode::BAD_REQUEST,
        ChatError::Storage(AttachmentError::Io(_)) | ChatError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn account_error_to_status(err: &AccountError) -> StatusCode {
    match err {
        AccountError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AccountError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        AccountError::Hash(_) | AccountError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let message = match &err {
            ChatError::NotFound(_) => "Chatroom not found",
            ChatError::Validation(_) => "The given data was invalid",
            ChatError::CapacityExceeded { .. } => "Chatroom is full",
            ChatError::Storage(AttachmentError::Rejected(_)) => "Attachment rejected",
            ChatError::Storage(AttachmentError::Io(_)) => "Attachment could not be stored",
            ChatError::Store(_) => "Internal server error",
        };
        Self::from_code(chat_error_to_status(&err), message, &err)
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        let message = match &err {
            AccountError::Validation(_) => "The given data was invalid",
            AccountError::InvalidCredentials => "Invalid login details",
            AccountError::Hash(_) | AccountError::Store(_) => "Internal server error",
        };
        Self::from_code(account_error_to_status(&err), message, &err)
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
