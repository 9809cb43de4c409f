//! Chatroom routes — create/list, enter/leave, members, messages.
//!
//! Every route requires a bearer token. Bodies that carry `user_id` act on
//! that user when present and on the authenticated user otherwise.

use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::Response;
use serde::Deserialize;

use crate::routes::auth::AuthUser;
use crate::routes::{ApiError, parse_body, respond};
use crate::services::ChatError;
use crate::services::attachment::Upload;
use crate::services::chatroom;
use crate::services::membership;
use crate::services::message::{self, SendMessage};
use crate::state::AppState;

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct CreateChatroomBody {
    pub name: Option<String>,
    pub max_members: Option<i64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct UserBody {
    pub user_id: Option<i64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct MessageBody {
    pub user_id: Option<i64>,
    pub message: Option<String>,
}

// =============================================================================
// CHATROOMS
// =============================================================================

/// `POST /api/chatrooms` — create a chatroom.
pub async fn create_chatroom(
    State(state): State<AppState>,
    _auth: AuthUser,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body: CreateChatroomBody = parse_body(&body)?;
    let Some(max_members) = body.max_members else {
        return Err(ChatError::validation("the max_members field is required").into());
    };
    let room = chatroom::create_chatroom(&state, body.name.as_deref().unwrap_or_default(), max_members).await?;
    Ok(respond(StatusCode::CREATED, "Chatroom created successfully", room))
}

/// `GET /api/chatrooms` — all chatrooms, oldest first.
pub async fn list_chatrooms(State(state): State<AppState>, _auth: AuthUser) -> Result<Response, ApiError> {
    let rooms = chatroom::list_chatrooms(&state).await?;
    Ok(respond(StatusCode::OK, "Chatrooms retrieved successfully", rooms))
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

/// `POST /api/chatrooms/{id}/enter` — join; re-entering is a no-op success.
pub async fn enter_chatroom(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chatroom_id): Path<i64>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body: UserBody = parse_body(&body)?;
    let user_id = body.user_id.unwrap_or(auth.user.id);

    let outcome = membership::join(&state, chatroom_id, user_id).await?;
    let message = if outcome.already_member {
        "User is already in the chatroom"
    } else {
        "User entered the chatroom successfully"
    };
    Ok(respond(StatusCode::OK, message, outcome.members))
}

/// `POST /api/chatrooms/{id}/leave` — leave; not being a member is fine.
pub async fn leave_chatroom(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chatroom_id): Path<i64>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body: UserBody = parse_body(&body)?;
    let user_id = body.user_id.unwrap_or(auth.user.id);

    membership::leave(&state, chatroom_id, user_id).await?;
    Ok(respond(StatusCode::OK, "User left the chatroom successfully", serde_json::Value::Null))
}

/// `GET /api/chatrooms/{id}/members`
pub async fn list_members(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(chatroom_id): Path<i64>,
) -> Result<Response, ApiError> {
    let members = membership::members(&state, chatroom_id).await?;
    Ok(respond(StatusCode::OK, "Chatroom members retrieved successfully", members))
}

// =============================================================================
// MESSAGES
// =============================================================================

/// `GET /api/chatrooms/{id}/messages` — history with sender profiles.
pub async fn list_messages(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(chatroom_id): Path<i64>,
) -> Result<Response, ApiError> {
    let messages = message::list_messages(&state, chatroom_id).await?;
    Ok(respond(StatusCode::OK, "Messages retrieved successfully", messages))
}

/// `POST /api/chatrooms/{id}/messages` — JSON `{user_id?, message?}` or
/// multipart with `user_id`, `message`, and an `attachment` file part.
/// A blank `message` is stored as no content.
pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chatroom_id): Path<i64>,
    request: Request,
) -> Result<Response, ApiError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"));

    let (body, attachment) = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        read_multipart(multipart).await?
    } else {
        let bytes = Bytes::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        (parse_body::<MessageBody>(&bytes)?, None)
    };

    let sent = message::send(
        &state,
        SendMessage {
            chatroom_id,
            user_id: body.user_id.unwrap_or(auth.user.id),
            content: body.message.filter(|m| !m.trim().is_empty()),
            attachment,
        },
    )
    .await?;
    Ok(respond(StatusCode::CREATED, "Message sent successfully", sent))
}

async fn read_multipart(mut multipart: Multipart) -> Result<(MessageBody, Option<Upload>), ApiError> {
    let mut body = MessageBody::default();
    let mut attachment = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "user_id" => {
                let raw = field.text().await.map_err(multipart_error)?;
                let raw = raw.trim();
                if !raw.is_empty() {
                    let id = raw
                        .parse::<i64>()
                        .map_err(|_| ChatError::validation("the user_id must be an integer"))?;
                    body.user_id = Some(id);
                }
            }
            "message" => body.message = Some(field.text().await.map_err(multipart_error)?),
            "attachment" => {
                let file_name = field.file_name().map(str::to_owned);
                let content_type = field.content_type().map(str::to_owned);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                attachment = Some(Upload { file_name, content_type, bytes: bytes.to_vec() });
            }
            _ => {}
        }
    }
    Ok((body, attachment))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    let mut api = ApiError::bad_request(err.body_text());
    api.status = err.status();
    api
}
