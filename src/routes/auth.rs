//! Auth routes — registration, login, bearer tokens, WS tickets.

use axum::body::Bytes;
use axum::extract::{FromRef, FromRequestParts, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::Response;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use serde::Deserialize;
use serde_json::json;

use crate::routes::{ApiError, parse_body, respond};
use crate::services::account::{self, Registration};
use crate::state::AppState;
use crate::store::User;

const TOKEN_TYPE: &str = "Bearer";

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated user resolved from `Authorization: Bearer <token>`.
/// Use as a handler parameter to require authentication.
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::unauthenticated())?;
        let token = bearer.token();
        if token.is_empty() {
            return Err(ApiError::unauthenticated());
        }

        let app_state = AppState::from_ref(state);
        let user = account::authenticate(&app_state, token)
            .await?
            .ok_or_else(ApiError::unauthenticated)?;

        Ok(Self { user, token: token.to_owned() })
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct RegisterBody {
    pub name: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct LoginBody {
    pub username_or_email: String,
    pub password: String,
}

fn token_payload(user: &User, token: String) -> serde_json::Value {
    json!({ "access_token": token, "token_type": TOKEN_TYPE, "user": user })
}

/// `POST /api/register` — create an account and return its first token.
pub async fn register(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body: RegisterBody = parse_body(&body)?;
    let (user, token) = account::register(
        &state,
        Registration { name: body.name, email: body.email, username: body.username, password: body.password },
    )
    .await?;

    Ok(respond(StatusCode::CREATED, "User registered successfully", token_payload(&user, token)))
}

/// `POST /api/login` — exchange credentials for a bearer token.
pub async fn login(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body: LoginBody = parse_body(&body)?;
    let (user, token) = account::login(&state, &body.username_or_email, &body.password).await?;
    Ok(respond(StatusCode::OK, "Login successful", token_payload(&user, token)))
}

/// `GET /api/user` — the authenticated user.
pub async fn me(auth: AuthUser) -> Response {
    respond(StatusCode::OK, "Authenticated user", auth.user)
}

/// `POST /api/logout` — revoke the presented token.
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> Result<Response, ApiError> {
    account::logout(&state, &auth.token).await?;
    Ok(respond(StatusCode::OK, "Logged out successfully", serde_json::Value::Null))
}

/// `POST /api/ws-ticket` — one-time ticket for `GET /api/ws?ticket=...`.
pub async fn ws_ticket(State(state): State<AppState>, auth: AuthUser) -> Result<Response, ApiError> {
    let ticket = account::issue_ws_ticket(&state, auth.user.id).await?;
    Ok(respond(StatusCode::OK, "Websocket ticket issued", json!({ "ticket": ticket })))
}
