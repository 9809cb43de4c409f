//! Account service — registration, login, bearer tokens, WS tickets.
//!
//! Passwords are hashed with Argon2 on the blocking pool. Tokens come from
//! `session` and only their hash reaches the store.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use time::OffsetDateTime;
use tracing::info;

use crate::frame::ErrorCode;
use crate::services::session;
use crate::state::AppState;
use crate::store::{NewUser, StoreError, User};

const MAX_FIELD_LEN: usize = 255;
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("{0}")]
    Validation(String),
    #[error("invalid login details")]
    InvalidCredentials,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for AccountError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(field) => Self::Validation(format!("the {field} has already been taken")),
            other => Self::Store(other),
        }
    }
}

impl ErrorCode for AccountError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::InvalidCredentials => "E_INVALID_CREDENTIALS",
            Self::Hash(_) => "E_HASH",
            Self::Store(_) => "E_DATABASE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

// =============================================================================
// VALIDATION
// =============================================================================

#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    let (local, domain) = normalized.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') || normalized.chars().any(char::is_whitespace) {
        return None;
    }
    Some(normalized)
}

fn required(field: &str, value: &str) -> Result<String, AccountError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AccountError::Validation(format!("the {field} field is required")));
    }
    if trimmed.chars().count() > MAX_FIELD_LEN {
        return Err(AccountError::Validation(format!(
            "the {field} may not be greater than {MAX_FIELD_LEN} characters"
        )));
    }
    Ok(trimmed.to_owned())
}

fn validate(reg: &Registration) -> Result<NewUser, AccountError> {
    let name = required("name", &reg.name)?;
    let email = required("email", &reg.email)?;
    let email = normalize_email(&email)
        .ok_or_else(|| AccountError::Validation("the email must be a valid email address".into()))?;
    let username = required("username", &reg.username)?;
    if reg.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AccountError::Validation(format!(
            "the password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(NewUser { name, email, username, password_hash: String::new() })
}

// =============================================================================
// PASSWORDS
// =============================================================================

async fn hash_password(password: String) -> Result<String, AccountError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AccountError::Hash(e.to_string()))
    })
    .await
    .map_err(|e| AccountError::Hash(e.to_string()))?
}

async fn verify_password(password: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || {
        PasswordHash::new(&hash)
            .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
            .unwrap_or(false)
    })
    .await
    .unwrap_or(false)
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Now plus `ttl`, clamped to the latest representable timestamp.
fn expiry_after(ttl: std::time::Duration) -> OffsetDateTime {
    let ttl = time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX);
    OffsetDateTime::now_utc().saturating_add(ttl)
}

async fn issue_token(state: &AppState, user_id: i64) -> Result<String, AccountError> {
    let token = session::generate_token();
    let expires_at = expiry_after(state.config.token_ttl);
    state
        .accounts
        .insert_token(&session::hash_token(&token), user_id, expires_at)
        .await?;
    Ok(token)
}

/// Create a user and issue its first bearer token.
///
/// # Errors
///
/// Returns [`AccountError::Validation`] for bad or duplicate fields.
pub async fn register(state: &AppState, reg: Registration) -> Result<(User, String), AccountError> {
    let mut new_user = validate(&reg)?;
    new_user.password_hash = hash_password(reg.password).await?;

    let user = state.accounts.create_user(new_user).await?;
    let token = issue_token(state, user.id).await?;

    info!(user_id = user.id, username = %user.username, "registered user");
    Ok((user, token))
}

/// Authenticate by username or email and issue a bearer token.
///
/// # Errors
///
/// Returns [`AccountError::InvalidCredentials`] if the user is unknown or the
/// password does not match.
pub async fn login(state: &AppState, username_or_email: &str, password: &str) -> Result<(User, String), AccountError> {
    let login = username_or_email.trim();
    if login.is_empty() || password.is_empty() {
        return Err(AccountError::Validation("username_or_email and password are required".into()));
    }

    let Some(user) = state.accounts.find_by_login(login).await? else {
        return Err(AccountError::InvalidCredentials);
    };
    if !verify_password(password.to_owned(), user.password_hash.clone()).await {
        return Err(AccountError::InvalidCredentials);
    }

    let token = issue_token(state, user.id).await?;
    info!(user_id = user.id, "user logged in");
    Ok((user, token))
}

/// Resolve a bearer token to its user, if valid and unexpired.
///
/// # Errors
///
/// Returns a store error if the lookup fails.
pub async fn authenticate(state: &AppState, token: &str) -> Result<Option<User>, AccountError> {
    Ok(state.accounts.user_for_token(&session::hash_token(token)).await?)
}

/// Revoke a bearer token.
///
/// # Errors
///
/// Returns a store error if the delete fails.
pub async fn logout(state: &AppState, token: &str) -> Result<(), AccountError> {
    state.accounts.delete_token(&session::hash_token(token)).await?;
    Ok(())
}

/// Create a one-time WS ticket for the given user.
///
/// # Errors
///
/// Returns a store error if the insert fails.
pub async fn issue_ws_ticket(state: &AppState, user_id: i64) -> Result<String, AccountError> {
    let ticket = session::generate_ws_ticket();
    let expires_at = expiry_after(state.config.ws_ticket_ttl);
    state.accounts.insert_ws_ticket(&ticket, user_id, expires_at).await?;
    Ok(ticket)
}

/// Consume a WS ticket, returning the `user_id` if it was valid.
///
/// # Errors
///
/// Returns a store error if the delete fails.
pub async fn redeem_ws_ticket(state: &AppState, ticket: &str) -> Result<Option<i64>, AccountError> {
    Ok(state.accounts.take_ws_ticket(ticket).await?)
}

#[cfg(test)]
#[path = "account_test.rs"]
mod tests;
