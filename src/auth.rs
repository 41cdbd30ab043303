//! Accounts, sessions and request authorization.
//!
//! Passwords are stored as Argon2id hashes. Session tokens are random UUIDs
//! held in a server-side store and presented either as
//! `Authorization: Bearer <token>` or in the `session` cookie. They are
//! invalidated on logout or server restart.
//!
//! The materialization trigger additionally accepts a pre-shared scheduler
//! credential in the bearer position.

use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use subtle::ConstantTimeEq;
use tower_cookies::{Cookie, Cookies};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::queries::users;
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, User};
use crate::services::password_check;
use crate::state::AppState;

/// Cookie name for the session token.
pub const SESSION_COOKIE: &str = "session";

const MIN_PASSWORD_LEN: usize = 8;
const PASSWORD_SPECIAL_CHARS: &str = "!@#$%^&*";

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

/// Who is calling a protected endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    User(String),
    Scheduler,
}

/// Authenticated user id, inserted by [`require_user`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    Missing,
    Invalid,
}

impl AuthFailure {
    fn into_error(self) -> AppError {
        match self {
            Self::Missing => AppError::Unauthorized("Authentication required".into()),
            Self::Invalid => AppError::Unauthorized("Invalid authentication".into()),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn tokens_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Identify the caller from the bearer token, falling back to the session
/// cookie when no bearer token is sent.
pub fn resolve_caller(
    state: &AppState,
    headers: &HeaderMap,
    cookies: &Cookies,
) -> Result<Caller, AuthFailure> {
    if let Some(token) = bearer_token(headers) {
        if let Some(expected) = state.config.scheduler_token.as_deref() {
            if tokens_match(token, expected) {
                return Ok(Caller::Scheduler);
            }
        }
        return state
            .session_user(token)
            .map(Caller::User)
            .ok_or(AuthFailure::Invalid);
    }

    let cookie = cookies.get(SESSION_COOKIE).ok_or(AuthFailure::Missing)?;
    state
        .session_user(cookie.value())
        .map(Caller::User)
        .ok_or(AuthFailure::Invalid)
}

/// Middleware for endpoints that act on a user's own data.
pub async fn require_user(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request,
    next: Next,
) -> Response {
    match resolve_caller(&state, request.headers(), &cookies) {
        Ok(Caller::User(user_id)) => {
            request.extensions_mut().insert(CurrentUser(user_id));
            next.run(request).await
        }
        Ok(Caller::Scheduler) => AuthFailure::Invalid.into_error().into_response(),
        Err(failure) => failure.into_error().into_response(),
    }
}

/// Middleware for endpoints open to users and the trusted scheduler.
pub async fn require_caller(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request,
    next: Next,
) -> Response {
    match resolve_caller(&state, request.headers(), &cookies) {
        Ok(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Err(failure) => {
            warn!(path = %request.uri().path(), ?failure, "Rejected unauthorized request");
            failure.into_error().into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user_id: String,
    pub token: String,
}

pub async fn signup(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(req): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<SessionResponse>)> {
    let email = normalize_email(&req.email)?;
    validate_password_policy(&req.password)?;

    // A lookup outage must not block sign-ups.
    match password_check::is_password_leaked(&state.config.pwned_api_url, &req.password).await {
        Ok(true) => {
            return Err(AppError::Validation(
                "This password has been found in a data breach. Please choose a different password."
                    .into(),
            ))
        }
        Ok(false) => {}
        Err(e) => warn!(error = %e, "Breached password lookup failed, continuing sign-up"),
    }

    let password_hash = hash_password(&req.password)?;
    let user_id = {
        let conn = state.db.get()?;
        if users::get_user_by_email(&conn, &email)?.is_some() {
            return Err(AppError::Conflict(
                "An account with this email already exists".into(),
            ));
        }
        users::create_user(
            &conn,
            &NewUser {
                email,
                full_name: req
                    .full_name
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty()),
                password_hash,
            },
        )
        .map_err(|e| {
            AppError::conflict_on_duplicate(e, "An account with this email already exists")
        })?
    };

    let token = state.start_session(&user_id);
    set_session_cookie(&cookies, &token);
    info!(user_id = %user_id, "User signed up");

    Ok((StatusCode::CREATED, Json(SessionResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<SessionResponse>> {
    let email = req.email.trim().to_lowercase();
    let user = {
        let conn = state.db.get()?;
        users::get_user_by_email(&conn, &email)?
    };

    let Some(user) = user.filter(|u| verify_password(&req.password, &u.password_hash)) else {
        return Err(AppError::Unauthorized("Invalid email or password".into()));
    };

    let token = state.start_session(&user.id);
    set_session_cookie(&cookies, &token);
    info!(user_id = %user.id, "User logged in");

    Ok(Json(SessionResponse {
        user_id: user.id,
        token,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
) -> StatusCode {
    if let Some(token) = bearer_token(&headers) {
        state.end_session(token);
    }
    if let Some(session_cookie) = cookies.get(SESSION_COOKIE) {
        state.end_session(session_cookie.value());
    }

    let cookie = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .build();
    cookies.remove(cookie);

    StatusCode::NO_CONTENT
}

/// The signed-in user's account.
pub async fn me(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> AppResult<Json<User>> {
    let conn = state.db.get()?;
    users::get_user(&conn, &user_id)?
        .map(Json)
        .ok_or_else(|| AppError::Unauthorized("Invalid authentication".into()))
}

fn set_session_cookie(cookies: &Cookies, token: &str) {
    let cookie = Cookie::build((SESSION_COOKIE, token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(tower_cookies::cookie::SameSite::Strict)
        .build();
    cookies.add(cookie);
}

fn normalize_email(email: &str) -> AppResult<String> {
    let email = email.trim().to_lowercase();
    if EMAIL_RE.is_match(&email) {
        Ok(email)
    } else {
        Err(AppError::Validation("A valid email address is required".into()))
    }
}

pub fn validate_password_policy(password: &str) -> AppResult<()> {
    let problem = if password.chars().count() < MIN_PASSWORD_LEN {
        Some("Password must be at least 8 characters")
    } else if !password.chars().any(|c| c.is_ascii_uppercase()) {
        Some("Password must contain an uppercase letter")
    } else if !password.chars().any(|c| c.is_ascii_lowercase()) {
        Some("Password must contain a lowercase letter")
    } else if !password.chars().any(|c| c.is_ascii_digit()) {
        Some("Password must contain a number")
    } else if !password.chars().any(|c| PASSWORD_SPECIAL_CHARS.contains(c)) {
        Some("Password must contain a special character (!@#$%^&*)")
    } else {
        None
    };

    match problem {
        Some(msg) => Err(AppError::Validation(msg.into())),
        None => Ok(()),
    }
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| AppError::Internal(format!("Failed to build password salt: {}", e)))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against an Argon2 hash.
fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        tracing::error!("Invalid password hash format in users table");
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}
