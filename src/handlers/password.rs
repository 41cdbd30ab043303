use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::services::password_check;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PasswordLeakRequest {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct PasswordLeakResponse {
    pub is_leaked: bool,
}

pub async fn check_password_leak(
    State(state): State<AppState>,
    Json(req): Json<PasswordLeakRequest>,
) -> AppResult<Json<PasswordLeakResponse>> {
    if req.password.is_empty() {
        return Err(AppError::Validation("Password is required".into()));
    }

    let is_leaked =
        password_check::is_password_leaked(&state.config.pwned_api_url, &req.password).await?;

    Ok(Json(PasswordLeakResponse { is_leaked }))
}
