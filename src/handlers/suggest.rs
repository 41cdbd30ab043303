use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::db::queries::{categories, transactions};
use crate::error::{AppError, AppResult};
use crate::services::ai_client;
use crate::state::AppState;

/// Number of recent categorized expenses given to the model as context.
const RECENT_CONTEXT_LIMIT: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct SuggestRequest {
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct SuggestResponse {
    pub suggested_category: Option<String>,
}

pub async fn suggest_category(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(req): Json<SuggestRequest>,
) -> AppResult<Json<SuggestResponse>> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Title is required".into()));
    }

    // The connection goes back to the pool before the provider call.
    let (category_names, recent) = {
        let conn = state.db.get()?;
        (
            categories::list_category_names(&conn, &user_id)?,
            transactions::recent_categorized(&conn, &user_id, RECENT_CONTEXT_LIMIT)?,
        )
    };

    let suggested_category =
        ai_client::suggest_category(&state.config.ai, title, &category_names, &recent).await;

    Ok(Json(SuggestResponse { suggested_category }))
}
