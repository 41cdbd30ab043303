use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::Caller;
use crate::date_utils::{parse_iso_date, today};
use crate::error::{AppError, AppResult};
use crate::services::materializer::TemplateFailure;
use crate::services::scheduler;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateParams {
    /// Defaults to the current UTC date.
    pub as_of: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub generated: usize,
    pub entries: Vec<String>,
    pub date: NaiveDate,
    pub skipped: usize,
    pub failures: Vec<TemplateFailure>,
}

/// Materialize every due recurring template.
pub async fn generate(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<GenerateParams>,
) -> AppResult<Json<GenerateResponse>> {
    let as_of = match params.as_of.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => parse_iso_date(raw).ok_or_else(|| {
            AppError::Validation(format!("Invalid as_of date '{}', expected YYYY-MM-DD", raw))
        })?,
        None => today(),
    };

    match &caller {
        Caller::Scheduler => info!(%as_of, "Scheduler triggered recurring generation"),
        Caller::User(user_id) => {
            info!(%as_of, user_id = %user_id, "User triggered recurring generation")
        }
    }

    let report = scheduler::materialize(&state, as_of).await?;

    Ok(Json(GenerateResponse {
        success: true,
        generated: report.generated_count,
        entries: report.generated_titles,
        date: report.as_of,
        skipped: report.skipped,
        failures: report.failures,
    }))
}
