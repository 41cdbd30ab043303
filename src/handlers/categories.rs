use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::auth::CurrentUser;
use crate::db::queries::categories;
use crate::error::{AppError, AppResult};
use crate::models::{Category, NewCategory};
use crate::state::AppState;

const MAX_NAME_LEN: usize = 50;

pub async fn list(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> AppResult<Json<Vec<Category>>> {
    let conn = state.db.get()?;
    Ok(Json(categories::list_categories(&conn, &user_id)?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(new): Json<NewCategory>,
) -> AppResult<(StatusCode, Json<Category>)> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Category name is required".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::Validation(format!(
            "Category name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }

    let conn = state.db.get()?;
    if categories::category_exists(&conn, &user_id, name)? {
        return Err(AppError::Conflict(format!(
            "Category '{}' already exists",
            name
        )));
    }

    let id = categories::create_category(&conn, &user_id, name).map_err(|e| {
        AppError::conflict_on_duplicate(e, format!("Category '{}' already exists", name))
    })?;
    let category = categories::list_categories(&conn, &user_id)?
        .into_iter()
        .find(|c| c.id == id)
        .ok_or_else(|| AppError::Internal(format!("Category {} vanished after insert", id)))?;

    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    let conn = state.db.get()?;
    if categories::delete_category(&conn, &user_id, id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Category {} not found", id)))
    }
}
