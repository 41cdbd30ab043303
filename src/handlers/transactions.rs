use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::auth::CurrentUser;
use crate::db::queries::transactions;
use crate::error::{AppError, AppResult};
use crate::models::{Transaction, TransactionInput};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Vec<Transaction>>> {
    let conn = state.db.get()?;
    let limit = params.limit.filter(|l| *l > 0);
    Ok(Json(transactions::list_for_user(&conn, &user_id, limit)?))
}

pub async fn show(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<Json<Transaction>> {
    let conn = state.db.get()?;
    transactions::get_transaction(&conn, &user_id, id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", id)))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(input): Json<TransactionInput>,
) -> AppResult<(StatusCode, Json<Transaction>)> {
    let new = input.into_new(&user_id)?;
    let conn = state.db.get()?;
    let id = transactions::create_transaction(&conn, &new)?;
    let created = transactions::get_transaction(&conn, &user_id, id)?
        .ok_or_else(|| AppError::Internal(format!("Transaction {} vanished after insert", id)))?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(input): Json<TransactionInput>,
) -> AppResult<Json<Transaction>> {
    let new = input.into_new(&user_id)?;
    let conn = state.db.get()?;
    if !transactions::update_transaction(&conn, &user_id, id, &new)? {
        return Err(AppError::NotFound(format!("Transaction {} not found", id)));
    }
    transactions::get_transaction(&conn, &user_id, id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", id)))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    let conn = state.db.get()?;
    if transactions::delete_transaction(&conn, &user_id, id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Transaction {} not found", id)))
    }
}
