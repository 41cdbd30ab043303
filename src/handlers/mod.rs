pub mod categories;
pub mod password;
pub mod recurring;
pub mod suggest;
pub mod transactions;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::auth;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    let user_routes = Router::new()
        .route("/api/auth/me", get(auth::me))
        // Transaction CRUD
        .route(
            "/api/transactions",
            get(transactions::list).post(transactions::create),
        )
        .route(
            "/api/transactions/:id",
            get(transactions::show)
                .put(transactions::update)
                .delete(transactions::delete),
        )
        // Category management
        .route(
            "/api/categories",
            get(categories::list).post(categories::create),
        )
        .route("/api/categories/:id", delete(categories::delete))
        .route("/api/suggest-category", post(suggest::suggest_category))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_user,
        ));

    let trigger_routes = Router::new()
        .route("/api/recurring/generate", post(recurring::generate))
        .route_layer(middleware::from_fn_with_state(state, auth::require_caller));

    Router::new()
        // Accounts
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route(
            "/api/check-password-leak",
            post(password::check_password_leak),
        )
        .merge(user_routes)
        .merge(trigger_routes)
        // Health check
        .route("/health", get(health))
}

async fn health() -> &'static str {
    "OK"
}
