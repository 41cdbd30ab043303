//! Shared test utilities for integration tests.
//!
//! `TestClient` drives the full router (auth middleware included) against a
//! fresh in-memory database. Not every helper is used by every test file.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use spendwise::config::Config;
use spendwise::db::{create_in_memory_pool, create_pool, migrations, DbPool};
use spendwise::models::AiSettings;
use spendwise::server;
use spendwise::state::AppState;
use std::path::{Path, PathBuf};
use tower::ServiceExt;

pub const PASSWORD: &str = "Corr3ct-Horse!";
pub const SCHEDULER_TOKEN: &str = "scheduler-secret-for-tests";

pub struct TestClient {
    pub state: AppState,
}

impl TestClient {
    /// A client with no scheduler token and an unreachable breach API.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_scheduler_token() -> Self {
        Self::with_config(|c| c.scheduler_token = Some(SCHEDULER_TOKEN.into()))
    }

    pub fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let pool = create_in_memory_pool().expect("Failed to create in-memory pool");
        Self::with_pool(pool, customize)
    }

    /// A client over a migrated SQLite file at `path`, shareable with other
    /// pools opened on the same file.
    pub fn on_file(path: &Path) -> Self {
        let pool = create_pool(path).expect("Failed to create file pool");
        Self::with_pool(pool, |_| {})
    }

    fn with_pool(pool: DbPool, customize: impl FnOnce(&mut Config)) -> Self {
        {
            let conn = pool.get().expect("Failed to get connection");
            migrations::run_migrations(&conn, Path::new("migrations"))
                .expect("Failed to run migrations");
        }

        let mut config = Config {
            host: "127.0.0.1".into(),
            port: 7070,
            database_path: PathBuf::from(":memory:"),
            migrations_path: PathBuf::from("migrations"),
            scheduler_token: None,
            materialize_interval: None,
            // Nothing listens on the discard port; lookups fail fast.
            pwned_api_url: "http://127.0.0.1:9".into(),
            ai: AiSettings::default(),
        };
        customize(&mut config);

        Self {
            state: AppState::new(pool, config),
        }
    }

    pub fn router(&self) -> Router {
        server::router(self.state.clone())
    }

    /// Send a request and return the status and the body parsed as JSON
    /// (plain-text bodies come back as a JSON string, empty ones as null).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();

        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    /// Sign up `email` with the default password and return the session token.
    pub async fn signup(&self, email: &str) -> String {
        let (status, body) = self
            .post(
                "/api/auth/signup",
                None,
                json!({ "email": email, "password": PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "signup failed: {}", body);
        body["token"].as_str().unwrap().to_string()
    }

    /// Create a transaction and return its JSON representation.
    pub async fn create_transaction(&self, token: &str, body: Value) -> Value {
        let (status, body) = self.post("/api/transactions", Some(token), body).await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
        body
    }

    /// Create a recurring expense template and return its id.
    pub async fn create_template(
        &self,
        token: &str,
        title: &str,
        amount_cents: i64,
        recurrence: &str,
        date: &str,
    ) -> i64 {
        let body = self
            .create_transaction(
                token,
                json!({
                    "title": title,
                    "amount_cents": amount_cents,
                    "date": date,
                    "is_recurring": true,
                    "recurrence": recurrence,
                    "category_name": "Health",
                }),
            )
            .await;
        body["id"].as_i64().unwrap()
    }

    pub async fn generate(&self, token: Option<&str>, as_of: &str) -> (StatusCode, Value) {
        let uri = format!("/api/recurring/generate?as_of={}", as_of);
        self.request(Method::POST, &uri, token, None).await
    }

    pub async fn transactions(&self, token: &str) -> Vec<Value> {
        let (status, body) = self.get("/api/transactions", Some(token)).await;
        assert_eq!(status, StatusCode::OK);
        body.as_array().unwrap().clone()
    }
}
