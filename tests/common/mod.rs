use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use deeptracy::server::{AppState, create_router};
use deeptracy::store::{SqliteStore, Store};
use serde_json::Value;
use tower::ServiceExt;

/// The full router over a fresh in-memory catalog, driven without a socket.
pub struct TestApp {
    pub store: Arc<SqliteStore>,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(SqliteStore::in_memory().expect("open store"));
        store.initialize().expect("apply migrations");
        let router = create_router(Arc::new(AppState::new(store.clone())));
        Self { store, router }
    }

    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("route request");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body)).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    pub async fn start_analysis(&self, repo: &str, commit: &str) -> String {
        let (status, body) = self
            .post(
                "/analysis/",
                serde_json::json!({"repo": repo, "commit": commit, "notify": "http://hooks/x"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "start analysis: {body}");
        body["id"].as_str().expect("analysis id").to_string()
    }

    pub fn count(&self, table: &str) -> i64 {
        self.store
            .connection()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .expect("count rows")
    }
}
