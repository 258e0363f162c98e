//! HTTP surface: readings query/insert, test data, stream stats and the
//! WebSocket stream itself.

mod auth;
mod readings;
mod ws;

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use log::error;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::db::{helpers::format_datetime, Database};
use crate::metrics::MetricsSnapshot;
use crate::stream::StreamManager;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub streams: StreamManager,
    pub api_token: Arc<str>,
    /// Row count returned by the readings listing when no `limit` is given.
    pub recent_limit: usize,
}

impl AppState {
    pub fn new(
        db: Database,
        streams: StreamManager,
        api_token: impl Into<Arc<str>>,
        recent_limit: usize,
    ) -> Self {
        Self {
            db,
            streams,
            api_token: api_token.into(),
            recent_limit,
        }
    }
}

/// Error body returned by every handler: `{ "error": message }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Request failed: {err:#}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/api/temperatures",
            get(readings::list_readings).post(readings::create_reading),
        )
        .route("/api/generate-test-data", post(readings::generate_test_data))
        .route("/api/stream/stats", get(stream_stats))
        .route("/ws", get(ws::stream_readings))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    Router::new()
        .route("/", get(root_info))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root_info() -> Json<Value> {
    Json(json!({
        "message": "Temperature readings API",
        "timestamp": format_datetime(&Utc::now()),
        "endpoints": {
            "GET /api/temperatures": "most recent readings, newest first (?limit=N)",
            "POST /api/temperatures": "store a reading: { temperature, device }",
            "POST /api/generate-test-data": "store 20 synthetic readings from the last week",
            "GET /api/stream/stats": "stream session statistics",
            "GET /ws": "WebSocket stream: stored readings replayed, then live readings",
        }
    }))
}

async fn stream_stats(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.streams.metrics_snapshot().await)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::metrics::StreamMetrics;
    use crate::stream::SessionConfig;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tempfile::TempDir;

    pub const TOKEN: &str = "test-token";

    pub fn test_state() -> (AppState, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("readings.sqlite3")).unwrap();
        let streams = StreamManager::new(
            Arc::new(db.clone()),
            SessionConfig::default(),
            StreamMetrics::new(),
        );
        (AppState::new(db, streams, TOKEN, 50), dir)
    }

    pub fn authorized(method: &str, uri: &str, body: Option<Value>) -> axum::http::Request<Body> {
        let builder = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {TOKEN}"));
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    pub async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }
}
