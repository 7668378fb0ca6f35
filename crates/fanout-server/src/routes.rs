//! HTTP routes and handlers

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use fanout_core::{Server, SSE_HEADERS};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    /// Broadcaster fed by the configured event source
    pub server: Arc<Server<Value>>,

    /// Prometheus metrics handle for rendering
    pub metrics_handle: PrometheusHandle,
}

pub fn create_router(state: AppState, events_path: &str) -> Router {
    Router::new()
        .route(events_path, get(stream_events))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/stats", get(stats))
        .fallback(fallback)
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn metrics(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "state": state.server.state(),
        "subscribers": state.server.subscriber_count(),
        "buffer_size": state.server.config().buffer_size,
        "metrics": state.server.metrics().snapshot(),
    }))
}

/// Stream every event published from now on to this client.
///
/// The subscription lives inside the response body. When the client goes
/// away the body is dropped, and with it the subscription.
async fn stream_events(State(state): State<AppState>) -> Result<Response, AppError> {
    let subscription = state.server.subscribe()?;
    debug!(subscriber = %subscription.id(), "Client connected");

    let mut response = Response::new(Body::from_stream(ReaderStream::new(subscription)));
    for (name, value) in SSE_HEADERS {
        response
            .headers_mut()
            .insert(name, HeaderValue::from_static(value));
    }

    Ok(response)
}

async fn fallback() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}

/// Error handling
#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("event stream closed")]
    Unavailable,
    #[error("{0}")]
    Internal(String),
}

impl From<fanout_core::Error> for AppError {
    fn from(err: fanout_core::Error) -> Self {
        match err {
            fanout_core::Error::Closed => AppError::Unavailable,
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!(status = %status, error = %self, "Rejecting event stream request");

        let body = json!({
            "error": {
                "message": self.to_string(),
            }
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn test_state() -> (mpsc::Sender<Value>, AppState) {
        let (tx, rx) = mpsc::channel(16);
        let state = AppState {
            server: Arc::new(Server::new(rx)),
            metrics_handle: PrometheusBuilder::new().build_recorder().handle(),
        };
        (tx, state)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_tx, state) = test_state();
        let app = create_router(state, "/events");

        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_event_stream() {
        let (tx, state) = test_state();
        let server = state.server.clone();
        let app = create_router(state, "/events");
        let broadcast = tokio::spawn(async move { server.start().await });

        let response = app.oneshot(get_request("/events")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        assert_eq!(response.headers()["cache-control"], "no-cache");
        assert_eq!(response.headers()["connection"], "keep-alive");

        tx.send(json!({ "foo": 1 })).await.unwrap();
        tx.send(json!({ "bar": 2 })).await.unwrap();
        tx.send(json!({ "baz": 3 })).await.unwrap();
        drop(tx);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(
            &body[..],
            b"data:{\"foo\":1}\n\ndata:{\"bar\":2}\n\ndata:{\"baz\":3}\n\n"
        );
        assert!(broadcast.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_dropped_body_deregisters() {
        let (_tx, state) = test_state();
        let server = state.server.clone();
        let app = create_router(state, "/events");

        let response = app.oneshot(get_request("/events")).await.unwrap();
        assert_eq!(server.subscriber_count(), 1);

        drop(response);
        assert_eq!(server.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_after_stop_is_unavailable() {
        let (tx, state) = test_state();
        drop(tx);
        state.server.start().await.unwrap();
        let app = create_router(state, "/events");

        let response = app.oneshot(get_request("/events")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let (_tx, state) = test_state();
        let app = create_router(state, "/events");

        let response = app.oneshot(get_request("/stats")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let stats: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats["state"], "ready");
        assert_eq!(stats["subscribers"], 0);
        assert_eq!(stats["buffer_size"], 100);
        assert_eq!(stats["metrics"]["events_received"], 0);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (_tx, state) = test_state();
        let app = create_router(state, "/events");

        let response = app.oneshot(get_request("/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
