//! Axum router configuration with middleware.
//!
//! REST routes live under `/api/v1/`; the relay WebSocket is mounted at
//! `/plugin_generator`. WebSocket handshakes on any other path are accepted
//! and closed with "Invalid WebSocket path"; plain HTTP requests to unknown
//! paths get a 404 envelope.

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route(
            "/plugin/plugin-generator",
            post(handlers::plugin_generator::create_plugin_generator),
        )
        .route(
            "/plugin/plugin-generator/chat-history",
            get(handlers::plugin_generator::get_chat_history),
        )
        .route(
            "/plugin/plugin-generator/message",
            post(handlers::plugin_generator::save_message),
        )
        .route(
            "/plugin/plugin-generator/save-plugin",
            post(handlers::plugin_generator::save_plugin),
        )
        .route(
            "/plugin/plugin-generators",
            get(handlers::plugin_generator::list_plugin_generators),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/plugin_generator", get(handlers::relay_ws::relay_ws_handler))
        .route("/health", get(health_check))
        .fallback(fallback)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint (no auth required).
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn fallback(ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>) -> Response {
    match ws {
        Ok(ws) => handlers::relay_ws::invalid_path_handler(ws).await,
        Err(_) => {
            let body = serde_json::json!({
                "data": null,
                "meta": {
                    "request_id": uuid::Uuid::now_v7().to_string(),
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                    "response_time_ms": 0
                },
                "errors": [{ "code": "NOT_FOUND", "message": "Route not found" }]
            });
            (StatusCode::NOT_FOUND, axum::Json(body)).into_response()
        }
    }
}
