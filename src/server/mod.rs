//! Inbound HTTP surface.
//!
//! - [`routes`]: route handlers for the local, DeepSeek and RagFlow endpoints

pub mod routes;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::upstream::Upstream;

/// Application state shared across handlers. Immutable after startup.
pub struct AppState {
    pub config: Arc<Config>,
    pub upstream: Arc<dyn Upstream>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Arc<Config>, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            config,
            upstream,
            start_time: Instant::now(),
        }
    }
}

/// Build the axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = state.config.server.cors_permissive;

    let router = Router::new()
        .route("/ai/chat", get(routes::local_chat))
        .route("/api/deepseek/chat", post(routes::deepseek_chat))
        .route("/api/deepseek/chat/simple", get(routes::deepseek_simple_chat))
        .route("/api/ragflow/chat", post(routes::ragflow_chat))
        .route("/api/ragflow/chat/stream", post(routes::ragflow_chat_stream))
        .route("/health", get(routes::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}
