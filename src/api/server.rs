//! HTTP API server: router assembly and lifecycle.
//!
//! A config struct controls which middleware layers are active; the Axum
//! router is built once at startup, and `start()` binds, logs, and serves.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::controller::RuntimeController;
use crate::store::IngestStore;

use super::routes;

#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
    pub enable_tracing: bool,
}

impl Default for HttpApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: true,
            enable_tracing: true,
        }
    }
}

/// Shared application state handed to every route handler.
pub struct ApiState {
    pub store: Arc<IngestStore>,
    pub controller: Arc<dyn RuntimeController>,
}

pub struct HttpApiServer {
    config: HttpApiConfig,
    state: Arc<ApiState>,
}

impl HttpApiServer {
    pub fn new(config: HttpApiConfig, store: Arc<IngestStore>, controller: Arc<dyn RuntimeController>) -> Self {
        Self {
            config,
            state: Arc::new(ApiState { store, controller }),
        }
    }

    pub fn state(&self) -> Arc<ApiState> {
        self.state.clone()
    }

    pub async fn start(&self) -> std::io::Result<()> {
        let app = self.create_router();
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr).await?;

        tracing::info!(auth_configured = self.state.store.config().auth_token.is_some(), "HTTP API server starting on {}", addr);
        axum::serve(listener, app).await
    }

    fn create_router(&self) -> Router {
        let observer_router = Router::new()
            .route("/observer/tasks", post(routes::submit_task))
            .route("/observer/commands", post(routes::submit_command))
            .route("/observer/arbiter/start", post(routes::arbiter_start))
            .route("/observer/arbiter/stop", post(routes::arbiter_stop))
            .route("/observer/observations", post(routes::submit_observation))
            .route("/observer/status", get(routes::get_status))
            .route("/observer/metrics", get(routes::get_metrics))
            .route("/observer/progress", get(routes::get_progress))
            .route("/observer/events", get(routes::list_events))
            .route("/observer/cot", get(routes::list_chain_of_thought))
            .route("/observer/tasks/:taskId", get(routes::get_task))
            .route("/observer/stream", get(routes::stream_events))
            .layer(middleware::from_fn_with_state(
                self.state.clone(),
                super::middleware::auth_middleware,
            ))
            .layer(middleware::from_fn(super::middleware::security_headers_middleware))
            .layer(middleware::from_fn(super::middleware::logging_middleware))
            .with_state(self.state.clone());

        let mut router = Router::new().merge(observer_router);

        if self.config.enable_tracing {
            router = router.layer(TraceLayer::new_for_http());
        }

        if self.config.enable_cors {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }
}
