//! Observer Core: ingestion, redaction, durable persistence, live
//! streaming, and a control surface over an agent orchestration runtime.

pub mod api;
pub mod broadcast;
pub mod config;
pub mod controller;
pub mod cursor;
pub mod error;
pub mod metrics_file;
pub mod redact;
pub mod store;
pub mod types;
pub mod writer;

use std::sync::Arc;

use api::{HttpApiConfig, HttpApiServer};
use broadcast::{spawn_heartbeat, Broadcaster};
use config::ObserverConfig;
use controller::{NullRuntimeController, RuntimeController};
use error::ObserverResult;
use store::IngestStore;

/// Top-level handle wiring the ingest store, broadcaster, heartbeat timer,
/// and HTTP server together. Owns the shutdown sequence.
pub struct Observer {
    store: Arc<IngestStore>,
    heartbeat: tokio::task::JoinHandle<()>,
    http: HttpApiServer,
}

impl Observer {
    /// Assemble the observer core from configuration and an optional
    /// runtime controller, falling back to `NullRuntimeController` when
    /// none is supplied.
    pub fn new(
        config: ObserverConfig,
        http_config: HttpApiConfig,
        controller: Option<Arc<dyn RuntimeController>>,
    ) -> ObserverResult<Self> {
        let broadcaster = Arc::new(Broadcaster::new(config.max_clients));
        let heartbeat_interval_ms = config.heartbeat_interval_ms;

        let store = Arc::new(IngestStore::new(config, broadcaster.clone())?);
        let heartbeat = spawn_heartbeat(broadcaster, heartbeat_interval_ms);
        let controller = controller.unwrap_or_else(|| Arc::new(NullRuntimeController));
        let http = HttpApiServer::new(http_config, store.clone(), controller);

        Ok(Self { store, heartbeat, http })
    }

    pub fn store(&self) -> Arc<IngestStore> {
        self.store.clone()
    }

    /// Run the HTTP server until it exits or `shutdown_signal` resolves,
    /// e.g. wired to `ctrl_c` for graceful shutdown.
    pub async fn run_until(&self, shutdown_signal: impl std::future::Future<Output = ()>) -> std::io::Result<()> {
        tokio::select! {
            result = self.http.start() => result,
            _ = shutdown_signal => Ok(()),
        }
    }

    /// Drain persistence, stop the heartbeat timer, and close every
    /// subscriber.
    pub async fn shutdown(self) {
        let Observer { store, heartbeat, http } = self;
        heartbeat.abort();
        // The HTTP server's `ApiState` holds its own clone of `store`; drop
        // it first so the `Arc` below is uniquely held once the server has
        // stopped accepting new work.
        drop(http);
        if let Ok(store) = Arc::try_unwrap(store) {
            store.shutdown().await;
        }
    }
}
