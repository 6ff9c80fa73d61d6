//! Application startup and lifecycle management.
//!
//! The engine is driven in-process. The HTTP server carries probes, metrics,
//! the provisioning routes that register nodes and their callback URLs, and
//! the housekeeping routes nodes use to read and prune their stored messages
//! and data.

use crate::config::IdentityConfig;
use crate::handlers::{self, governance, housekeeping, requests};
use crate::services::providers::{CallbackSink, HttpCallbackSink, MockCallbackSink};
use crate::services::{Dispatcher, Governance, RequestEngine};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub engine: RequestEngine,
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application, delivering callbacks over HTTP unless
    /// `MOCK_CALLBACKS` is set.
    pub async fn build(config: IdentityConfig) -> Result<Self, AppError> {
        let governance = Arc::new(Governance::new());

        let sink: Arc<dyn CallbackSink> = if config.dispatcher.mock_callbacks {
            tracing::info!("Callback delivery disabled, using mock callback sink");
            Arc::new(MockCallbackSink::new())
        } else {
            let sink = HttpCallbackSink::new(governance.clone(), config.dispatcher.request_timeout())
                .map_err(AppError::InternalError)?;
            tracing::info!("HTTP callback sink initialized");
            Arc::new(sink)
        };

        Self::build_with_sink(config, governance, sink).await
    }

    /// Build with a caller-provided callback sink.
    pub async fn build_with_sink(
        config: IdentityConfig,
        governance: Arc<Governance>,
        sink: Arc<dyn CallbackSink>,
    ) -> Result<Self, AppError> {
        let dispatcher = Dispatcher::new(sink, config.dispatcher.clone());
        let engine = RequestEngine::new(config.engine.clone(), governance, dispatcher);

        let state = AppState {
            config: config.clone(),
            engine,
        };

        // Port 0 binds a random port for tests
        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", http_addr, e);
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!("Identity service: HTTP on port {}", http_port);

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn engine(&self) -> RequestEngine {
        self.state.engine.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let engine = self.state.engine.clone();
        let router = router(self.state);

        let result = axum::serve(self.http_listener, router).await;
        engine.shutdown().await;
        if let Err(e) = result {
            tracing::error!("HTTP server error: {}", e);
            return Err(std::io::Error::other(format!("HTTP server error: {}", e)));
        }
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route(
            "/utility/private_messages",
            delete(housekeeping::remove_all_private_messages),
        )
        .route(
            "/utility/private_messages/:request_id",
            get(housekeeping::get_private_messages).delete(housekeeping::remove_private_messages),
        )
        .route(
            "/ndid/namespaces",
            post(governance::register_namespace).get(governance::list_namespaces),
        )
        .route("/ndid/nodes", post(governance::register_node))
        .route("/ndid/services", post(governance::register_service))
        .route("/as/:as_id/services", post(governance::register_as_service))
        .route("/node/callback", post(governance::set_callback_url))
        .route("/utility/nodes/:node_id", get(governance::get_node))
        .route("/utility/requests/:request_id", get(requests::get_request))
        .route("/rp/requests/data", delete(housekeeping::remove_all_data))
        .route(
            "/rp/requests/data/:request_id",
            get(housekeeping::get_data).delete(housekeeping::remove_data),
        )
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
