//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Mount the live API route table under the API prefix
//! - Hand every other path to the frontend router (dev session or static)
//! - Wire up middleware (API logging, panic catching, request ID, tracing)
//! - Serve until the shutdown future resolves

use std::future::Future;

use axum::{middleware::from_fn_with_state, Router};
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::config::HotrouteConfig;
use crate::http::middleware::{log_api_requests, ApiLogState};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::response::panic_response;
use crate::routing::{ApiPrefix, LiveRoutes};

/// HTTP front of the dev server.
pub struct HttpServer {
    router: Router,
    prefix: ApiPrefix,
}

impl HttpServer {
    /// `frontend` answers every request outside the API prefix.
    pub fn new(config: &HotrouteConfig, live: LiveRoutes, frontend: Router) -> Self {
        let prefix = ApiPrefix::new(config.server.api_prefix.clone());
        let log_state = ApiLogState::new(prefix.clone(), config.logging.clone());
        let router = Self::build_router(&prefix, live, frontend, log_state);
        Self { router, prefix }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(
        prefix: &ApiPrefix,
        live: LiveRoutes,
        frontend: Router,
        log_state: ApiLogState,
    ) -> Router {
        let routes = Router::new()
            .nest_service(prefix.as_str(), live.api_service())
            .fallback_service(frontend);
        Self::with_middleware(routes, log_state)
    }

    /// Layers, innermost first. The API logger sits outside the panic
    /// catcher so a panicking request is still logged with its 500.
    fn with_middleware(routes: Router, log_state: ApiLogState) -> Router {
        routes
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(from_fn_with_state(log_state, log_api_requests))
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
            .layer(TraceLayer::new_for_http())
    }

    pub fn prefix(&self) -> &ApiPrefix {
        &self.prefix
    }

    /// The assembled router, for driving the server without a socket.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, api_prefix = %self.prefix.as_str(), "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
