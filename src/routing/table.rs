//! The live API route table.
//!
//! # Responsibilities
//! - Build a complete route table from one loaded module, in isolation
//! - Publish it with a single atomic pointer swap
//! - Dispatch API requests against whichever table is current
//!
//! # Design Decisions
//! - Build-then-swap: no request ever observes a half-populated table
//! - Each request pins the table (and through it the module) it started on
//! - Readers never block; the rebuild pipeline is the only writer

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use arc_swap::ArcSwap;
use axum::{body::Body, http::Request, response::Response, Router};
use tower::ServiceExt;

use crate::routing::loader::{LoadError, LoadedModule};
use crate::routing::registrar::RouteRegistrar;

/// A fully populated route table for one backend generation.
#[derive(Debug)]
pub struct RouteTable {
    // Dropped before `module`, which may own the code behind these handlers.
    router: Router,
    routes: Vec<String>,
    generation: u64,
    module: Option<Arc<LoadedModule>>,
}

impl RouteTable {
    /// A table that answers every API path with the JSON not-found response.
    pub fn empty() -> Self {
        let (router, routes) = RouteRegistrar::new().finish();
        Self {
            router,
            routes,
            generation: 0,
            module: None,
        }
    }

    /// Run the module's `register_routes` against a fresh registrar. A panic
    /// during registration is caught on the module's side and reported as
    /// `RegistrationPanicked`.
    pub fn build(module: Arc<LoadedModule>) -> Result<Self, LoadError> {
        let mut registrar = RouteRegistrar::new();
        module
            .register(&mut registrar)
            .map_err(|message| LoadError::RegistrationPanicked {
                generation: module.generation(),
                message,
            })?;

        let (router, routes) = registrar.finish();
        Ok(Self {
            router,
            routes,
            generation: module.generation(),
            module: Some(module),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Registered paths, in registration order.
    pub fn routes(&self) -> &[String] {
        &self.routes
    }

    pub fn module(&self) -> Option<&Arc<LoadedModule>> {
        self.module.as_ref()
    }

    /// Route one request through this table.
    pub async fn dispatch(&self, request: Request<Body>) -> Response {
        match self.router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

/// Shared handle to the current route table.
#[derive(Debug, Clone)]
pub struct LiveRoutes {
    inner: Arc<ArcSwap<RouteTable>>,
}

impl LiveRoutes {
    /// Start with the empty table; startup swaps in the first real one
    /// before the listener opens.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(RouteTable::empty())),
        }
    }

    pub fn current(&self) -> Arc<RouteTable> {
        self.inner.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.inner.load().generation()
    }

    /// Publish `table`, returning the one it replaced.
    pub fn swap(&self, table: RouteTable) -> Arc<RouteTable> {
        self.inner.swap(Arc::new(table))
    }

    /// Tower service dispatching against the current table, for nesting under
    /// the API prefix.
    pub fn api_service(&self) -> ApiService {
        ApiService { live: self.clone() }
    }
}

/// Dispatches each request against the table current at arrival time.
#[derive(Debug, Clone)]
pub struct ApiService {
    live: LiveRoutes,
}

impl tower::Service<Request<Body>> for ApiService {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let table = self.live.current();
        Box::pin(async move { Ok(table.dispatch(request).await) })
    }
}

impl Default for LiveRoutes {
    fn default() -> Self {
        Self::new()
    }
}
