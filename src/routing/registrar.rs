//! The surface a backend plugin registers its routes against.
//!
//! A backend artifact exports two C-ABI symbols, both generated by
//! [`export_routes!`](crate::export_routes):
//!
//! ```ignore
//! #[no_mangle]
//! pub extern "C" fn hotroute_plugin_manifest() -> hotroute::routing::PluginManifest { .. }
//!
//! #[no_mangle]
//! pub extern "C" fn register_routes(
//!     routes: &mut hotroute::RouteRegistrar,
//! ) -> abi_stable::std_types::ROption<abi_stable::std_types::RString> { .. }
//! ```
//!
//! Paths are relative to the API prefix (`/hello` is served at `/api/hello`).
//!
//! The plugin links its own copy of this crate, tokio and std. Code that
//! must run on the plugin's side of the boundary (catching panics, entering
//! the host runtime) therefore lives in functions the plugin itself calls:
//! [`run_registration`] and the layer it installs.

use std::any::Any;
use std::convert::Infallible;
use std::future::Future;
use std::mem::size_of;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use abi_stable::std_types::RStr;
use abi_stable::StableAbi;
use axum::{
    extract::Request,
    handler::Handler,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{MethodRouter, Route},
    Json, Router,
};
use tokio::runtime::Handle;
use tower::{Layer, Service};

use crate::http::response::panic_response;

#[doc(hidden)]
pub use abi_stable::std_types::{ROption, RString};

/// Name of the registration symbol every backend artifact must export.
pub const REGISTER_ROUTES_SYMBOL: &str = "register_routes";

/// Name of the manifest symbol checked before registration runs.
pub const PLUGIN_MANIFEST_SYMBOL: &str = "hotroute_plugin_manifest";

/// Bumped whenever the exported symbols change shape.
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// Signature of the exported registration entry point. `RSome` carries the
/// message of a panic caught inside the plugin.
pub type RegisterRoutesFn = extern "C" fn(&mut RouteRegistrar) -> ROption<RString>;

/// Signature of the exported manifest.
pub type PluginManifestFn = extern "C" fn() -> PluginManifest;

/// Build identity of a plugin, compared against the host's before any Rust
/// type crosses the boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, StableAbi)]
pub struct PluginManifest {
    pub struct_size: u32,
    pub abi_version: u32,
    pub hotroute_version: RStr<'static>,
    pub rustc_version: RStr<'static>,
}

impl PluginManifest {
    /// The manifest of the code calling this (host or plugin).
    pub fn current() -> Self {
        Self {
            struct_size: size_of::<PluginManifest>() as u32,
            abi_version: PLUGIN_ABI_VERSION,
            hotroute_version: RStr::from_str(env!("CARGO_PKG_VERSION")),
            rustc_version: RStr::from_str(env!("HOTROUTE_RUSTC_VERSION")),
        }
    }

    /// Why a plugin with this manifest cannot be loaded by `host`, if it
    /// cannot.
    pub fn incompatibility(&self, host: &PluginManifest) -> Option<String> {
        if self.abi_version != host.abi_version {
            return Some(format!(
                "plugin ABI {} does not match host ABI {}",
                self.abi_version, host.abi_version
            ));
        }
        if self.struct_size < host.struct_size {
            return Some(format!(
                "plugin manifest is {} bytes, host expects {}",
                self.struct_size, host.struct_size
            ));
        }
        if self.hotroute_version != host.hotroute_version {
            return Some(format!(
                "plugin built against hotroute {}, host is {}",
                self.hotroute_version, host.hotroute_version
            ));
        }
        if self.rustc_version != host.rustc_version {
            return Some(format!(
                "plugin built with {}, host with {}",
                self.rustc_version, host.rustc_version
            ));
        }
        None
    }
}

/// Collects the routes of one backend generation.
#[derive(Debug)]
pub struct RouteRegistrar {
    router: Router,
    routes: Vec<String>,
    has_fallback: bool,
    runtime: Option<Handle>,
}

impl Default for RouteRegistrar {
    fn default() -> Self {
        Self {
            router: Router::new(),
            routes: Vec::new(),
            has_fallback: false,
            runtime: Handle::try_current().ok(),
        }
    }
}

impl RouteRegistrar {
    /// A registrar bound to the calling tokio runtime, if any. Plugin
    /// handlers run inside that runtime's context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `method_router` at `path`.
    pub fn route(&mut self, path: &str, method_router: MethodRouter) -> &mut Self {
        let router = std::mem::take(&mut self.router);
        self.router = router.route(path, method_router);
        self.routes.push(path.to_string());
        self
    }

    /// Terminal handler for API paths no route matched.
    pub fn fallback<H, T>(&mut self, handler: H) -> &mut Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let router = std::mem::take(&mut self.router);
        self.router = router.fallback(handler);
        self.has_fallback = true;
        self
    }

    /// Drop everything registered so far.
    pub fn clear(&mut self) {
        let runtime = self.runtime.take();
        *self = Self {
            runtime,
            ..Self::default()
        };
    }

    /// Paths registered so far, in registration order.
    pub fn routes(&self) -> &[String] {
        &self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn runtime(&self) -> Option<&Handle> {
        self.runtime.as_ref()
    }

    /// Wrap every handler registered so far in the plugin boundary.
    fn seal(&mut self) {
        let router = std::mem::take(&mut self.router);
        self.router = router.layer(PluginBoundaryLayer {
            runtime: self.runtime.clone(),
        });
    }

    /// Finish registration, installing the JSON not-found handler unless the
    /// module supplied its own fallback.
    pub(crate) fn finish(self) -> (Router, Vec<String>) {
        let router = if self.has_fallback {
            self.router
        } else {
            self.router.fallback(not_found)
        };
        (router, self.routes)
    }
}

/// Run a module's registration function and seal its handlers.
///
/// Must be called from the module's own code so the panic is caught by the
/// same runtime that raised it. Returns the panic message on failure; the
/// registrar is then in an unspecified state and must be discarded.
#[doc(hidden)]
pub fn run_registration<F>(registrar: &mut RouteRegistrar, register: F) -> ROption<RString>
where
    F: FnOnce(&mut RouteRegistrar),
{
    match catch_unwind(AssertUnwindSafe(|| register(registrar))) {
        Ok(()) => {
            registrar.seal();
            ROption::RNone
        }
        Err(panic) => ROption::RSome(RString::from(panic_message(panic.as_ref()))),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Enters the host runtime around every handler poll and turns handler
/// panics into 500 responses before they unwind out of the plugin.
#[derive(Debug, Clone)]
struct PluginBoundaryLayer {
    runtime: Option<Handle>,
}

impl Layer<Route> for PluginBoundaryLayer {
    type Service = PluginBoundary;

    fn layer(&self, inner: Route) -> Self::Service {
        PluginBoundary {
            inner,
            runtime: self.runtime.clone(),
        }
    }
}

#[derive(Clone)]
struct PluginBoundary {
    inner: Route,
    runtime: Option<Handle>,
}

type BoxResponseFuture = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

impl Service<Request> for PluginBoundary {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxResponseFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Service::<Request>::poll_ready(&mut self.inner, cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let _runtime = self.runtime.as_ref().map(Handle::enter);
        match catch_unwind(AssertUnwindSafe(|| self.inner.call(request))) {
            Ok(future) => Box::pin(BoundaryFuture {
                inner: Box::pin(future),
                runtime: self.runtime.clone(),
            }),
            Err(panic) => Box::pin(std::future::ready(Ok(panic_response(panic)))),
        }
    }
}

struct BoundaryFuture<F> {
    inner: Pin<Box<F>>,
    runtime: Option<Handle>,
}

impl<F> Future for BoundaryFuture<F>
where
    F: Future<Output = Result<Response, Infallible>>,
{
    type Output = Result<Response, Infallible>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _runtime = this.runtime.as_ref().map(Handle::enter);
        let inner = &mut this.inner;
        match catch_unwind(AssertUnwindSafe(|| inner.as_mut().poll(cx))) {
            Ok(poll) => poll,
            Err(panic) => Poll::Ready(Ok(panic_response(panic))),
        }
    }
}

/// Catch-all for unmatched API paths.
pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "message": "API route not found" })),
    )
        .into_response()
}

/// Generate the exports of a backend crate.
///
/// ```ignore
/// fn routes(r: &mut hotroute::RouteRegistrar) {
///     r.route("/hello", axum::routing::get(hello));
/// }
/// hotroute::export_routes!(routes);
/// ```
#[macro_export]
macro_rules! export_routes {
    ($register:path) => {
        #[no_mangle]
        pub extern "C" fn hotroute_plugin_manifest() -> $crate::routing::PluginManifest {
            $crate::routing::PluginManifest::current()
        }

        #[no_mangle]
        pub extern "C" fn register_routes(
            registrar: &mut $crate::RouteRegistrar,
        ) -> $crate::routing::registrar::ROption<$crate::routing::registrar::RString> {
            let register: fn(&mut $crate::RouteRegistrar) = $register;
            $crate::routing::registrar::run_registration(registrar, register)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_routes_and_default_fallback() {
        let mut registrar = RouteRegistrar::new();
        registrar.route("/hello", get(|| async { "hi" }));
        assert_eq!(registrar.routes(), ["/hello".to_string()]);

        let (router, routes) = registrar.finish();
        assert_eq!(routes.len(), 1);

        let response = router
            .clone()
            .oneshot(Request::get("/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["message"], "API route not found");
    }

    #[tokio::test]
    async fn test_custom_fallback_is_kept() {
        let mut registrar = RouteRegistrar::new();
        registrar.fallback(|| async { (StatusCode::GONE, "gone") });

        let (router, _) = registrar.finish();
        let response = router
            .oneshot(Request::get("/anything").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[test]
    fn test_clear() {
        let mut registrar = RouteRegistrar::new();
        registrar.route("/a", get(|| async { "a" }));
        registrar.clear();
        assert!(registrar.is_empty());
    }

    mod exported {
        fn routes(registrar: &mut crate::RouteRegistrar) {
            registrar.route("/exported", axum::routing::get(|| async { "ok" }));
        }

        crate::export_routes!(routes);
    }

    #[test]
    fn test_export_routes_macro() {
        let register: RegisterRoutesFn = exported::register_routes;
        let mut registrar = RouteRegistrar::new();
        assert_eq!(register(&mut registrar), ROption::RNone);
        assert_eq!(registrar.routes(), ["/exported".to_string()]);

        let manifest: PluginManifestFn = exported::hotroute_plugin_manifest;
        assert_eq!(manifest(), PluginManifest::current());
    }

    #[test]
    fn test_registration_panic_is_caught() {
        let mut registrar = RouteRegistrar::new();
        let outcome = run_registration(&mut registrar, |r| {
            r.route("/dup", get(|| async { "a" }));
            r.route("/dup", get(|| async { "b" }));
        });

        match outcome {
            ROption::RSome(message) => assert!(!message.is_empty()),
            ROption::RNone => panic!("duplicate route was accepted"),
        }
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_500() {
        let mut registrar = RouteRegistrar::new();
        assert!(registrar.runtime().is_some());
        let outcome = run_registration(&mut registrar, |r| {
            r.route(
                "/boom",
                get(|| async {
                    if true {
                        panic!("handler blew up");
                    }
                    "unreachable"
                }),
            );
        });
        assert_eq!(outcome, ROption::RNone);

        let (router, _) = registrar.finish();
        let response = router
            .oneshot(Request::get("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["message"], "Internal Server Error");
    }

    #[tokio::test]
    async fn test_sealed_handlers_see_the_runtime() {
        let mut registrar = RouteRegistrar::new();
        run_registration(&mut registrar, |r| {
            r.route(
                "/sleepy",
                get(|| async {
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                    "slept"
                }),
            );
        });

        let (router, _) = registrar.finish();
        let response = router
            .oneshot(Request::get("/sleepy").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_registrar_outside_runtime() {
        assert!(RouteRegistrar::new().runtime().is_none());
    }

    #[test]
    fn test_manifest_compatibility() {
        let host = PluginManifest::current();
        assert_eq!(host.incompatibility(&host), None);

        let older = PluginManifest {
            hotroute_version: RStr::from_str("0.0.1"),
            ..host
        };
        assert!(older.incompatibility(&host).unwrap().contains("hotroute 0.0.1"));

        let other_abi = PluginManifest {
            abi_version: PLUGIN_ABI_VERSION + 1,
            ..host
        };
        assert!(other_abi.incompatibility(&host).unwrap().contains("ABI"));

        let other_rustc = PluginManifest {
            rustc_version: RStr::from_str("rustc 0.1.0"),
            ..host
        };
        assert!(other_rustc.incompatibility(&host).is_some());
    }
}
