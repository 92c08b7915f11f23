//! Development asset server.
//!
//! # Responsibilities
//! - Serve client assets from the client root with caching disabled
//! - Render HTML templates fresh from disk on every request
//! - Push reload notifications to open pages over SSE
//! - Keep at most one dev session attached
//!
//! # Design Decisions
//! - The template is never cached; edits show up on the next request
//! - Unknown GET paths render the index template (SPA routing)
//! - Attaching a session closes the previous one first

use std::convert::Infallible;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Router,
};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tower::ServiceExt;
use tower_http::services::ServeDir;
use uuid::Uuid;

use crate::assets::transform::{HtmlPipeline, TransformError, RELOAD_CLIENT_PATH};
use crate::config::FrontendConfig;
use crate::http::response::internal_error;

/// Path of the SSE stream the reload client subscribes to.
pub const EVENTS_PATH: &str = "/__hotroute/events";

const RELOAD_CLIENT: &str = include_str!("reload_client.js");

const EVENT_CAPACITY: usize = 64;

/// Notification pushed to connected pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DevEvent {
    /// A client file changed; `path` is relative to the client root.
    Reload { path: String },
    /// The session was closed; clients should stop listening.
    Closed,
}

/// One attached dev session.
pub struct DevSession {
    id: Uuid,
    root: PathBuf,
    index: PathBuf,
    assets: ServeDir,
    pipeline: HtmlPipeline,
    events: broadcast::Sender<DevEvent>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    closed: AtomicBool,
}

impl DevSession {
    /// Open a session over `config.root`, watching it for changes.
    pub fn open(config: &FrontendConfig) -> notify::Result<Arc<Self>> {
        let root = config.root.clone();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let watcher = watch_client_root(&root, events.clone())?;

        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            index: config.index_path(),
            assets: ServeDir::new(&root),
            pipeline: HtmlPipeline::dev(&config.client_entry),
            root,
            events,
            watcher: Mutex::new(Some(watcher)),
            closed: AtomicBool::new(false),
        });

        tracing::info!(
            session = %session.id,
            root = %session.root.display(),
            "Dev session attached"
        );
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DevEvent> {
        self.events.subscribe()
    }

    /// Stop watching and tell connected pages the session is gone.
    /// Closing twice is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut watcher) = self.watcher.lock() {
            watcher.take();
        }
        let _ = self.events.send(DevEvent::Closed);
        tracing::info!(session = %self.id, "Dev session closed");
    }

    /// Read the template for `url` from disk and run it through the pipeline.
    pub async fn render(&self, url: &str) -> Result<String, TransformError> {
        let template = self.template_for(url);
        let html = tokio::fs::read_to_string(&template)
            .await
            .map_err(|source| TransformError::ReadTemplate {
                path: template.clone(),
                source,
            })?;
        self.pipeline.apply(url, html)
    }

    /// Serve one non-API request.
    pub async fn serve(&self, request: Request<Body>) -> Response {
        let path = request.uri().path().to_string();
        let is_read = matches!(*request.method(), Method::GET | Method::HEAD);

        if is_read && is_html_route(&path) {
            return self.html_response(&path).await;
        }

        let response = match self.assets.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        if is_read && response.status() == StatusCode::NOT_FOUND {
            return self.html_response(&path).await;
        }

        let mut response = response.map(Body::new);
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response
    }

    async fn html_response(&self, url: &str) -> Response {
        match self.render(url).await {
            Ok(html) => (
                [
                    (header::CONTENT_TYPE, "text/html; charset=utf-8"),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                html,
            )
                .into_response(),
            Err(e) => internal_error(&e),
        }
    }

    /// `*.html` paths render their own file when it exists inside the root;
    /// everything else renders the index.
    fn template_for(&self, url: &str) -> PathBuf {
        let relative = Path::new(url.trim_start_matches('/'));
        let inside_root = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

        if url.ends_with(".html") && inside_root {
            let candidate = self.root.join(relative);
            if candidate.is_file() {
                return candidate;
            }
        }
        self.index.clone()
    }
}

impl std::fmt::Debug for DevSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevSession")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for DevSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_html_route(path: &str) -> bool {
    path == "/" || path.ends_with(".html")
}

fn watch_client_root(
    root: &Path,
    events: broadcast::Sender<DevEvent>,
) -> notify::Result<RecommendedWatcher> {
    let given = root.to_path_buf();
    let base = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    return;
                }
                for path in event.paths {
                    // Only components below the client root count as hidden.
                    let relative = path
                        .strip_prefix(&base)
                        .or_else(|_| path.strip_prefix(&given))
                        .unwrap_or_else(|_| path.file_name().map(Path::new).unwrap_or(&path));
                    if is_hidden_or_vendored(relative) {
                        continue;
                    }
                    let _ = events.send(DevEvent::Reload {
                        path: relative.to_string_lossy().into_owned(),
                    });
                }
            }
            Err(e) => tracing::error!("Client watch error: {:?}", e),
        },
        Config::default(),
    )?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

fn is_hidden_or_vendored(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with('.') || name == "node_modules"
        }
        _ => false,
    })
}

/// Holder for the single live dev session.
#[derive(Debug, Clone, Default)]
pub struct DevSessionSlot {
    current: Arc<ArcSwapOption<DevSession>>,
    attach_lock: Arc<Mutex<()>>,
}

impl DevSessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the current session, if any, then open and store a new one.
    pub fn attach(&self, config: &FrontendConfig) -> notify::Result<Arc<DevSession>> {
        let _guard = self
            .attach_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(previous) = self.current.swap(None) {
            tracing::info!(session = %previous.id(), "Replacing dev session");
            previous.close();
        }

        let session = DevSession::open(config)?;
        self.current.store(Some(session.clone()));
        Ok(session)
    }

    pub fn current(&self) -> Option<Arc<DevSession>> {
        self.current.load_full()
    }

    pub fn close(&self) {
        if let Some(session) = self.current.swap(None) {
            session.close();
        }
    }

    /// Routes for everything outside the API prefix in development mode.
    pub fn router(&self) -> Router {
        Router::new()
            .route(EVENTS_PATH, get(events))
            .route(RELOAD_CLIENT_PATH, get(reload_client))
            .fallback(serve_dev)
            .with_state(self.clone())
    }
}

fn no_session() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "No dev session attached").into_response()
}

async fn serve_dev(State(slot): State<DevSessionSlot>, request: Request<Body>) -> Response {
    match slot.current() {
        Some(session) => session.serve(request).await,
        None => no_session(),
    }
}

async fn reload_client() -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/javascript"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        RELOAD_CLIENT,
    )
        .into_response()
}

async fn events(State(slot): State<DevSessionSlot>) -> Response {
    let Some(session) = slot.current() else {
        return no_session();
    };
    let rx = session.subscribe();
    drop(session);

    let stream = futures_util::stream::unfold(Some(rx), |state| async move {
        let mut rx = state?;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let next = if event == DevEvent::Closed { None } else { Some(rx) };
                    match Event::default().json_data(&event) {
                        Ok(sse) => return Some((Ok::<Event, Infallible>(sse), next)),
                        Err(e) => {
                            tracing::warn!(error = %e, "Could not encode dev event");
                            rx = next?;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Dev event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}
