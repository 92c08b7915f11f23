//! API request logging middleware.
//!
//! Logs one line per request under the API prefix:
//!
//! ```text
//! POST /api/users 201 in 3ms :: query=page=2 body={"name":"ada"} :: {"id":7,"name":"ada"}
//! ```
//!
//! The middleware is purely diagnostic; the response it passes on carries the
//! same status, headers and bytes the handler produced.

use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use futures_util::{stream, StreamExt};

use crate::config::LoggingConfig;
use crate::observability::metrics;
use crate::routing::ApiPrefix;

const ELLIPSIS: char = '…';

/// State for [`log_api_requests`].
#[derive(Debug, Clone)]
pub struct ApiLogState {
    pub prefix: ApiPrefix,
    pub config: LoggingConfig,
}

impl ApiLogState {
    pub fn new(prefix: ApiPrefix, config: LoggingConfig) -> Self {
        Self { prefix, config }
    }
}

/// Everything captured about one API request.
#[derive(Debug, Clone, Default)]
pub struct ApiLogRecord {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub duration: Duration,
    pub query: Option<String>,
    pub request_body: Option<Bytes>,
    pub response_body: Option<Bytes>,
}

pub async fn log_api_requests(
    State(state): State<ApiLogState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.prefix.matches(request.uri().path()) {
        return next.run(request).await;
    }

    let started = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);

    let (request, request_body) =
        capture_request_body(request, state.config.max_body_capture_bytes).await;
    let response = next.run(request).await;
    let status = response.status().as_u16();
    let (response, response_body) = capture_json_response(response).await;

    metrics::record_api_request(&method, status, started);

    let record = ApiLogRecord {
        method,
        path,
        status,
        duration: started.elapsed(),
        query,
        request_body,
        response_body,
    };
    tracing::info!(target: "hotroute::api", "{}", compose_log_line(&record, &state.config));

    response
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Buffer the request body when its declared length fits within `limit`.
/// Bodies without a `Content-Length` (streams) pass through untouched.
/// The server enforces the declared length, so this never reads past it.
async fn capture_request_body(request: Request, limit: usize) -> (Request, Option<Bytes>) {
    match content_length(request.headers()) {
        Some(len) if len > 0 && len <= limit => {}
        _ => return (request, None),
    }

    let (parts, body) = request.into_parts();
    match buffer_body(body).await {
        Ok(bytes) => (
            Request::from_parts(parts, Body::from(bytes.clone())),
            Some(bytes),
        ),
        Err(replay) => (Request::from_parts(parts, replay), None),
    }
}

/// Read `body` to the end.
///
/// On a stream error the caller gets back a body that yields the chunks
/// already read and then fails the same way, so whoever consumes it next
/// sees exactly what they would have seen without the logger.
async fn buffer_body(body: Body) -> Result<Bytes, Body> {
    let mut data = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    while let Some(chunk) = data.next().await {
        match chunk {
            Ok(chunk) => chunks.push(chunk),
            Err(e) => {
                tracing::warn!(error = %e, "Body failed while buffering for logging");
                let replay = chunks.into_iter().map(Ok).chain(std::iter::once(Err(e)));
                return Err(Body::from_stream(stream::iter(replay)));
            }
        }
    }
    Ok(Bytes::from(chunks.concat()))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false)
}

/// Buffer JSON responses and rebuild them from the same bytes.
async fn capture_json_response(response: Response) -> (Response, Option<Bytes>) {
    if !is_json(response.headers()) {
        return (response, None);
    }

    let (parts, body) = response.into_parts();
    match buffer_body(body).await {
        Ok(bytes) => (
            Response::from_parts(parts, Body::from(bytes.clone())),
            Some(bytes),
        ),
        Err(replay) => (Response::from_parts(parts, replay), None),
    }
}

/// Cut `s` to at most `max` characters, ending in `…` when shortened.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out: String = s.chars().take(max - 1).collect();
    out.push(ELLIPSIS);
    out
}

/// Compact JSON bodies onto one line; anything else is shown lossily.
fn render_body(bytes: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(value) => value.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).replace('\n', " "),
    }
}

pub fn compose_log_line(record: &ApiLogRecord, config: &LoggingConfig) -> String {
    let mut line = format!(
        "{} {} {} in {}ms",
        record.method,
        record.path,
        record.status,
        record.duration.as_millis()
    );

    let mut request = Vec::new();
    if let Some(query) = &record.query {
        request.push(format!("query={}", query));
    }
    if let Some(body) = &record.request_body {
        request.push(format!("body={}", render_body(body)));
    }
    if !request.is_empty() {
        line.push_str(" :: ");
        line.push_str(&request.join(" "));
    }

    if let Some(body) = &record.response_body {
        line.push_str(" :: ");
        line.push_str(&truncate_chars(
            &render_body(body),
            config.response_snippet_chars,
        ));
    }

    truncate_chars(&line, config.max_line_chars)
}
