//! Error responses.
//!
//! # Responsibilities
//! - Turn unrecoverable request errors into a generic JSON 500
//! - Log the full error chain on the server side
//!
//! # Design Decisions
//! - The client only ever sees `{"message":"Internal Server Error"}`
//! - Handler panics take the same shape through `CatchPanicLayer`

use std::any::Any;
use std::error::Error;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

/// `err` and every `source()` below it, outermost first, joined with `: `.
pub fn error_chain(err: &(dyn Error + 'static)) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

/// Log `err` and answer with an opaque 500.
pub fn internal_error(err: &(dyn Error + 'static)) -> Response {
    tracing::error!(error = %error_chain(err), "Request failed");
    internal_error_response()
}

fn internal_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": INTERNAL_ERROR_MESSAGE })),
    )
        .into_response()
}

/// Panic handler for `CatchPanicLayer`.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else {
        "non-string panic payload"
    };
    tracing::error!(panic = %message, "Handler panicked");

    let mut response = internal_error_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer")]
    struct Outer(#[source] std::io::Error);

    async fn body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_error_chain() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::NotFound, "inner"));
        assert_eq!(error_chain(&err), "outer: inner");
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "secret path"));
        let response = internal_error(&err);

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(response).await, json!({ "message": "Internal Server Error" }));
    }

    #[tokio::test]
    async fn test_panic_response() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(response).await["message"], "Internal Server Error");
    }
}
