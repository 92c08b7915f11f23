//! API prefix matching.
//!
//! # Responsibilities
//! - Normalise the configured API prefix
//! - Decide whether a request path belongs to the backend
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - Matches on segment boundaries: `/api` and `/api/x`, never `/apix`
//! - No regex to guarantee O(n) matching

use axum::body::Body;
use axum::http::Request;

/// The prefix every backend route is mounted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiPrefix {
    prefix: String,
}

impl ApiPrefix {
    /// Create a prefix; a leading slash is added and trailing slashes removed.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        let prefix = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        };
        Self { prefix }
    }

    pub fn as_str(&self) -> &str {
        &self.prefix
    }

    /// Returns true if `path` is the prefix itself or below it.
    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    pub fn matches_request(&self, req: &Request<Body>) -> bool {
        self.matches(req.uri().path())
    }
}

impl Default for ApiPrefix {
    fn default() -> Self {
        Self::new("/api")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalisation() {
        assert_eq!(ApiPrefix::new("api").as_str(), "/api");
        assert_eq!(ApiPrefix::new("/api/").as_str(), "/api");
        assert_eq!(ApiPrefix::new("/v1/api").as_str(), "/v1/api");
    }

    #[test]
    fn test_segment_boundaries() {
        let prefix = ApiPrefix::default();
        assert!(prefix.matches("/api"));
        assert!(prefix.matches("/api/"));
        assert!(prefix.matches("/api/hello"));
        assert!(!prefix.matches("/apix"));
        assert!(!prefix.matches("/"));
        assert!(!prefix.matches("/API/hello"));
    }

    #[test]
    fn test_request_matching() {
        let prefix = ApiPrefix::default();

        let req = Request::builder()
            .uri("http://example.com/api/v1")
            .body(Body::default())
            .unwrap();
        assert!(prefix.matches_request(&req));

        let req = Request::builder()
            .uri("http://example.com/images")
            .body(Body::default())
            .unwrap();
        assert!(!prefix.matches_request(&req));
    }
}
