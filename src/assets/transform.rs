//! HTML template transforms for the dev asset server.
//!
//! # Responsibilities
//! - Generate cache-busting tokens
//! - Rewrite the client entry script reference
//! - Run the ordered transform pipeline over the raw template
//! - Inject the live-reload client
//!
//! # Design Decisions
//! - Transforms are plain string rewrites; the template is never parsed
//! - A failing transform aborts the render; the caller answers 500

use std::path::PathBuf;

use rand::{distributions::Alphanumeric, Rng};
use thiserror::Error;

/// Length of the `?v=` cache-busting token.
pub const TOKEN_LEN: usize = 8;

/// Path the injected reload client is served from.
pub const RELOAD_CLIENT_PATH: &str = "/__hotroute/client.js";

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("could not read HTML template {}", .path.display())]
    ReadTemplate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTML transform '{stage}' failed: {message}")]
    Transform { stage: &'static str, message: String },
}

/// A fresh random token; two calls yield different values with overwhelming
/// probability.
pub fn cache_bust_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Rewrite every `src="{entry}"` to `src="{entry}?v={token}"`.
///
/// Templates that do not reference the entry are returned unchanged.
pub fn bust_client_entry(html: &str, entry: &str, token: &str) -> String {
    let needle = format!("src=\"{}\"", entry);
    let replacement = format!("src=\"{}?v={}\"", entry, token);
    html.replace(&needle, &replacement)
}

/// One stage of the HTML pipeline.
pub trait HtmlTransform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transform `html` served for request `url`.
    fn apply(&self, url: &str, html: String) -> Result<String, TransformError>;
}

/// Appends the cache-busting query to the client entry on every render.
#[derive(Debug, Clone)]
pub struct CacheBust {
    entry: String,
}

impl CacheBust {
    pub fn new(entry: impl Into<String>) -> Self {
        Self { entry: entry.into() }
    }
}

impl HtmlTransform for CacheBust {
    fn name(&self) -> &'static str {
        "cache-bust"
    }

    fn apply(&self, _url: &str, html: String) -> Result<String, TransformError> {
        Ok(bust_client_entry(&html, &self.entry, &cache_bust_token()))
    }
}

/// Adds the script tag that subscribes the page to reload events.
#[derive(Debug, Clone, Default)]
pub struct ReloadClientInjector;

impl ReloadClientInjector {
    fn tag() -> String {
        format!(
            "<script type=\"module\" src=\"{}\"></script>",
            RELOAD_CLIENT_PATH
        )
    }
}

impl HtmlTransform for ReloadClientInjector {
    fn name(&self) -> &'static str {
        "reload-client"
    }

    fn apply(&self, _url: &str, html: String) -> Result<String, TransformError> {
        if html.contains(RELOAD_CLIENT_PATH) {
            return Ok(html);
        }

        let tag = Self::tag();
        for anchor in ["</head>", "</body>"] {
            if let Some(pos) = html.rfind(anchor) {
                let mut out = String::with_capacity(html.len() + tag.len() + 1);
                out.push_str(&html[..pos]);
                out.push_str(&tag);
                out.push('\n');
                out.push_str(&html[pos..]);
                return Ok(out);
            }
        }

        let mut out = html;
        out.push('\n');
        out.push_str(&tag);
        Ok(out)
    }
}

/// Ordered list of transforms applied to the raw template.
#[derive(Default)]
pub struct HtmlPipeline {
    stages: Vec<Box<dyn HtmlTransform>>,
}

impl HtmlPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The dev server's standard pipeline: cache-bust then reload client.
    pub fn dev(client_entry: &str) -> Self {
        Self::new()
            .with(CacheBust::new(client_entry))
            .with(ReloadClientInjector)
    }

    pub fn with(mut self, stage: impl HtmlTransform + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stages(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn apply(&self, url: &str, html: String) -> Result<String, TransformError> {
        self.stages
            .iter()
            .try_fold(html, |html, stage| stage.apply(url, html))
    }
}

impl std::fmt::Debug for HtmlPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HtmlPipeline")
            .field("stages", &self.stages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"<!doctype html>
<html>
  <head><title>app</title></head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.tsx"></script>
  </body>
</html>"#;

    #[test]
    fn test_token_shape() {
        let token = cache_bust_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_tokens_differ() {
        assert_ne!(cache_bust_token(), cache_bust_token());
    }

    #[test]
    fn test_bust_client_entry() {
        let html = bust_client_entry(TEMPLATE, "/src/main.tsx", "abcd1234");
        assert!(html.contains(r#"src="/src/main.tsx?v=abcd1234""#));
        assert!(!html.contains(r#"src="/src/main.tsx""#));
    }

    #[test]
    fn test_bust_leaves_unrelated_template_alone() {
        let html = "<html><body>static</body></html>";
        assert_eq!(bust_client_entry(html, "/src/main.tsx", "abcd1234"), html);
    }

    #[test]
    fn test_injector_prefers_head() {
        let html = ReloadClientInjector.apply("/", TEMPLATE.to_string()).unwrap();
        let script = html.find(RELOAD_CLIENT_PATH).unwrap();
        assert!(script < html.find("</head>").unwrap());
    }

    #[test]
    fn test_injector_falls_back_to_body_then_append() {
        let html = ReloadClientInjector
            .apply("/", "<body>x</body>".to_string())
            .unwrap();
        assert!(html.find(RELOAD_CLIENT_PATH).unwrap() < html.find("</body>").unwrap());

        let html = ReloadClientInjector.apply("/", "fragment".to_string()).unwrap();
        assert!(html.starts_with("fragment\n<script"));
    }

    #[test]
    fn test_injector_is_idempotent() {
        let once = ReloadClientInjector.apply("/", TEMPLATE.to_string()).unwrap();
        let twice = ReloadClientInjector.apply("/", once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_dev_pipeline() {
        let pipeline = HtmlPipeline::dev("/src/main.tsx");
        assert_eq!(pipeline.stages(), vec!["cache-bust", "reload-client"]);

        let a = pipeline.apply("/", TEMPLATE.to_string()).unwrap();
        let b = pipeline.apply("/", TEMPLATE.to_string()).unwrap();
        assert!(a.contains("/src/main.tsx?v="));
        assert!(a.contains(RELOAD_CLIENT_PATH));
        assert_ne!(a, b);
    }

    struct Failing;

    impl HtmlTransform for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn apply(&self, _url: &str, _html: String) -> Result<String, TransformError> {
            Err(TransformError::Transform {
                stage: "failing",
                message: "boom".to_string(),
            })
        }
    }

    #[test]
    fn test_pipeline_stops_on_error() {
        let pipeline = HtmlPipeline::new().with(Failing).with(ReloadClientInjector);
        let err = pipeline.apply("/", TEMPLATE.to_string()).unwrap_err();
        assert!(matches!(err, TransformError::Transform { stage: "failing", .. }));
    }
}
