//! Mock handler resolution.
//!
//! Handlers are looked up by [`NormalizedKey`] across an ordered list of
//! [`HandlerSource`]s. The outcome of the first lookup for a key, including
//! "not found", is cached for the lifetime of the registry.

use crate::normalize::{normalize, NormalizedKey};
use crate::request::MockRequest;
use crate::template::{TemplateEngine, TemplateError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// File extensions probed by [`DirectoryHandlers`], in order.
const HANDLER_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Failure raised while producing a template descriptor.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("handler file {path} could not be loaded: {reason}")]
    Unloadable { path: PathBuf, reason: String },

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Produces a template descriptor for a request.
pub trait MockHandler: Send + Sync {
    fn respond(&self, request: &MockRequest) -> Result<Value, HandlerError>;
}

impl<F> MockHandler for F
where
    F: Fn(&MockRequest) -> Result<Value, HandlerError> + Send + Sync,
{
    fn respond(&self, request: &MockRequest) -> Result<Value, HandlerError> {
        self(request)
    }
}

/// Handler backed by a static descriptor whose strings are rendered against
/// the request.
pub struct TemplateHandler {
    descriptor: Value,
    engine: Arc<TemplateEngine>,
}

impl TemplateHandler {
    pub fn new(descriptor: Value, engine: Arc<TemplateEngine>) -> Self {
        Self { descriptor, engine }
    }
}

impl MockHandler for TemplateHandler {
    fn respond(&self, request: &MockRequest) -> Result<Value, HandlerError> {
        Ok(self.engine.render_json(&self.descriptor, request)?)
    }
}

/// Handler file that exists but could not be read or parsed.
struct UnloadableHandler {
    path: PathBuf,
    reason: String,
}

impl MockHandler for UnloadableHandler {
    fn respond(&self, _request: &MockRequest) -> Result<Value, HandlerError> {
        Err(HandlerError::Unloadable {
            path: self.path.clone(),
            reason: self.reason.clone(),
        })
    }
}

/// Outcome of resolving a key.
#[derive(Clone)]
pub enum Resolution {
    Found(Arc<dyn MockHandler>),
    NotFound,
}

impl Resolution {
    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Found(_) => f.write_str("Found"),
            Resolution::NotFound => f.write_str("NotFound"),
        }
    }
}

/// A place handlers can be discovered by key.
///
/// Lookups must be idempotent: two concurrent lookups of the same key may
/// both run, and either result may end up cached.
#[async_trait]
pub trait HandlerSource: Send + Sync {
    async fn lookup(&self, key: &NormalizedKey) -> Option<Arc<dyn MockHandler>>;
}

/// In-memory handlers registered at startup.
#[derive(Default)]
pub struct StaticHandlers {
    handlers: HashMap<NormalizedKey, Arc<dyn MockHandler>>,
}

impl StaticHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under the key `path` normalizes to, so
    /// `/api/products/1` and `/api/products/0` are the same registration.
    pub fn with<H: MockHandler + 'static>(mut self, path: &str, handler: H) -> Self {
        self.register(path, handler);
        self
    }

    pub fn register<H: MockHandler + 'static>(&mut self, path: &str, handler: H) {
        let key = normalize(path, &HashMap::new());
        self.handlers.insert(key, Arc::new(handler));
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl HandlerSource for StaticHandlers {
    async fn lookup(&self, key: &NormalizedKey) -> Option<Arc<dyn MockHandler>> {
        self.handlers.get(key).cloned()
    }
}

/// File-backed handlers: key `/api/products/0` is served from
/// `<root>/api/products/0.yaml` (or `.yml` / `.json`).
pub struct DirectoryHandlers {
    root: PathBuf,
    engine: Arc<TemplateEngine>,
}

impl DirectoryHandlers {
    pub fn new(root: impl Into<PathBuf>, engine: Arc<TemplateEngine>) -> Self {
        Self {
            root: root.into(),
            engine,
        }
    }

    fn candidates(&self, key: &NormalizedKey) -> Option<Vec<PathBuf>> {
        let segments: Vec<&str> = key.segments().collect();
        let escapes = segments
            .iter()
            .any(|s| *s == "." || *s == ".." || s.contains('\\') || s.contains(':'));
        if segments.is_empty() || escapes {
            return None;
        }

        let base: PathBuf = segments.iter().collect();
        let base = self.root.join(base).into_os_string();
        Some(
            HANDLER_EXTENSIONS
                .iter()
                .map(|ext| {
                    let mut file = base.clone();
                    file.push(".");
                    file.push(ext);
                    PathBuf::from(file)
                })
                .collect(),
        )
    }

    fn parse(path: &Path, content: &str) -> Result<Value, String> {
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if is_json {
            serde_json::from_str(content).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(content).map_err(|e| e.to_string())
        }
    }
}

#[async_trait]
impl HandlerSource for DirectoryHandlers {
    async fn lookup(&self, key: &NormalizedKey) -> Option<Arc<dyn MockHandler>> {
        let Some(candidates) = self.candidates(key) else {
            debug!(key = %key, "Key cannot map to a handler file");
            return None;
        };

        for path in candidates {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read handler file");
                    return Some(Arc::new(UnloadableHandler {
                        path,
                        reason: e.to_string(),
                    }));
                }
            };

            let handler: Arc<dyn MockHandler> = match Self::parse(&path, &content) {
                Ok(descriptor) => {
                    debug!(path = %path.display(), "Loaded handler file");
                    Arc::new(TemplateHandler::new(descriptor, self.engine.clone()))
                }
                Err(reason) => {
                    warn!(path = %path.display(), error = %reason, "Failed to parse handler file");
                    Arc::new(UnloadableHandler { path, reason })
                }
            };
            return Some(handler);
        }

        None
    }
}

/// Resolves keys to handlers and remembers every outcome.
pub struct HandlerRegistry {
    sources: Vec<Box<dyn HandlerSource>>,
    cache: RwLock<HashMap<NormalizedKey, Resolution>>,
    attempts: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            cache: RwLock::new(HashMap::new()),
            attempts: AtomicU64::new(0),
        }
    }

    /// Append a source. Earlier sources win.
    pub fn with_source<S: HandlerSource + 'static>(mut self, source: S) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Resolve `key`, consulting the sources only on the first call per key.
    ///
    /// The cache lock is not held across the lookup, so concurrent first
    /// resolutions of one key may both reach the sources. The later insert
    /// wins.
    pub async fn resolve(&self, key: &NormalizedKey) -> Resolution {
        if let Some(cached) = self.cache.read().await.get(key).cloned() {
            debug!(key = %key, found = cached.is_found(), "Handler cache hit");
            return cached;
        }

        self.attempts.fetch_add(1, Ordering::Relaxed);

        let mut resolution = Resolution::NotFound;
        for source in &self.sources {
            if let Some(handler) = source.lookup(key).await {
                resolution = Resolution::Found(handler);
                break;
            }
        }

        if !resolution.is_found() {
            warn!(key = %key, "No mock handler configured");
        }

        self.cache
            .write()
            .await
            .insert(key.clone(), resolution.clone());
        resolution
    }

    /// Number of lookups that actually reached the sources.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub async fn cached_keys(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Forget every cached outcome.
    pub async fn reset(&self) {
        self.cache.write().await.clear();
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        inner: StaticHandlers,
        lookups: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl HandlerSource for CountingSource {
        async fn lookup(&self, key: &NormalizedKey) -> Option<Arc<dyn MockHandler>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.inner.lookup(key).await
        }
    }

    fn ok_handler(_: &MockRequest) -> Result<Value, HandlerError> {
        Ok(json!({"result": {"name": "x"}}))
    }

    #[tokio::test]
    async fn test_static_registration_is_normalized() {
        let handlers = StaticHandlers::new().with("/api/products/123", ok_handler);
        assert_eq!(handlers.len(), 1);

        let registry = HandlerRegistry::new().with_source(handlers);
        let resolution = registry.resolve(&NormalizedKey::from("/api/products/0")).await;
        assert!(resolution.is_found());
    }

    #[tokio::test]
    async fn test_not_found_is_cached() {
        let lookups = Arc::new(AtomicUsize::new(0));
        let registry = HandlerRegistry::new().with_source(CountingSource {
            inner: StaticHandlers::new(),
            lookups: lookups.clone(),
        });
        let key = NormalizedKey::from("/api/missing/0");

        assert!(!registry.resolve(&key).await.is_found());
        assert!(!registry.resolve(&key).await.is_found());

        assert_eq!(registry.attempts(), 1);
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
        assert_eq!(registry.cached_keys().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_resolutions_agree() {
        let lookups = Arc::new(AtomicUsize::new(0));
        let registry = HandlerRegistry::new().with_source(CountingSource {
            inner: StaticHandlers::new().with("/api/items/0", ok_handler),
            lookups: lookups.clone(),
        });

        for (cached, path) in [(1, "/api/items/0"), (2, "/api/missing")] {
            let key = NormalizedKey::from(path);
            let (first, second) = tokio::join!(registry.resolve(&key), registry.resolve(&key));
            assert_eq!(first.is_found(), second.is_found());
            assert_eq!(first.is_found(), path == "/api/items/0");

            assert_eq!(registry.cached_keys().await, cached);

            let attempts = registry.attempts();
            assert_eq!(registry.resolve(&key).await.is_found(), first.is_found());
            assert_eq!(registry.attempts(), attempts);
        }

        assert!(lookups.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_reset_forces_new_lookup() {
        let registry = HandlerRegistry::new().with_source(StaticHandlers::new());
        let key = NormalizedKey::from("/api/missing");

        registry.resolve(&key).await;
        registry.reset().await;
        registry.resolve(&key).await;

        assert_eq!(registry.attempts(), 2);
    }

    #[tokio::test]
    async fn test_first_source_wins() {
        let first = StaticHandlers::new().with("/api/a", |_: &MockRequest| -> Result<Value, HandlerError> { Ok(json!({"from": 1})) });
        let second = StaticHandlers::new().with("/api/a", |_: &MockRequest| -> Result<Value, HandlerError> { Ok(json!({"from": 2})) });
        let registry = HandlerRegistry::new().with_source(first).with_source(second);

        match registry.resolve(&NormalizedKey::from("/api/a")).await {
            Resolution::Found(handler) => {
                let value = handler.respond(&MockRequest::default()).unwrap();
                assert_eq!(value["from"], 1);
            }
            Resolution::NotFound => panic!("Expected handler"),
        }
    }

    #[tokio::test]
    async fn test_directory_yaml_handler() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("api/products")).unwrap();
        std::fs::write(
            dir.path().join("api/products/0.yaml"),
            "result:\n  method: \"{{method}}\"\n  id: \"{{path.id}}\"\n",
        )
        .unwrap();

        let source = DirectoryHandlers::new(dir.path(), Arc::new(TemplateEngine::new()));
        let handler = source
            .lookup(&NormalizedKey::from("/api/products/0"))
            .await
            .expect("handler file should be found");

        let request = MockRequest::new("GET", "/api/products/9").with_param("id", "9");
        let value = handler.respond(&request).unwrap();
        assert_eq!(value, json!({"result": {"method": "GET", "id": "9"}}));
    }

    #[tokio::test]
    async fn test_directory_json_handler() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("api")).unwrap();
        std::fs::write(dir.path().join("api/list.json"), r#"{"result|2": [{"id|+1": 1}]}"#).unwrap();

        let source = DirectoryHandlers::new(dir.path(), Arc::new(TemplateEngine::new()));
        let handler = source.lookup(&NormalizedKey::from("/api/list")).await.unwrap();
        let value = handler.respond(&MockRequest::default()).unwrap();
        assert_eq!(value, json!({"result|2": [{"id|+1": 1}]}));
    }

    #[tokio::test]
    async fn test_directory_missing_and_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectoryHandlers::new(dir.path().join("mock"), Arc::new(TemplateEngine::new()));
        std::fs::write(dir.path().join("secret.yaml"), "result: 1\n").unwrap();

        assert!(source.lookup(&NormalizedKey::from("/api/none")).await.is_none());
        assert!(source.lookup(&NormalizedKey::from("/../secret")).await.is_none());
        assert!(source.lookup(&NormalizedKey::from("/")).await.is_none());
    }

    #[tokio::test]
    async fn test_directory_unparseable_file_fails_on_invoke() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("api")).unwrap();
        std::fs::write(dir.path().join("api/broken.json"), "{not json").unwrap();

        let source = DirectoryHandlers::new(dir.path(), Arc::new(TemplateEngine::new()));
        let handler = source.lookup(&NormalizedKey::from("/api/broken")).await.unwrap();
        assert!(matches!(
            handler.respond(&MockRequest::default()),
            Err(HandlerError::Unloadable { .. })
        ));
    }
}
