//! Request dispatcher.
//!
//! Classifies each request, then either synthesizes a mock response,
//! forwards it upstream, or hands it back to the host pipeline untouched.

use crate::config::DispatcherConfig;
use crate::latency::LatencySimulator;
use crate::matcher::RouteTable;
use crate::mode::ModeSelector;
use crate::normalize::normalize;
use crate::proxy::ProxyForwarder;
use crate::registry::{DirectoryHandlers, HandlerRegistry, StaticHandlers};
use crate::request::MockRequest;
use crate::synthesizer::{Envelope, MockOutcome, MockResponseSynthesizer, Synthesized};
use crate::targets::TargetRegistry;
use crate::template::{RuleExpander, TemplateEngine, TemplateExpander};
use axum::body::{Body, Bytes};
use axum::extract::{Query, Request};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Requests under this prefix are mocked or proxied. Case-sensitive.
pub const API_PREFIX: &str = "/api/";

/// Header naming how a mock response was produced.
pub const MOCK_OUTCOME_HEADER: &str = "x-mock-outcome";

/// Branch chosen for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Mock,
    Proxy,
    PassThrough,
}

/// Result of dispatching a request.
pub enum Dispatch {
    /// The dispatcher produced the response.
    Handled(Response),
    /// Not an API request; continue with the host pipeline.
    PassThrough(Request),
}

/// Point-in-time copy of the dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests_total: u64,
    pub mocked: u64,
    pub proxied: u64,
    pub passed_through: u64,
    pub handler_not_found: u64,
    pub handler_errors: u64,
    pub proxy_failures: u64,
}

#[derive(Debug, Default)]
struct DispatchStats {
    requests_total: AtomicU64,
    mocked: AtomicU64,
    proxied: AtomicU64,
    passed_through: AtomicU64,
    handler_not_found: AtomicU64,
    handler_errors: AtomicU64,
    proxy_failures: AtomicU64,
}

impl DispatchStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            mocked: self.mocked.load(Ordering::Relaxed),
            proxied: self.proxied.load(Ordering::Relaxed),
            passed_through: self.passed_through.load(Ordering::Relaxed),
            handler_not_found: self.handler_not_found.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            proxy_failures: self.proxy_failures.load(Ordering::Relaxed),
        }
    }
}

/// Development request dispatcher
///
/// Owns every stage of the Mock and Proxy branches. One instance serves all
/// requests; the only state shared between them is the handler cache, the
/// mode toggle and the counters.
pub struct Dispatcher {
    mode: ModeSelector,
    routes: RouteTable,
    registry: HandlerRegistry,
    synthesizer: MockResponseSynthesizer,
    latency: LatencySimulator,
    targets: TargetRegistry,
    forwarder: ProxyForwarder,
    body_limit: usize,
    log_routes: bool,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Create a dispatcher serving file-backed handlers only.
    pub fn new(config: &DispatcherConfig) -> anyhow::Result<Self> {
        Self::with_handlers(config, StaticHandlers::new())
    }

    /// Create a dispatcher with in-code handlers consulted before the mock
    /// directory.
    pub fn with_handlers(config: &DispatcherConfig, handlers: StaticHandlers) -> anyhow::Result<Self> {
        let engine = Arc::new(TemplateEngine::new());

        let mut registry = HandlerRegistry::new().with_source(handlers);
        if let Some(dir) = &config.mock_dir {
            registry = registry.with_source(DirectoryHandlers::new(dir.clone(), engine));
        }

        let targets = TargetRegistry::new(config.targets.clone(), &config.active_target)?;
        let forwarder = ProxyForwarder::new(Duration::from_millis(config.proxy.timeout_ms))?;
        let routes = RouteTable::new(config.routes.as_slice());
        let latency = LatencySimulator::from_millis(config.latency_ms);

        info!(
            mock = config.mock,
            active_target = %targets.active_tag(),
            upstream = %targets.active_url(),
            routes = routes.len(),
            mock_dir = ?config.mock_dir,
            latency = ?latency.delay(),
            "Dispatcher initialized"
        );

        Ok(Self {
            mode: ModeSelector::new(config.mock),
            routes,
            registry,
            synthesizer: MockResponseSynthesizer::new(Arc::new(RuleExpander::new()?)),
            latency,
            targets,
            forwarder,
            body_limit: config.body_limit,
            log_routes: config.settings.log_routes,
            stats: DispatchStats::default(),
        })
    }

    /// Share an externally owned toggle instead of the configured one.
    pub fn with_mode(mut self, mode: ModeSelector) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the template expander.
    pub fn with_expander(mut self, expander: Arc<dyn TemplateExpander>) -> Self {
        self.synthesizer = MockResponseSynthesizer::new(expander);
        self
    }

    pub fn mode(&self) -> &ModeSelector {
        &self.mode
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn targets(&self) -> &TargetRegistry {
        &self.targets
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Classify a path. Reads the mode toggle exactly once.
    pub fn route(&self, path: &str) -> RouteDecision {
        if !path.starts_with(API_PREFIX) {
            RouteDecision::PassThrough
        } else if self.mode.is_mock_mode() {
            RouteDecision::Mock
        } else {
            RouteDecision::Proxy
        }
    }

    /// Dispatch one request.
    pub async fn dispatch(&self, request: Request) -> Dispatch {
        match self.route(request.uri().path()) {
            RouteDecision::PassThrough => {
                DispatchStats::bump(&self.stats.passed_through);
                Dispatch::PassThrough(request)
            }
            RouteDecision::Mock => {
                DispatchStats::bump(&self.stats.requests_total);
                DispatchStats::bump(&self.stats.mocked);
                Dispatch::Handled(self.mock(request).await)
            }
            RouteDecision::Proxy => {
                DispatchStats::bump(&self.stats.requests_total);
                DispatchStats::bump(&self.stats.proxied);
                Dispatch::Handled(self.proxy(request).await)
            }
        }
    }

    async fn mock(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let body = match self.read_body(body).await {
            Ok(body) => body,
            Err(response) => return response,
        };

        let path = parts.uri.path().to_string();
        let params = self.routes.params(&path);
        let key = normalize(&path, &params);

        if self.log_routes {
            info!(method = %parts.method, path = %path, "mock -> {}", key);
        }

        let mut mock_request =
            with_headers(MockRequest::new(parts.method.as_str(), path), &parts.headers).with_body(body);
        if let Ok(Query(query)) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri) {
            mock_request.query = query;
        }
        mock_request.query_string = parts.uri.query().map(String::from);
        mock_request.params = params;

        let resolution = self.registry.resolve(&key).await;
        let synthesized = self
            .latency
            .apply(async { self.synthesizer.synthesize(&resolution, &mock_request) })
            .await;

        match synthesized.outcome {
            MockOutcome::Found => {}
            MockOutcome::NotFound => DispatchStats::bump(&self.stats.handler_not_found),
            MockOutcome::HandlerError => DispatchStats::bump(&self.stats.handler_errors),
        }

        mock_response(synthesized)
    }

    async fn proxy(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let body = match self.read_body(body).await {
            Ok(body) => body,
            Err(response) => return response,
        };

        let base = self.targets.active_url();
        let url = ProxyForwarder::upstream_url(base, &parts.uri);
        if self.log_routes {
            info!(env = %self.targets.active_tag(), method = %parts.method, "proxy -> {}", url);
        }

        match self
            .forwarder
            .forward(parts.method, &parts.uri, &parts.headers, body, base)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                DispatchStats::bump(&self.stats.proxy_failures);
                warn!(url = %url, error = %e, "proxy failed");
                envelope_response(
                    StatusCode::BAD_GATEWAY,
                    Envelope::error(502, format!("proxy failed: {e}"), Value::Null),
                )
            }
        }
    }

    async fn read_body(&self, body: Body) -> Result<Bytes, Response> {
        axum::body::to_bytes(body, self.body_limit).await.map_err(|e| {
            warn!(error = %e, limit = self.body_limit, "Failed to read request body");
            envelope_response(
                StatusCode::BAD_REQUEST,
                Envelope::error(400, format!("request body rejected: {e}"), Value::Null),
            )
        })
    }
}

/// Copy headers onto the snapshot, first value per name, skipping non-text values.
fn with_headers(request: MockRequest, headers: &HeaderMap) -> MockRequest {
    headers.keys().fold(request, |request, name| {
        match headers.get(name).and_then(|v| v.to_str().ok()) {
            Some(value) => request.with_header(name.as_str(), value),
            None => request,
        }
    })
}

fn envelope_response(status: StatusCode, envelope: Envelope) -> Response {
    (status, Json(envelope)).into_response()
}

fn mock_response(synthesized: Synthesized) -> Response {
    let status =
        StatusCode::from_u16(synthesized.outcome.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(synthesized.body)).into_response();
    response.headers_mut().insert(
        HeaderName::from_static(MOCK_OUTCOME_HEADER),
        HeaderValue::from_static(synthesized.outcome.as_str()),
    );
    response
}
