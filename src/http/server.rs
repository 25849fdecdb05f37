//! HTTP server setup and the forwarding handler.
//!
//! # Responsibilities
//! - Build the components of the pipeline from a validated config
//! - Create the Axum Router with the `/proxy` handler
//! - Wire up middleware (tracing, request ID)
//! - Run the server until shutdown
//!
//! # Pipeline
//! ```text
//! OPTIONS ─────────────────────────────────────────────▶ preflight (204)
//! other   → method gate → allow-list → cache-aside fetch → decorate
//!                 │            │               │
//!                 └─ 405       └─ 403          └─ 500 (timeout / network)
//!                      (all error responses are decorated too)
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header, Method, Request},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::cache::{run_sweeper, CachePolicy, CacheStore, MemoryCacheStore};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, SetupError};
use crate::http::request::{
    propagate_request_id_layer, set_request_id_layer, ForwardRequest, RequestIdExt,
};
use crate::observability::metrics;
use crate::security::{AllowList, ResponseDecorator};
use crate::upstream::{CacheAsideFetcher, Fetched, HttpUpstream, Upstream};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub allow_list: Arc<AllowList>,
    pub fetcher: Arc<CacheAsideFetcher>,
    pub decorator: Arc<ResponseDecorator>,
    pub max_body_bytes: usize,
}

/// HTTP server for the forwarding proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    sweep_store: Option<MemoryCacheStore>,
}

impl HttpServer {
    /// Create a server with the reqwest upstream and the in-memory cache.
    pub fn new(config: ProxyConfig) -> Result<Self, SetupError> {
        let upstream = Arc::new(HttpUpstream::new(&config.upstream)?);
        let store = MemoryCacheStore::new(config.cache.max_entries, config.cache.max_total_bytes);

        let mut server = Self::with_collaborators(config, upstream, Arc::new(store.clone()))?;
        server.sweep_store = Some(store);
        Ok(server)
    }

    /// Create a server around caller-supplied upstream and cache store.
    pub fn with_collaborators(
        config: ProxyConfig,
        upstream: Arc<dyn Upstream>,
        cache: Arc<dyn CacheStore>,
    ) -> Result<Self, SetupError> {
        let policy = CachePolicy::new(&config.cache)?;
        let fetcher = CacheAsideFetcher::new(upstream, cache, policy, &config.upstream)?;
        let decorator = ResponseDecorator::new(&config.cors, &config.security)?;

        let state = AppState {
            allow_list: Arc::new(AllowList::new(config.targets.allowed_prefixes.clone())),
            fetcher: Arc::new(fetcher),
            decorator: Arc::new(decorator),
            max_body_bytes: config.listener.max_body_bytes,
        };

        let router = Self::build_router(&config, state);
        Ok(Self {
            router,
            config,
            sweep_store: None,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route(&config.listener.route_path, any(proxy_handler))
            .with_state(state)
            .layer(propagate_request_id_layer())
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request.headers().request_id()
                    )
                }),
            )
            .layer(set_request_id_layer())
    }

    /// The configured router, for embedding or in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            route = %self.config.listener.route_path,
            "HTTP server starting"
        );

        if let Some(store) = self.sweep_store.clone() {
            let interval = Duration::from_secs(self.config.cache.sweep_interval_secs);
            tokio::spawn(run_sweeper(store, interval, shutdown.resubscribe()));
        }

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
/// Every response leaving here has been decorated exactly once.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let method = request.method().clone();
    let origin = request.headers().get(header::ORIGIN).cloned();
    let request_id = request.headers().request_id().to_string();

    let response = if method == Method::OPTIONS {
        tracing::debug!(request_id = %request_id, "Answering preflight");
        state.decorator.preflight(origin.as_ref())
    } else {
        let response = match forward(&state, request).await {
            Ok(Fetched { response, source }) => {
                tracing::info!(
                    request_id = %request_id,
                    status = response.status().as_u16(),
                    cache = source.as_str(),
                    "Request forwarded"
                );
                response
            }
            Err(err) => {
                log_failure(&request_id, &err);
                err.into_response()
            }
        };
        state.decorator.decorate(response, origin.as_ref())
    };

    metrics::record_request(method.as_str(), response.status().as_u16(), start_time);
    response
}

/// Method gate, validation and fetch. Nothing here touches the network or
/// the cache before the target has been accepted.
async fn forward(state: &AppState, request: Request<Body>) -> Result<Fetched, ProxyError> {
    if ![Method::GET, Method::HEAD, Method::POST].contains(request.method()) {
        return Err(ProxyError::MethodNotAllowed);
    }

    let target = state.allow_list.validate(request.uri()).inspect_err(|rejected| {
        metrics::record_rejection(rejected.reason.as_str());
    })?;

    let (parts, body) = request.into_parts();
    // Read failures are almost always the length limit tripping
    let body = axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|_| ProxyError::BodyTooLarge)?;

    let forward_request = ForwardRequest::new(parts.method, target, parts.headers, body);
    Ok(state.fetcher.fetch_or_serve(&forward_request).await?)
}

fn log_failure(request_id: &str, err: &ProxyError) {
    match err {
        ProxyError::Rejected(rejected) => {
            tracing::debug!(request_id = %request_id, reason = rejected.reason.as_str(), "Target rejected");
        }
        ProxyError::Fetch(fetch) => {
            tracing::warn!(request_id = %request_id, kind = fetch.kind(), error = %fetch, "Upstream fetch failed");
        }
        ProxyError::MethodNotAllowed | ProxyError::BodyTooLarge => {
            tracing::debug!(request_id = %request_id, error = %err, "Request refused");
        }
    }
}
