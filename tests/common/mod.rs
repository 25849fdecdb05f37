//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use edge_image_proxy::config::ProxyConfig;
use edge_image_proxy::upstream::{Upstream, UpstreamRequest};
use edge_image_proxy::FetchError;
use futures_util::future::BoxFuture;
use futures_util::{stream, StreamExt};
use tokio::net::TcpListener;

/// What a [`FakeUpstream`] does when called.
#[derive(Clone)]
pub enum Script {
    Respond {
        status: StatusCode,
        content_type: &'static str,
        body: &'static str,
    },
    Hang(Duration),
    /// Send the head and one chunk, then never finish the body.
    Stall,
    Fail(&'static str),
}

/// In-process upstream that counts calls and records requests.
pub struct FakeUpstream {
    script: Script,
    calls: AtomicUsize,
    seen: Mutex<Vec<UpstreamRequest>>,
}

impl FakeUpstream {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn image(body: &'static str) -> Arc<Self> {
        Self::new(Script::Respond {
            status: StatusCode::OK,
            content_type: "image/jpeg",
            body,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<UpstreamRequest> {
        self.seen.lock().unwrap().last().cloned()
    }
}

impl Upstream for FakeUpstream {
    fn send(&self, request: UpstreamRequest) -> BoxFuture<'static, Result<Response<Body>, FetchError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request);
        let script = self.script.clone();

        Box::pin(async move {
            match script {
                Script::Respond {
                    status,
                    content_type,
                    body,
                } => Ok(Response::builder()
                    .status(status)
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap()),
                Script::Hang(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(Response::new(Body::from("too late")))
                }
                Script::Stall => {
                    let chunks = stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(b"partial"))])
                        .chain(stream::pending());
                    Ok(Response::builder()
                        .header(header::CONTENT_TYPE, "image/jpeg")
                        .body(Body::from_stream(chunks))
                        .unwrap())
                }
                Script::Fail(message) => Err(FetchError::Network(message.to_string())),
            }
        })
    }
}

/// Config with a single allow-listed prefix.
pub fn config_allowing(prefix: &str) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.targets.allowed_prefixes = vec![prefix.to_string()];
    config
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

/// A local origin server.
pub struct Origin {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl Origin {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn image(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    (
        [(header::CONTENT_TYPE, "image/jpeg")],
        Bytes::from_static(b"\xff\xd8\xff\xe0 fake jpeg"),
    )
}

async fn headers_echo(State(hits): State<Arc<AtomicUsize>>, headers: HeaderMap) -> impl IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let referer = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    format!("{}\n{}", user_agent, referer)
}

async fn missing(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::NOT_FOUND, "no such image")
}

/// Start an origin on an ephemeral port.
///
/// Routes: `/pixiv/direct/{id}` (jpeg), `/api/headers` (echoes UA and
/// Referer), `/api/missing` (404).
pub async fn start_origin() -> Origin {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/pixiv/direct/{id}", get(image))
        .route("/api/headers", get(headers_echo))
        .route("/api/missing", get(missing))
        .with_state(hits.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Origin { addr, hits }
}
