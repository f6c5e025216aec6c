//! Config Interceptor: a loopback HTTP reverse proxy that fetches the
//! client-bootstrap JSON document, rewrites its chat endpoint to point
//! at the Chat Interceptor, and recovers the real chat target for it
//! to dial.

pub mod affinity;
pub mod error;
pub mod rewrite;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use deceive_common::ChatTargetCell;
pub use error::{Error, Result};
use error::Context as _;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Default bootstrap-config origin.
pub const DEFAULT_BOOTSTRAP_ORIGIN: &str = "https://clientconfig.rpg.riotgames.com";
/// Default PAS affinity endpoint.
pub const DEFAULT_PAS_URL: &str = "https://riot-geo.pas.si.riotgames.com/pas/v1/service/chat";

/// Headers forwarded verbatim to the bootstrap upstream when present.
const FORWARDED_HEADERS: &[header::HeaderName] = &[header::USER_AGENT, header::AUTHORIZATION];
const ENTITLEMENTS_HEADER: &str = "X-Riot-Entitlements-JWT";

struct Inner {
    chat_port: u16,
    chat_target: Arc<ChatTargetCell>,
    http: reqwest::Client,
    bootstrap_origin: String,
    pas_url: String,
}

/// The Config Interceptor. Construct with [`ConfigInterceptor::new`],
/// then [`ConfigInterceptor::start`] to bind its loopback listener.
pub struct ConfigInterceptor {
    inner: Arc<Inner>,
}

impl ConfigInterceptor {
    #[must_use]
    pub fn new(chat_port: u16, chat_target: Arc<ChatTargetCell>) -> Self {
        Self::with_endpoints(chat_port, chat_target, DEFAULT_BOOTSTRAP_ORIGIN, DEFAULT_PAS_URL)
    }

    /// As [`ConfigInterceptor::new`], but with the upstream origins
    /// overridden — used by tests to point at a `mockito` server instead
    /// of the real Riot endpoints.
    #[must_use]
    pub fn with_endpoints(chat_port: u16, chat_target: Arc<ChatTargetCell>, bootstrap_origin: &str, pas_url: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                chat_port,
                chat_target,
                http: reqwest::Client::new(),
                bootstrap_origin: bootstrap_origin.trim_end_matches('/').to_string(),
                pas_url: pas_url.to_string(),
            }),
        }
    }

    /// Binds the loopback HTTP listener on an OS-assigned port and serves
    /// requests until [`ConfigInterceptorHandle::stop`] is called.
    /// Returns the bound port and a handle to stop the server.
    pub async fn start(self) -> Result<(u16, ConfigInterceptorHandle)> {
        let listener = TcpListener::bind("127.0.0.1:0").await.context("bind config interceptor listener")?;
        let port = listener.local_addr().context("read bound port")?.port();

        let app = Router::new().fallback(handle).with_state(self.inner);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let join = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(err) = result {
                error!(%err, "config interceptor server exited with error");
            }
        });

        info!(port, "config interceptor listening");
        Ok((port, ConfigInterceptorHandle { shutdown_tx: Some(shutdown_tx), join: Some(join) }))
    }
}

/// Handle returned by [`ConfigInterceptor::start`]; stops the listener
/// when dropped or when [`stop`](Self::stop) is called explicitly.
pub struct ConfigInterceptorHandle {
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    join: Option<tokio::task::JoinHandle<()>>,
}

impl ConfigInterceptorHandle {
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

async fn handle(State(inner): State<Arc<Inner>>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    match forward_and_rewrite(&inner, &method, &uri, &headers, &body).await {
        Ok(response) => response,
        Err(err) => {
            error!(%err, "config interceptor transport failure");
            StatusCode::BAD_GATEWAY.into_response()
        },
    }
}

async fn forward_and_rewrite(inner: &Inner, method: &Method, uri: &Uri, headers: &HeaderMap, body: &Bytes) -> Result<Response> {
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let upstream_url = format!("{}{path_and_query}", inner.bootstrap_origin);

    let mut request = inner.http.request(method.clone(), &upstream_url);
    for name in FORWARDED_HEADERS {
        if let Some(value) = headers.get(name) {
            request = request.header(name.clone(), value.clone());
        }
    }
    if let Some(value) = find_header(headers, ENTITLEMENTS_HEADER) {
        request = request.header(ENTITLEMENTS_HEADER, value);
    }
    if !body.is_empty() {
        request = request.body(body.clone());
    }

    let upstream_response = request.send().await?;
    let status = upstream_response.status();
    let upstream_body = upstream_response.bytes().await?;

    if !status.is_success() {
        debug!(%status, "bootstrap upstream returned non-2xx, relaying unmodified");
        return Ok(json_response(status, upstream_body.to_vec()));
    }

    let mut json: serde_json::Value = match serde_json::from_slice(&upstream_body) {
        Ok(json) => json,
        Err(err) => {
            warn!(%err, "bootstrap body was not valid JSON, forwarding unmodified");
            return Ok(json_response(StatusCode::OK, upstream_body.to_vec()));
        },
    };

    let mut candidate = rewrite::apply_basic_rewrites(&mut json, inner.chat_port);

    if rewrite::affinity_lookup_enabled(&json) {
        if let Some(authorization) = find_header(headers, header::AUTHORIZATION.as_str()) {
            if let Some(affinities) = rewrite::affinities(&json) {
                if let Some(resolved) = affinity::resolve(&inner.http, &inner.pas_url, authorization, affinities).await {
                    candidate.host = Some(resolved);
                }
            }
        }
    }

    rewrite::blank_affinities(&mut json);

    if let (Some(host), Some(port)) = (candidate.host, candidate.port) {
        if inner.chat_target.set(deceive_common::ChatTarget { host: host.clone(), port }) {
            info!(%host, port, "chat target resolved");
        }
    }

    let rewritten = serde_json::to_vec(&json).context("serialize rewritten bootstrap body")?;
    Ok(json_response(StatusCode::OK, rewritten))
}

fn find_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}
