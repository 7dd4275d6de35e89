//! Gateway - HTTP server that routes, shapes, and forwards inference traffic
//!
//! One axum task per inbound request; each request opens exactly one fresh
//! upstream connection (plus at most the 404/429 retries) and both sides
//! close when the relay finishes. No keep-alive, no pipelining, no pooling.
//!
//! Routing by path:
//! - `POST /v1/messages` - Anthropic dialect: bridge to OpenAI, shape,
//!   dispatch, bridge the response (or SSE stream) back
//! - `POST /v1/chat/completions` - OpenAI dialect: shape, normalize,
//!   dispatch, relay (mirroring reasoning when thinking is enabled)
//! - `/auth/cli-login*` and `/provider/*` - rewritten to `/api` + path and
//!   forwarded opaquely for the external coding CLI
//! - everything else (`GET /v1/models`, unknown paths) - forwarded as-is

pub mod error;
pub mod normalize;
pub mod relay;
pub mod shaping;
pub mod translation;
pub mod upstream;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{Request, Response},
    routing::{any, post},
    Router,
};
use bytes::Bytes;
use tokio::net::TcpListener;

use crate::catalog::ModelCatalog;
use crate::config::Config;
use crate::events::Notifier;
use crate::reasoning::ReasoningCache;

use error::ProxyError;
use normalize::normalize_payload;
use relay::{byte_copy_body, mirror_body};
use shaping::ThinkingShaper;
use translation::{translate_request, translate_response, AnthropicSseStream};
use upstream::{DispatchRequest, UpstreamDispatcher};

/// Private header marking a sync/probe request; shaping is bypassed
pub const SYNC_HEADER: &str = "x-ellproxy-test";

/// Private header naming the provider a probe is exercising
pub const PROVIDER_HEADER: &str = "x-ellproxy-provider";

/// Upstream endpoint the bridge targets for translated requests
const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Management path prefixes rewritten to `/api` + path before dispatch
const API_REWRITE_PREFIXES: &[&str] = &["/auth/cli-login", "/provider/"];

/// Shared state for the gateway
#[derive(Clone)]
struct GatewayState {
    catalog: Arc<ModelCatalog>,
    cache: Arc<ReasoningCache>,
    shaper: Arc<ThinkingShaper>,
    dispatcher: Arc<UpstreamDispatcher>,
}

/// Start the gateway
pub async fn start_gateway(
    config: Config,
    catalog: Arc<ModelCatalog>,
    cache: Arc<ReasoningCache>,
    notifier: Notifier,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let dispatcher = Arc::new(
        UpstreamDispatcher::new(&config.upstream_addr(), catalog.clone(), notifier.clone())
            .context("Failed to build upstream dispatcher")?,
    );
    let state = GatewayState {
        shaper: Arc::new(ThinkingShaper::new(catalog.clone(), notifier)),
        catalog,
        cache,
        dispatcher,
    };

    let app = Router::new()
        .route("/v1/messages", post(messages_handler))
        .route("/*path", any(passthrough_handler))
        .with_state(state);

    tracing::info!("Starting gateway on {}", config.bind_addr);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!("Gateway listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
        })
        .await
        .context("Server error")?;

    tracing::info!("Gateway shut down gracefully");
    Ok(())
}

/// Whether the private test header marks this as a probe request
fn is_probe(headers: &axum::http::HeaderMap) -> bool {
    let probe = headers
        .get(SYNC_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if probe {
        if let Some(provider) = headers.get(PROVIDER_HEADER).and_then(|v| v.to_str().ok()) {
            tracing::debug!(provider = %provider, "probe request");
        }
    }
    probe
}

/// Handler for `POST /v1/messages` - the Anthropic bridge path
async fn messages_handler(
    State(state): State<GatewayState>,
    req: Request<Body>,
) -> Result<Response<Body>, ProxyError> {
    let headers = req.headers().clone();
    let body_bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| ProxyError::BadRequest(format!("failed to read body: {}", e)))?;

    let translated = translate_request(&body_bytes, &state.catalog, &state.cache)
        .map_err(|e| ProxyError::BadRequest(e.to_string()))?;
    let original_model = translated.original_model;
    let wants_stream = translated.stream;

    let probe = is_probe(&headers);
    let mut body = translated.body;
    let thinking_enabled = state.shaper.shape(&mut body, probe);

    let outbound = serde_json::to_vec(&body)
        .map_err(|e| ProxyError::Internal(format!("failed to serialize request: {}", e)))?;

    let response = state
        .dispatcher
        .dispatch(DispatchRequest {
            method: axum::http::Method::POST,
            path: CHAT_COMPLETIONS_PATH.to_string(),
            headers,
            body: Bytes::from(outbound),
            thinking_enabled,
            probe,
        })
        .await?;

    let status = response.status();
    if !status.is_success() {
        // Exhausted 429s and other upstream errors pass through verbatim
        return relay_verbatim(response);
    }

    if wants_stream && is_sse_response(response.headers()) {
        let builder = client_response_builder(&response, true)
            .header("content-type", "text/event-stream");
        let stream = AnthropicSseStream::new(response.bytes_stream(), original_model);
        return builder
            .body(Body::from_stream(stream))
            .map_err(|e| ProxyError::Internal(e.to_string()));
    }

    let builder = client_response_builder(&response, true).header("content-type", "application/json");
    let upstream_body = response
        .bytes()
        .await
        .map_err(|e| ProxyError::UpstreamProtocol(format!("failed to read response: {}", e)))?;
    let translated = translate_response(&upstream_body, &original_model)
        .map_err(|e| ProxyError::Internal(e.to_string()))?;

    builder
        .body(Body::from(translated))
        .map_err(|e| ProxyError::Internal(e.to_string()))
}

/// Handler for everything else: the OpenAI chat path plus opaque forwards
async fn passthrough_handler(
    State(state): State<GatewayState>,
    req: Request<Body>,
) -> Result<Response<Body>, ProxyError> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let headers = req.headers().clone();

    let mut path = uri.path().to_string();
    if let Some(rewritten) = rewrite_management_path(&path) {
        tracing::debug!(from = %path, to = %rewritten, "management path rewrite");
        path = rewritten;
    }
    if let Some(query) = uri.query() {
        path = format!("{}?{}", path, query);
    }

    let body_bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| ProxyError::BadRequest(format!("failed to read body: {}", e)))?;

    let probe = is_probe(&headers);
    let is_chat = method == axum::http::Method::POST && uri.path() == CHAT_COMPLETIONS_PATH;

    let (outbound, thinking_enabled) = if is_chat {
        let mut body: serde_json::Value = serde_json::from_slice(&body_bytes)
            .map_err(|e| ProxyError::BadRequest(format!("invalid JSON body: {}", e)))?;
        let thinking_enabled = state.shaper.shape(&mut body, probe);
        normalize_payload(&mut body);
        let bytes = serde_json::to_vec(&body)
            .map_err(|e| ProxyError::Internal(format!("failed to serialize request: {}", e)))?;
        (Bytes::from(bytes), thinking_enabled)
    } else {
        (body_bytes, false)
    };

    let response = state
        .dispatcher
        .dispatch(DispatchRequest {
            method,
            path,
            headers,
            body: outbound,
            thinking_enabled,
            probe,
        })
        .await?;

    if thinking_enabled && response.status().is_success() && is_sse_response(response.headers()) {
        let builder = client_response_builder(&response, false);
        let body = mirror_body(response, state.cache.clone());
        return builder
            .body(body)
            .map_err(|e| ProxyError::Internal(e.to_string()));
    }

    relay_verbatim(response)
}

/// Rewrite management paths onto the upstream's `/api` surface
fn rewrite_management_path(path: &str) -> Option<String> {
    API_REWRITE_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
        .then(|| format!("/api{}", path))
}

/// Check if a response is SSE based on content-type header
fn is_sse_response(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false)
}

/// Start a client response from the upstream status and headers
///
/// Hop-by-hop headers never forward; `connection: close` always does.
/// `strip_length` additionally drops length/type headers when the relayed
/// body is about to be rewritten by the bridge.
fn client_response_builder(
    response: &reqwest::Response,
    strip_length: bool,
) -> axum::http::response::Builder {
    let mut builder = Response::builder().status(response.status().as_u16());

    for (name, value) in response.headers() {
        let lower = name.as_str().to_ascii_lowercase();
        if lower == "transfer-encoding" || lower == "connection" {
            continue;
        }
        if strip_length && (lower == "content-length" || lower == "content-type") {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    builder.header("connection", "close")
}

/// Relay an upstream response byte-for-byte
fn relay_verbatim(response: reqwest::Response) -> Result<Response<Body>, ProxyError> {
    let builder = client_response_builder(&response, false);
    builder
        .body(byte_copy_body(response))
        .map_err(|e| ProxyError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_management_path_rewrite() {
        assert_eq!(
            rewrite_management_path("/auth/cli-login").as_deref(),
            Some("/api/auth/cli-login")
        );
        assert_eq!(
            rewrite_management_path("/provider/qwen/refresh").as_deref(),
            Some("/api/provider/qwen/refresh")
        );
        assert_eq!(rewrite_management_path("/v1/chat/completions"), None);
        assert_eq!(rewrite_management_path("/v1/models"), None);
        assert_eq!(rewrite_management_path("/unknown"), None);
    }

    #[test]
    fn test_probe_detection() {
        let mut headers = axum::http::HeaderMap::new();
        assert!(!is_probe(&headers));

        headers.insert(SYNC_HEADER, "true".parse().unwrap());
        assert!(is_probe(&headers));

        headers.insert(SYNC_HEADER, "TRUE".parse().unwrap());
        assert!(is_probe(&headers));

        headers.insert(SYNC_HEADER, "no".parse().unwrap());
        assert!(!is_probe(&headers));
    }

    #[test]
    fn test_sse_detection() {
        let mut headers = reqwest::header::HeaderMap::new();
        assert!(!is_sse_response(&headers));

        headers.insert("content-type", "text/event-stream".parse().unwrap());
        assert!(is_sse_response(&headers));

        headers.insert(
            "content-type",
            "text/event-stream; charset=utf-8".parse().unwrap(),
        );
        assert!(is_sse_response(&headers));

        headers.insert("content-type", "application/json".parse().unwrap());
        assert!(!is_sse_response(&headers));
    }
}
