//! Upstream dispatcher - one fresh connection per outbound request
//!
//! Builds the outbound request from the inbound one (header policy below),
//! sends it to the local upstream, and watches the status code:
//!
//! - **404**: when the path is not already under `/api/` or `/v1/`, the
//!   request is reissued once against `/api` + path. Some upstream builds
//!   mount the whole surface under that prefix.
//! - **429**: the catalog's fallback chain kicks in. A thinking-enabled
//!   request tries the thinking backup first, then the plain fallback;
//!   a fast-track request goes straight to the plain fallback. Budget:
//!   two retries when thinking, one otherwise, then the 429 is handed to
//!   the client as-is.
//!
//! Header policy: everything forwards except `Content-Length` (recomputed),
//! `Host` (rewritten), `Transfer-Encoding`, `Connection` (forced to close)
//! and `anthropic-beta`, which is re-emitted - merged with the interleaved
//! thinking beta when the request has thinking enabled.

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{CatalogSnapshot, ModelCatalog};
use crate::events::Notifier;

use super::error::ProxyError;
use super::shaping::DEFAULT_THINKING_BUDGET;

/// Beta flag the upstream needs before it will interleave thinking blocks
pub const INTERLEAVED_THINKING_BETA: &str = "interleaved-thinking-2025-05-14";

/// Hard timeout for sync/probe requests; regular requests stream freely
const PROBE_TIMEOUT: Duration = Duration::from_secs(120);

/// One outbound request, as the dispatcher needs it
pub struct DispatchRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Selects the fallback chain walked on 429
    pub thinking_enabled: bool,
    /// Probe requests get the hard timeout
    pub probe: bool,
}

/// Sends requests to the single trusted upstream
pub struct UpstreamDispatcher {
    client: reqwest::Client,
    base_url: String,
    catalog: Arc<ModelCatalog>,
    notifier: Notifier,
}

impl UpstreamDispatcher {
    pub fn new(
        upstream_addr: &str,
        catalog: Arc<ModelCatalog>,
        notifier: Notifier,
    ) -> anyhow::Result<Self> {
        // Fresh connection per request: no idle pooling, HTTP/1.1 only,
        // and Connection: close on every outbound request
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .http1_only()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: format!("http://{}", upstream_addr),
            catalog,
            notifier,
        })
    }

    /// Send a request, applying the 404 path retry and the 429 fallback chain
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<reqwest::Response, ProxyError> {
        let mut path = request.path.clone();
        let mut body = request.body.clone();
        let mut path_retried = false;
        let mut retry_count: u32 = 0;
        let max_retries = if request.thinking_enabled { 2 } else { 1 };

        loop {
            let response = self
                .send(&request, &path, body.clone())
                .await
                .map_err(classify_send_error)?;
            let status = response.status().as_u16();

            if status == 404 && !path_retried && eligible_for_path_retry(&path) {
                tracing::debug!(path = %path, "upstream 404, retrying under /api");
                path_retried = true;
                path = format!("/api{}", path);
                continue;
            }

            if status == 429 && retry_count < max_retries {
                let snapshot = self.catalog.snapshot();
                if let Some(fallback_body) = apply_fallback(
                    &body,
                    &snapshot,
                    request.thinking_enabled,
                    retry_count,
                    &self.notifier,
                ) {
                    retry_count += 1;
                    body = fallback_body;
                    continue;
                }
            }

            return Ok(response);
        }
    }

    async fn send(
        &self,
        request: &DispatchRequest,
        path: &str,
        body: Bytes,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = format!("{}{}", self.base_url, path);

        let mut outbound = self
            .client
            .request(request.method.clone(), &url)
            .header("connection", "close")
            .body(body);

        if request.probe {
            outbound = outbound.timeout(PROBE_TIMEOUT);
        }

        let mut existing_beta: Option<String> = None;
        for (name, value) in request.headers.iter() {
            let lower = name.as_str().to_ascii_lowercase();
            match lower.as_str() {
                // Recomputed, rewritten, or forced below
                "content-length" | "host" | "transfer-encoding" | "connection" => continue,
                "anthropic-beta" => {
                    existing_beta = value.to_str().ok().map(String::from);
                }
                _ => {
                    outbound = outbound.header(name.as_str(), value.as_bytes());
                }
            }
        }

        if let Some(beta) = merged_beta(existing_beta.as_deref(), request.thinking_enabled) {
            outbound = outbound.header("anthropic-beta", beta);
        }

        outbound.send().await
    }
}

/// Map a reqwest failure onto the gateway error kinds
fn classify_send_error(e: reqwest::Error) -> ProxyError {
    if e.is_connect() || e.is_timeout() {
        ProxyError::UpstreamUnreachable(format!("upstream unreachable: {}", e))
    } else {
        ProxyError::UpstreamProtocol(format!("upstream protocol error: {}", e))
    }
}

/// Whether a 404 on this path earns the single `/api` prefix retry
fn eligible_for_path_retry(path: &str) -> bool {
    !path.starts_with("/api/") && !path.starts_with("/v1/")
}

/// Merge the interleaved-thinking beta into any client-supplied value
///
/// Comma-separated, deduplicated, original order preserved. `None` when
/// there is nothing to emit.
fn merged_beta(existing: Option<&str>, thinking_enabled: bool) -> Option<String> {
    let mut values: Vec<String> = existing
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if thinking_enabled && !values.iter().any(|v| v == INTERLEAVED_THINKING_BETA) {
        values.push(INTERLEAVED_THINKING_BETA.to_string());
    }

    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}

/// Rewrite the body for the next rung of the 429 fallback chain
///
/// Thinking-enabled requests try the thinking backup on their first retry
/// (keeping a thinking object present), then the plain fallback - which
/// loses its thinking object when the fallback model cannot think. Returns
/// `None` when no fallback is configured or the body is not JSON.
fn apply_fallback(
    body: &Bytes,
    snapshot: &CatalogSnapshot,
    thinking_enabled: bool,
    retry_count: u32,
    notifier: &Notifier,
) -> Option<Bytes> {
    let mut parsed: Value = serde_json::from_slice(body).ok()?;
    if !parsed.is_object() {
        return None;
    }

    if thinking_enabled && retry_count == 0 {
        if let Some(entry) = &snapshot.fallback_thinking_entry {
            parsed["model"] = json!(entry.upstream_model);
            if !parsed.get("thinking").map(Value::is_object).unwrap_or(false) {
                parsed["thinking"] = json!({
                    "type": "enabled",
                    "budget_tokens": DEFAULT_THINKING_BUDGET
                });
            }
            notifier.notify(format!("Rate Limit! Trying Thinking Backup: {}", entry.name));
            return serde_json::to_vec(&parsed).ok().map(Bytes::from);
        }
    }

    let entry = snapshot.fallback_entry.as_ref()?;
    parsed["model"] = json!(entry.upstream_model);
    if !entry.supports_thinking {
        if let Some(obj) = parsed.as_object_mut() {
            obj.remove("thinking");
        }
    }
    notifier.notify(format!("Rate Limit! Switched to Default: {}", entry.name));
    serde_json::to_vec(&parsed).ok().map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ModelEntry, Provider, ReasoningLevel};

    fn entry(provider: Provider, id: &str, name: &str, upstream: &str, thinking: bool) -> ModelEntry {
        ModelEntry {
            id: id.to_string(),
            name: name.to_string(),
            provider,
            upstream_model: upstream.to_string(),
            supports_thinking: thinking,
        }
    }

    fn snapshot(
        fallback: Option<ModelEntry>,
        fallback_thinking: Option<ModelEntry>,
    ) -> CatalogSnapshot {
        CatalogSnapshot {
            routing_enabled: true,
            notify_on_routing: true,
            reasoning_level: ReasoningLevel::Medium,
            default_entry: None,
            fallback_entry: fallback,
            default_thinking_entry: None,
            fallback_thinking_entry: fallback_thinking,
        }
    }

    #[test]
    fn test_path_retry_eligibility() {
        assert!(eligible_for_path_retry("/auth/cli-login"));
        assert!(eligible_for_path_retry("/something/else"));
        assert!(!eligible_for_path_retry("/api/whatever"));
        assert!(!eligible_for_path_retry("/v1/chat/completions"));
        assert!(!eligible_for_path_retry("/v1/messages"));
    }

    #[test]
    fn test_beta_added_when_thinking() {
        assert_eq!(
            merged_beta(None, true).as_deref(),
            Some(INTERLEAVED_THINKING_BETA)
        );
    }

    #[test]
    fn test_beta_merged_and_deduplicated() {
        let merged = merged_beta(Some("context-1m-2025-08-07"), true).unwrap();
        assert_eq!(
            merged,
            format!("context-1m-2025-08-07,{}", INTERLEAVED_THINKING_BETA)
        );

        let already = merged_beta(Some(&merged), true).unwrap();
        assert_eq!(already, merged);
    }

    #[test]
    fn test_beta_reemitted_without_thinking() {
        assert_eq!(
            merged_beta(Some("context-1m-2025-08-07"), false).as_deref(),
            Some("context-1m-2025-08-07")
        );
        assert_eq!(merged_beta(None, false), None);
    }

    #[test]
    fn test_fallback_non_thinking_strips_thinking() {
        let (notifier, mut rx) = Notifier::channel(8);
        let snapshot = snapshot(
            Some(entry(
                Provider::Google,
                "gemini-2.5-flash",
                "Gemini Flash",
                "gemini-2.5-flash",
                false,
            )),
            None,
        );

        let body = Bytes::from(
            r#"{"model":"claude-sonnet-4-5","thinking":{"type":"enabled","budget_tokens":16000},"messages":[]}"#,
        );
        let rewritten = apply_fallback(&body, &snapshot, false, 0, &notifier).unwrap();
        let parsed: Value = serde_json::from_slice(&rewritten).unwrap();

        assert_eq!(parsed["model"], "gemini-2.5-flash");
        assert!(parsed.get("thinking").is_none());
        assert_eq!(
            rx.try_recv().unwrap().message,
            "Rate Limit! Switched to Default: Gemini Flash"
        );
    }

    #[test]
    fn test_first_thinking_retry_uses_thinking_backup() {
        let (notifier, mut rx) = Notifier::channel(8);
        let snapshot = snapshot(
            Some(entry(
                Provider::Google,
                "gemini-2.5-flash",
                "Gemini Flash",
                "gemini-2.5-flash",
                false,
            )),
            Some(entry(
                Provider::Claude,
                "claude-sonnet-4-5",
                "Claude Sonnet",
                "claude-sonnet-4-5",
                true,
            )),
        );

        let body = Bytes::from(r#"{"model":"kimi-k2-thinking","messages":[]}"#);
        let rewritten = apply_fallback(&body, &snapshot, true, 0, &notifier).unwrap();
        let parsed: Value = serde_json::from_slice(&rewritten).unwrap();

        assert_eq!(parsed["model"], "claude-sonnet-4-5");
        assert_eq!(parsed["thinking"]["budget_tokens"], 16000);
        assert_eq!(
            rx.try_recv().unwrap().message,
            "Rate Limit! Trying Thinking Backup: Claude Sonnet"
        );
    }

    #[test]
    fn test_second_thinking_retry_falls_to_default() {
        let notifier = Notifier::disabled();
        let snapshot = snapshot(
            Some(entry(
                Provider::Google,
                "gemini-2.5-flash",
                "Gemini Flash",
                "gemini-2.5-flash",
                false,
            )),
            Some(entry(
                Provider::Claude,
                "claude-sonnet-4-5",
                "Claude Sonnet",
                "claude-sonnet-4-5",
                true,
            )),
        );

        let body = Bytes::from(
            r#"{"model":"claude-sonnet-4-5","thinking":{"type":"enabled","budget_tokens":16000},"messages":[]}"#,
        );
        let rewritten = apply_fallback(&body, &snapshot, true, 1, &notifier).unwrap();
        let parsed: Value = serde_json::from_slice(&rewritten).unwrap();

        assert_eq!(parsed["model"], "gemini-2.5-flash");
        assert!(parsed.get("thinking").is_none());
    }

    #[test]
    fn test_no_fallback_configured_means_no_retry() {
        let notifier = Notifier::disabled();
        let body = Bytes::from(r#"{"model":"m","messages":[]}"#);
        assert!(apply_fallback(&body, &snapshot(None, None), false, 0, &notifier).is_none());
    }

    #[test]
    fn test_non_json_body_is_not_retried() {
        let notifier = Notifier::disabled();
        let snapshot = snapshot(
            Some(entry(
                Provider::Google,
                "gemini-2.5-flash",
                "Gemini Flash",
                "gemini-2.5-flash",
                false,
            )),
            None,
        );
        let body = Bytes::from_static(b"not json");
        assert!(apply_fallback(&body, &snapshot, false, 0, &notifier).is_none());
    }
}
