//! Stream relay - pumps upstream bytes back to the client
//!
//! Two modes:
//!
//! - **Byte-copy** (default): the upstream body is forwarded verbatim,
//!   chunk by chunk, until the upstream half-closes.
//! - **Reasoning mirror**: engaged for SSE responses to thinking-enabled
//!   requests. Each `data:` payload carrying a non-empty
//!   `choices[0].delta.reasoning_content` has that value duplicated into
//!   `delta.content`, so clients that only render `content` still show the
//!   reasoning. Content and reasoning are accumulated for the whole
//!   stream and stored into the reasoning cache when `[DONE]` arrives.
//!
//! Events the mirror does not need to touch are forwarded byte-identical,
//! including non-data lines and malformed JSON payloads.

use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::reasoning::ReasoningCache;

/// Wrap a non-SSE (or non-thinking) upstream body for verbatim relay
pub fn byte_copy_body(response: reqwest::Response) -> axum::body::Body {
    axum::body::Body::from_stream(response.bytes_stream())
}

/// Wrap a thinking-enabled SSE body in the reasoning mirror
pub fn mirror_body(response: reqwest::Response, cache: Arc<ReasoningCache>) -> axum::body::Body {
    axum::body::Body::from_stream(ReasoningMirrorStream::new(response.bytes_stream(), cache))
}

/// SSE transformer that mirrors `reasoning_content` deltas into `content`
pub struct ReasoningMirrorStream<E> {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>,
    cache: Arc<ReasoningCache>,
    /// Partial SSE event carried across chunk boundaries
    buffer: String,
    accumulated_content: String,
    accumulated_reasoning: String,
    stored: bool,
    upstream_done: bool,
}

impl<E> ReasoningMirrorStream<E> {
    pub fn new(
        inner: impl Stream<Item = Result<Bytes, E>> + Send + 'static,
        cache: Arc<ReasoningCache>,
    ) -> Self {
        Self {
            inner: Box::pin(inner),
            cache,
            buffer: String::new(),
            accumulated_content: String::new(),
            accumulated_reasoning: String::new(),
            stored: false,
            upstream_done: false,
        }
    }

    /// Consume a chunk, returning the (possibly rewritten) complete events
    fn ingest(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut output = Vec::new();
        while let Some(boundary) = self.buffer.find("\n\n") {
            let event: String = self.buffer.drain(..boundary + 2).collect();
            output.extend_from_slice(&self.transform_event(&event));
        }
        output
    }

    /// Rewrite one complete SSE event, or return it untouched
    fn transform_event(&mut self, event: &str) -> Vec<u8> {
        let mut rewritten: Vec<String> = Vec::new();
        let mut modified = false;

        for line in event.lines() {
            let trimmed = line.trim_end_matches('\r');
            match self.transform_data_line(trimmed) {
                Some(replacement) => {
                    modified = true;
                    rewritten.push(replacement);
                }
                None => rewritten.push(trimmed.to_string()),
            }
        }

        if modified {
            let mut out = rewritten.join("\n");
            out.push_str("\n\n");
            out.into_bytes()
        } else {
            // Byte-identical passthrough for events the mirror ignores
            event.as_bytes().to_vec()
        }
    }

    /// Mirror a single `data:` line; `None` means leave the line alone
    fn transform_data_line(&mut self, line: &str) -> Option<String> {
        let data = line.strip_prefix("data:")?.trim();

        if data == "[DONE]" {
            if !self.stored {
                self.stored = true;
                self.cache
                    .store(&self.accumulated_content, &self.accumulated_reasoning);
            }
            return None;
        }

        let mut payload: Value = serde_json::from_str(data).ok()?;

        let delta = payload
            .get_mut("choices")
            .and_then(|c| c.get_mut(0))
            .and_then(|c| c.get_mut("delta"))?;

        if let Some(content) = delta.get("content").and_then(Value::as_str) {
            self.accumulated_content.push_str(content);
        }

        let reasoning = delta
            .get("reasoning_content")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .map(String::from)?;

        self.accumulated_reasoning.push_str(&reasoning);
        delta["content"] = Value::String(reasoning);

        Some(format!("data: {}", payload))
    }
}

impl<E> Stream for ReasoningMirrorStream<E> {
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.upstream_done {
                // Flush whatever trailing partial data remains, then end
                if !this.buffer.is_empty() {
                    let rest = std::mem::take(&mut this.buffer);
                    return Poll::Ready(Some(Ok(Bytes::from(rest))));
                }
                return Poll::Ready(None);
            }
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let out = this.ingest(&chunk);
                    if !out.is_empty() {
                        return Poll::Ready(Some(Ok(Bytes::from(out))));
                    }
                    // Chunk ended mid-event; poll for the rest
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => this.upstream_done = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::convert::Infallible;

    fn upstream(chunks: Vec<&str>) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::from(c.to_string())))
                .collect::<Vec<_>>(),
        )
    }

    async fn run(chunks: Vec<&str>, cache: Arc<ReasoningCache>) -> String {
        let stream = ReasoningMirrorStream::new(upstream(chunks), cache);
        let parts: Vec<_> = stream.collect().await;
        parts
            .into_iter()
            .map(|p| String::from_utf8(p.unwrap().to_vec()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_reasoning_mirrored_into_content() {
        let cache = Arc::new(ReasoningCache::new());
        let output = run(
            vec![
                "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"because...\"}}]}\n\n",
                "data: [DONE]\n\n",
            ],
            cache,
        )
        .await;

        let payload: Value = serde_json::from_str(
            output
                .split("\n\n")
                .next()
                .unwrap()
                .strip_prefix("data: ")
                .unwrap(),
        )
        .unwrap();
        assert_eq!(payload["choices"][0]["delta"]["content"], "because...");
        assert_eq!(
            payload["choices"][0]["delta"]["reasoning_content"],
            "because..."
        );
    }

    #[tokio::test]
    async fn test_done_stores_accumulated_pair() {
        let cache = Arc::new(ReasoningCache::new());
        run(
            vec![
                "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"step one. \"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"step two.\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"The \"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"answer.\"}}]}\n\n",
                "data: [DONE]\n\n",
            ],
            cache.clone(),
        )
        .await;

        assert!(cache.contains("The answer."));
        assert_eq!(cache.retrieve("The answer."), "step one. step two.");
    }

    #[tokio::test]
    async fn test_plain_content_events_pass_through_verbatim() {
        let cache = Arc::new(ReasoningCache::new());
        let event = "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n";
        let output = run(vec![event, "data: [DONE]\n\n"], cache).await;

        assert!(output.starts_with(event));
    }

    #[tokio::test]
    async fn test_malformed_json_and_comments_pass_through() {
        let cache = Arc::new(ReasoningCache::new());
        let output = run(
            vec![
                ": keep-alive\n\n",
                "data: not json at all\n\n",
                "event: ping\ndata: {}\n\n",
            ],
            cache,
        )
        .await;

        assert!(output.contains(": keep-alive"));
        assert!(output.contains("data: not json at all"));
        assert!(output.contains("event: ping"));
    }

    #[tokio::test]
    async fn test_event_split_across_chunks() {
        let cache = Arc::new(ReasoningCache::new());
        let output = run(
            vec![
                "data: {\"choices\":[{\"delta\":{\"reasoning",
                "_content\":\"joined\"}}]}\n\ndata: [DONE]\n\n",
            ],
            cache,
        )
        .await;

        assert!(output.contains("\"content\":\"joined\""));
    }

    #[tokio::test]
    async fn test_done_passes_through_to_client() {
        let cache = Arc::new(ReasoningCache::new());
        let output = run(vec!["data: [DONE]\n\n"], cache).await;
        assert!(output.contains("data: [DONE]"));
    }

    #[tokio::test]
    async fn test_no_done_means_no_store() {
        let cache = Arc::new(ReasoningCache::new());
        run(
            vec![
                "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"r\",\"content\":\"\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"final\"}}]}\n\n",
            ],
            cache.clone(),
        )
        .await;

        assert!(!cache.contains("final"));
    }
}
