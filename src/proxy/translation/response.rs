//! OpenAI → Anthropic response translation
//!
//! Converts OpenAI Chat Completions responses back to Anthropic Messages
//! format for clients of `/v1/messages`.
//!
//! # Streaming (SSE) event mapping
//!
//! | OpenAI                          | Anthropic                            |
//! |---------------------------------|--------------------------------------|
//! | (stream opens)                  | synthesized `message_start`          |
//! | `delta.content` (non-empty)     | `content_block_delta` (text_delta)   |
//! | `data: [DONE]`                  | swallowed                            |
//! | (stream closes)                 | `message_stop`                       |
//!
//! Chunks may split SSE events anywhere, so the stream adapter buffers
//! until a double-newline boundary and only translates complete events.
//!
//! # Buffered (JSON) translation
//!
//! The full response is translated at once, mapping OpenAI's
//! `ChatCompletion` structure to Anthropic's `Message` object.

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use super::generate_message_id;

// ============================================================================
// Buffered translation
// ============================================================================

/// Translate a complete OpenAI response body to an Anthropic message
///
/// `model` is the name reported back to the client (the one it asked for).
pub fn translate_response(body: &[u8], model: &str) -> Result<Vec<u8>> {
    let response: OpenAiChatCompletion =
        serde_json::from_slice(body).context("Failed to parse OpenAI response")?;

    let choice = response.choices.first();
    let mut content: Vec<AnthropicContentBlock> = Vec::new();

    if let Some(choice) = choice {
        if let Some(text) = &choice.message.content {
            if !text.is_empty() {
                content.push(AnthropicContentBlock::Text { text: text.clone() });
            }
        }
        if let Some(tool_calls) = &choice.message.tool_calls {
            for tc in tool_calls {
                let input: serde_json::Value =
                    serde_json::from_str(&tc.function.arguments).unwrap_or(serde_json::json!({}));
                content.push(AnthropicContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    input,
                });
            }
        }
    }

    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map(convert_finish_reason);

    let usage = response
        .usage
        .as_ref()
        .map(|u| AnthropicUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or(AnthropicUsage {
            input_tokens: 0,
            output_tokens: 0,
        });

    let message = AnthropicResponse {
        id: generate_message_id(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: model.to_string(),
        stop_reason,
        stop_sequence: None,
        usage,
    };

    serde_json::to_vec(&message).context("Failed to serialize Anthropic response")
}

/// Convert OpenAI finish_reason to Anthropic stop_reason
fn convert_finish_reason(finish_reason: &str) -> String {
    match finish_reason {
        "stop" => "end_turn".to_string(),
        "length" => "max_tokens".to_string(),
        "tool_calls" => "tool_use".to_string(),
        other => other.to_string(),
    }
}

// ============================================================================
// Streaming translation
// ============================================================================

/// Stream adapter turning an OpenAI SSE body into an Anthropic SSE body
///
/// Emits a synthesized `message_start` before forwarding anything, turns
/// each non-empty `choices[0].delta.content` into a text `content_block_delta`
/// at index 0, swallows the `[DONE]` sentinel, and closes with
/// `message_stop` when the upstream half-closes.
pub struct AnthropicSseStream<E> {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>,
    /// Partial SSE data carried across chunk boundaries
    buffer: String,
    /// Model name for the message_start envelope
    model: String,
    message_id: String,
    started: bool,
    finished: bool,
}

impl<E> AnthropicSseStream<E> {
    pub fn new(
        inner: impl Stream<Item = Result<Bytes, E>> + Send + 'static,
        model: impl Into<String>,
    ) -> Self {
        Self {
            inner: Box::pin(inner),
            buffer: String::new(),
            model: model.into(),
            message_id: generate_message_id(),
            started: false,
            finished: false,
        }
    }

    fn start_event(&self) -> Bytes {
        let event = MessageStartEvent {
            event_type: "message_start".to_string(),
            message: MessageStartPayload {
                id: self.message_id.clone(),
                msg_type: "message".to_string(),
                role: "assistant".to_string(),
                content: vec![],
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: AnthropicUsage {
                    input_tokens: 0,
                    output_tokens: 0,
                },
            },
        };
        format_sse_event("message_start", &event)
    }

    fn stop_event(&self) -> Bytes {
        format_sse_event(
            "message_stop",
            &MessageStopEvent {
                event_type: "message_stop".to_string(),
            },
        )
    }

    /// Consume a chunk, returning translated bytes for every event that
    /// became complete
    fn ingest(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut output = Vec::new();
        while let Some(boundary) = self.buffer.find("\n\n") {
            let event: String = self.buffer.drain(..boundary + 2).collect();
            for line in event.lines() {
                let line = line.trim_end_matches('\r');
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() || data == "[DONE]" {
                    continue;
                }
                let Ok(chunk) = serde_json::from_str::<OpenAiStreamChunk>(data) else {
                    continue;
                };
                let Some(text) = chunk
                    .choices
                    .first()
                    .and_then(|c| c.delta.content.as_deref())
                    .filter(|t| !t.is_empty())
                else {
                    continue;
                };
                let delta = ContentBlockDeltaEvent {
                    event_type: "content_block_delta".to_string(),
                    index: 0,
                    delta: ContentDelta::TextDelta {
                        text: text.to_string(),
                    },
                };
                output.extend_from_slice(&format_sse_event("content_block_delta", &delta));
            }
        }
        output
    }
}

impl<E> Stream for AnthropicSseStream<E> {
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if !this.started {
            this.started = true;
            return Poll::Ready(Some(Ok(this.start_event())));
        }

        loop {
            if this.finished {
                return Poll::Ready(None);
            }
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let translated = this.ingest(&chunk);
                    if !translated.is_empty() {
                        return Poll::Ready(Some(Ok(Bytes::from(translated))));
                    }
                    // Partial event only; keep polling
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    this.finished = true;
                    return Poll::Ready(Some(Ok(this.stop_event())));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// ============================================================================
// OpenAI Response Types (Input - Deserialize)
// ============================================================================

#[derive(Debug, Deserialize)]
struct OpenAiChatCompletion {
    /// Some providers omit id/object/created; nothing here depends on them
    #[serde(default)]
    #[allow(dead_code)]
    id: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    model: Option<String>,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

// ============================================================================
// Anthropic Response Types (Output - Serialize)
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicResponse {
    id: String,
    #[serde(rename = "type")]
    response_type: String,
    role: String,
    content: Vec<AnthropicContentBlock>,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequence: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Serialize)]
struct MessageStartEvent {
    #[serde(rename = "type")]
    event_type: String,
    message: MessageStartPayload,
}

#[derive(Debug, Serialize)]
struct MessageStartPayload {
    id: String,
    #[serde(rename = "type")]
    msg_type: String,
    role: String,
    content: Vec<serde_json::Value>,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequence: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Serialize)]
struct ContentBlockDeltaEvent {
    #[serde(rename = "type")]
    event_type: String,
    index: u32,
    delta: ContentDelta,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
}

#[derive(Debug, Serialize)]
struct MessageStopEvent {
    #[serde(rename = "type")]
    event_type: String,
}

/// Format an Anthropic SSE event
fn format_sse_event<T: Serialize>(event_type: &str, data: &T) -> Bytes {
    let json = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("event: {}\ndata: {}\n\n", event_type, json))
}
