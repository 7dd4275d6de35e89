//! Anthropic → OpenAI request translation
//!
//! Converts Anthropic Messages API requests to OpenAI Chat Completions
//! format so a single OpenAI-dialect upstream can serve Anthropic clients.
//!
//! # Key differences
//!
//! | Anthropic                       | OpenAI                           |
//! |---------------------------------|----------------------------------|
//! | Top-level `system` field        | `messages[].role: "system"`      |
//! | `content` blocks                | string or content parts          |
//! | `tool_use` block                | `tool_calls` on the message      |
//! | `tool_result` block             | separate `role: "tool"` message  |
//! | `stop_sequences` (array)        | `stop`                           |
//!
//! Every assistant turn additionally gains a `reasoning_content` field,
//! looked up in the reasoning cache (or its sentinel default), because some
//! thinking upstreams require the field on all prior assistant messages.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::ModelCatalog;
use crate::reasoning::ReasoningCache;

/// Result of translating an Anthropic request
pub struct TranslatedRequest {
    /// The OpenAI-format body, ready for the shaper
    pub body: Value,
    /// Model name the client originally asked for
    pub original_model: String,
    /// Whether the client requested streaming
    pub stream: bool,
}

/// Translate an Anthropic Messages request body into OpenAI format
pub fn translate_request(
    body: &[u8],
    catalog: &ModelCatalog,
    cache: &ReasoningCache,
) -> Result<TranslatedRequest> {
    let request: AnthropicRequest = serde_json::from_slice(body).map_err(|e| {
        let preview = String::from_utf8_lossy(&body[..body.len().min(200)]);
        tracing::debug!(error = %e, preview = %preview, "unparseable Anthropic request");
        anyhow::anyhow!("Failed to parse Anthropic request: {}", e)
    })?;

    let mut messages: Vec<OpenAiMessage> = Vec::new();

    // Flatten the system prompt into a leading system message
    if let Some(system) = &request.system {
        let text = match system {
            SystemPrompt::Text(text) => text.clone(),
            SystemPrompt::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    SystemBlock::Text { text } => text.as_str(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        };
        if !text.is_empty() {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: Some(OpenAiContent::Text(text)),
                tool_calls: None,
                tool_call_id: None,
                reasoning_content: None,
            });
        }
    }

    for message in &request.messages {
        messages.extend(convert_message(message, cache));
    }

    let outcome = catalog.rewrite(&request.model);

    let openai = OpenAiChatRequest {
        model: outcome.model,
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences.clone(),
        stream: request.stream,
        tools: request
            .tools
            .map(|tools| tools.into_iter().map(convert_tool).collect()),
        tool_choice: request.tool_choice.map(convert_tool_choice),
        // Passed through untouched so the shaper can reconcile it against
        // the routed model's capabilities
        thinking: request.thinking.clone(),
    };

    let body = serde_json::to_value(&openai).context("Failed to serialize OpenAI request")?;

    Ok(TranslatedRequest {
        body,
        original_model: request.model,
        stream: request.stream.unwrap_or(false),
    })
}

// ============================================================================
// Anthropic Request Types (Input - Deserialize)
// ============================================================================

#[derive(Debug, Deserialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(default)]
    system: Option<SystemPrompt>,
    #[serde(default)]
    max_tokens: Option<u64>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    tools: Option<Vec<AnthropicTool>>,
    #[serde(default)]
    tool_choice: Option<AnthropicToolChoice>,
    #[serde(default)]
    thinking: Option<Value>,
    // Ignored fields
    #[serde(default)]
    #[allow(dead_code)]
    metadata: Option<Value>,
    #[serde(default)]
    #[allow(dead_code)]
    top_k: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum SystemBlock {
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: ImageSource },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<ToolResultContent>,
    },
    // Extended thinking blocks are not replayed upstream; the reasoning
    // cache carries that state instead
    #[serde(rename = "thinking")]
    Thinking {
        #[allow(dead_code)]
        thinking: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolResultContent {
    Text(String),
    Blocks(Vec<ToolResultBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ToolResultBlock {
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Deserialize)]
struct ImageSource {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicToolChoice {
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "any")]
    Any,
    #[serde(rename = "tool")]
    Tool { name: String },
}

// ============================================================================
// OpenAI Request Types (Output - Serialize)
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<OpenAiToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Value>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<OpenAiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_content: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum OpenAiContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAiToolChoice {
    Mode(String),
    Specific {
        #[serde(rename = "type")]
        choice_type: String,
        function: ToolChoiceFunction,
    },
}

#[derive(Debug, Serialize)]
struct ToolChoiceFunction {
    name: String,
}

// ============================================================================
// Conversion Functions
// ============================================================================

/// Convert an Anthropic message to OpenAI format
///
/// A single Anthropic message may produce multiple OpenAI messages:
/// tool_result blocks become separate `role: "tool"` messages.
fn convert_message(msg: &AnthropicMessage, cache: &ReasoningCache) -> Vec<OpenAiMessage> {
    let is_assistant = msg.role == "assistant";

    match &msg.content {
        AnthropicContent::Text(text) => {
            let reasoning_content = is_assistant.then(|| cache.retrieve(text));
            vec![OpenAiMessage {
                role: msg.role.clone(),
                content: Some(OpenAiContent::Text(text.clone())),
                tool_calls: None,
                tool_call_id: None,
                reasoning_content,
            }]
        }
        AnthropicContent::Blocks(blocks) => {
            let mut messages: Vec<OpenAiMessage> = Vec::new();
            let mut text_parts: Vec<String> = Vec::new();
            let mut image_parts: Vec<OpenAiContentPart> = Vec::new();
            let mut tool_calls: Vec<OpenAiToolCall> = Vec::new();

            for block in blocks {
                match block {
                    AnthropicContentBlock::Text { text } => {
                        text_parts.push(text.clone());
                    }
                    AnthropicContentBlock::Image { source } => {
                        let data_url = format!("data:{};base64,{}", source.media_type, source.data);
                        image_parts.push(OpenAiContentPart::ImageUrl {
                            image_url: ImageUrl { url: data_url },
                        });
                    }
                    AnthropicContentBlock::ToolUse { id, name, input } => {
                        tool_calls.push(OpenAiToolCall {
                            id: id.clone(),
                            call_type: "function".to_string(),
                            function: OpenAiFunctionCall {
                                name: name.clone(),
                                arguments: serde_json::to_string(input).unwrap_or_default(),
                            },
                        });
                    }
                    AnthropicContentBlock::ToolResult {
                        tool_use_id,
                        content,
                    } => {
                        // Tool results become separate messages with role: "tool"
                        let result_text = content
                            .as_ref()
                            .map(|c| match c {
                                ToolResultContent::Text(text) => text.clone(),
                                ToolResultContent::Blocks(blocks) => blocks
                                    .iter()
                                    .map(|b| match b {
                                        ToolResultBlock::Text { text } => text.as_str(),
                                    })
                                    .collect::<Vec<_>>()
                                    .join("\n"),
                            })
                            .unwrap_or_default();

                        messages.push(OpenAiMessage {
                            role: "tool".to_string(),
                            content: Some(OpenAiContent::Text(result_text)),
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id.clone()),
                            reasoning_content: None,
                        });
                    }
                    AnthropicContentBlock::Thinking { .. } => {
                        // Dropped here; reasoning_content below carries the state
                    }
                }
            }

            if !text_parts.is_empty() || !image_parts.is_empty() || !tool_calls.is_empty() {
                let flattened_text = text_parts.join("");
                let reasoning_content = is_assistant.then(|| cache.retrieve(&flattened_text));

                let content = if !image_parts.is_empty() {
                    let mut parts: Vec<OpenAiContentPart> = text_parts
                        .into_iter()
                        .map(|text| OpenAiContentPart::Text { text })
                        .collect();
                    parts.extend(image_parts);
                    Some(OpenAiContent::Parts(parts))
                } else if !flattened_text.is_empty() {
                    Some(OpenAiContent::Text(flattened_text))
                } else {
                    None
                };

                messages.insert(
                    0,
                    OpenAiMessage {
                        role: msg.role.clone(),
                        content,
                        tool_calls: if tool_calls.is_empty() {
                            None
                        } else {
                            Some(tool_calls)
                        },
                        tool_call_id: None,
                        reasoning_content,
                    },
                );
            }

            // Blocks that produced nothing still need a placeholder message
            if messages.is_empty() {
                messages.push(OpenAiMessage {
                    role: msg.role.clone(),
                    content: Some(OpenAiContent::Text(String::new())),
                    tool_calls: None,
                    tool_call_id: None,
                    reasoning_content: is_assistant.then(|| cache.retrieve("")),
                });
            }

            messages
        }
    }
}

/// Convert an Anthropic tool definition to OpenAI format
fn convert_tool(tool: AnthropicTool) -> OpenAiTool {
    OpenAiTool {
        tool_type: "function".to_string(),
        function: OpenAiFunction {
            name: tool.name,
            description: tool.description,
            parameters: tool.input_schema,
        },
    }
}

/// Convert Anthropic tool_choice to OpenAI format
fn convert_tool_choice(choice: AnthropicToolChoice) -> OpenAiToolChoice {
    match choice {
        AnthropicToolChoice::Auto => OpenAiToolChoice::Mode("auto".to_string()),
        AnthropicToolChoice::Any => OpenAiToolChoice::Mode("required".to_string()),
        AnthropicToolChoice::Tool { name } => OpenAiToolChoice::Specific {
            choice_type: "function".to_string(),
            function: ToolChoiceFunction { name },
        },
    }
}
