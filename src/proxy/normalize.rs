//! Payload normalizer - repairs known client payload bugs
//!
//! Some clients nest a text object where a string belongs, or send image
//! blocks in shapes the upstream rejects. Two independent rewrites fix the
//! cases seen in the wild:
//!
//! - nested-text fix: `{"type": "text", "text": {"text": "..."}}` collapses
//!   to the inner string
//! - image normalization: bare `image` / `image_url` items gain the
//!   canonical `{"type": "image_url", "image_url": {"url": ...}}` wrapper,
//!   and a text block whose string is a base64 image data URL is
//!   reclassified as an image
//!
//! Both rewrites are idempotent and leave clean payloads untouched.

use serde_json::{json, Value};

/// Normalize every content item of every message in place
pub fn normalize_payload(body: &mut Value) {
    let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
        return;
    };

    for message in messages {
        let Some(content) = message.get_mut("content").and_then(Value::as_array_mut) else {
            continue;
        };
        for item in content {
            fix_nested_text(item);
            normalize_image(item);
        }
    }
}

/// Collapse `{"type": "text", "text": {"text": "..."}}` to the inner string
fn fix_nested_text(item: &mut Value) {
    if item.get("type").and_then(Value::as_str) != Some("text") {
        return;
    }
    let inner = item
        .get("text")
        .and_then(|t| t.as_object())
        .and_then(|obj| obj.get("text"))
        .and_then(Value::as_str)
        .map(String::from);
    if let Some(inner) = inner {
        item["text"] = json!(inner);
    }
}

/// Rewrite non-standard image shapes into the canonical wrapper
fn normalize_image(item: &mut Value) {
    let kind = item
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match kind.as_str() {
        "image" | "image_url" => {
            if item
                .get("image_url")
                .map(|v| v.is_object() && v.get("url").is_some())
                .unwrap_or(false)
            {
                return; // already canonical
            }
            if let Some(url) = extract_image_url(item) {
                *item = json!({"type": "image_url", "image_url": {"url": url}});
            }
        }
        "text" => {
            // A text block that is actually an inline image data URL
            let data_url = item
                .get("text")
                .and_then(Value::as_str)
                .filter(|s| s.starts_with("data:image/") && s.contains(";base64,"))
                .map(String::from);
            if let Some(url) = data_url {
                *item = json!({"type": "image_url", "image_url": {"url": url}});
            }
        }
        _ => {}
    }
}

/// Pull a usable URL out of the non-standard image shapes clients send
fn extract_image_url(item: &Value) -> Option<String> {
    // {"image_url": "https://..."} with a bare string
    if let Some(url) = item.get("image_url").and_then(Value::as_str) {
        return Some(url.to_string());
    }
    // {"url": "https://..."} directly on the item
    if let Some(url) = item.get("url").and_then(Value::as_str) {
        return Some(url.to_string());
    }
    // Anthropic-style {"source": {"media_type": ..., "data": ...}}
    if let Some(source) = item.get("source") {
        let media_type = source.get("media_type").and_then(Value::as_str)?;
        let data = source.get("data").and_then(Value::as_str)?;
        return Some(format!("data:{};base64,{}", media_type, data));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_text_collapses() {
        let mut body = json!({
            "messages": [{
                "role": "user",
                "content": [{"type": "text", "text": {"text": "hello"}}]
            }]
        });
        normalize_payload(&mut body);
        assert_eq!(body["messages"][0]["content"][0]["text"], "hello");
    }

    #[test]
    fn test_bare_image_url_string_gains_wrapper() {
        let mut body = json!({
            "messages": [{
                "role": "user",
                "content": [{"type": "image_url", "image_url": "https://example.com/x.png"}]
            }]
        });
        normalize_payload(&mut body);
        assert_eq!(
            body["messages"][0]["content"][0],
            json!({"type": "image_url", "image_url": {"url": "https://example.com/x.png"}})
        );
    }

    #[test]
    fn test_image_with_source_becomes_data_url() {
        let mut body = json!({
            "messages": [{
                "role": "user",
                "content": [{
                    "type": "image",
                    "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}
                }]
            }]
        });
        normalize_payload(&mut body);
        assert_eq!(
            body["messages"][0]["content"][0],
            json!({"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}})
        );
    }

    #[test]
    fn test_data_url_text_reclassified_as_image() {
        let mut body = json!({
            "messages": [{
                "role": "user",
                "content": [{"type": "text", "text": "data:image/jpeg;base64,/9j/4AAQ"}]
            }]
        });
        normalize_payload(&mut body);
        let item = &body["messages"][0]["content"][0];
        assert_eq!(item["type"], "image_url");
        assert_eq!(item["image_url"]["url"], "data:image/jpeg;base64,/9j/4AAQ");
    }

    #[test]
    fn test_clean_payload_passes_through() {
        let original = json!({
            "messages": [
                {"role": "user", "content": "plain string content"},
                {"role": "user", "content": [
                    {"type": "text", "text": "hello"},
                    {"type": "image_url", "image_url": {"url": "https://example.com/x.png"}}
                ]}
            ]
        });
        let mut body = original.clone();
        normalize_payload(&mut body);
        assert_eq!(body, original);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let mut body = json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": {"text": "nested"}},
                    {"type": "image_url", "image_url": "https://example.com/x.png"},
                    {"type": "text", "text": "data:image/png;base64,AAAA"}
                ]
            }]
        });
        normalize_payload(&mut body);
        let once = body.clone();
        normalize_payload(&mut body);
        assert_eq!(body, once);
    }
}
