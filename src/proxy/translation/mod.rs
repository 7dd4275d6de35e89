//! API translation - the bridge between Anthropic Messages and OpenAI Chat
//! Completions
//!
//! The gateway exposes `/v1/messages` to Anthropic-dialect clients but only
//! speaks OpenAI to the upstream, so this module converts in both
//! directions:
//!
//! ```text
//! Client request (Anthropic)
//!     ↓ request::translate_request      Anthropic → OpenAI
//! [shaping + dispatch]
//!     ↓ response::translate_response    OpenAI → Anthropic (buffered)
//!     ↓ response::AnthropicSseStream    OpenAI SSE → Anthropic SSE
//! Client response (Anthropic)
//! ```
//!
//! Request translation also hydrates `reasoning_content` on every prior
//! assistant turn from the reasoning cache, because some thinking upstreams
//! reject conversations without it.

pub mod request;
pub mod response;

pub use request::{translate_request, TranslatedRequest};
pub use response::{translate_response, AnthropicSseStream};

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Generate an Anthropic-style message id: `msg_` plus 24 hex characters
///
/// Uniqueness within one process is all callers need; wall clock plus a
/// counter hashed together avoids pulling in an RNG.
pub fn generate_message_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(timestamp.to_le_bytes());
    hasher.update(count.to_le_bytes());
    let hash = hasher.finalize();

    let hex: String = hash[..12].iter().map(|b| format!("{:02x}", b)).collect();
    format!("msg_{}", hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_shape() {
        let id = generate_message_id();
        assert!(id.starts_with("msg_"));
        assert_eq!(id.len(), "msg_".len() + 24);
    }

    #[test]
    fn test_message_ids_unique() {
        let a = generate_message_id();
        let b = generate_message_id();
        assert_ne!(a, b);
    }
}
