// Routing events that flow from the request path to the embedding app
//
// The gateway never renders anything itself; whenever routing changes a
// request (panic-mode force, alias expansion, rate-limit fallback) it pushes
// a human-readable notice onto a channel and moves on. The surrounding app
// decides whether that becomes a desktop notification, a log line, or
// nothing at all.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// A single human-readable routing notice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingNotice {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl RoutingNotice {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Cloneable handle for publishing routing notices
///
/// Sends never block and never fail the request path: a full or closed
/// channel drops the notice. `Notifier::disabled()` gives components a
/// no-op sink for tests and for embedders that don't consume notices.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Option<mpsc::Sender<RoutingNotice>>,
}

impl Notifier {
    /// Create a notifier and the receiving end the embedding app drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RoutingNotice>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier that drops everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Publish a notice, ignoring a slow or closed consumer
    pub fn notify(&self, message: impl Into<String>) {
        let Some(tx) = &self.tx else {
            return;
        };
        let notice = RoutingNotice::new(message);
        tracing::debug!(message = %notice.message, "routing notice");
        let _ = tx.try_send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_delivers_message() {
        let (notifier, mut rx) = Notifier::channel(8);
        notifier.notify("Using Model: gemini-2.5-flash (google)");

        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.message, "Using Model: gemini-2.5-flash (google)");
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (notifier, mut rx) = Notifier::channel(1);
        notifier.notify("first");
        notifier.notify("second");

        assert_eq!(rx.try_recv().unwrap().message, "first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disabled_notifier_is_silent() {
        let notifier = Notifier::disabled();
        // Must not panic or block
        notifier.notify("ignored");
    }
}
