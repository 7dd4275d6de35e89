//! Thinking shaper - routes the model field and sizes extended reasoning
//!
//! Operates on a decoded OpenAI-format chat request (the Anthropic path
//! converts first). Responsibilities, in order:
//!
//! 1. Sync bypass: probe requests skip routing entirely
//! 2. Alias expansion: `ellproxy-default` / `ellproxy-thinking`
//! 3. General routing through the catalog
//! 4. Capability reconciliation: a `thinking` object on a model that
//!    cannot think either re-routes to the thinking default or is stripped
//! 5. Reasoning-level injection: budget for Claude models, native
//!    `thinkingLevel` for Gemini, explicit `-thinking-N` suffix budgets
//!
//! The returned flag tells the dispatcher which fallback chain a 429
//! should walk.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::catalog::{CatalogSnapshot, ModelCatalog, ModelEntry, RewriteReason};
use crate::events::Notifier;

/// Ceiling for any thinking budget or adjusted token limit
pub const THINKING_HARD_CAP: u64 = 32000;

/// Smallest gap kept between budget and max tokens
pub const MINIMUM_HEADROOM: u64 = 1024;

/// Budget injected when a fallback model needs a thinking object
pub const DEFAULT_THINKING_BUDGET: u64 = 16000;

/// Alias resolved to the fast-track default
pub const ALIAS_DEFAULT: &str = "ellproxy-default";

/// Alias resolved to the thinking-track default
pub const ALIAS_THINKING: &str = "ellproxy-thinking";

/// Shapes chat request bodies against the live catalog
pub struct ThinkingShaper {
    catalog: Arc<ModelCatalog>,
    notifier: Notifier,
}

impl ThinkingShaper {
    pub fn new(catalog: Arc<ModelCatalog>, notifier: Notifier) -> Self {
        Self { catalog, notifier }
    }

    /// Route and shape `body` in place; returns whether thinking ended up enabled
    ///
    /// `sync_bypass` is set for probe requests carrying the private test
    /// header: the model passes through untouched so probes observe the
    /// upstream as-is.
    pub fn shape(&self, body: &mut Value, sync_bypass: bool) -> bool {
        let Some(requested) = body.get("model").and_then(|m| m.as_str()).map(String::from)
        else {
            return false;
        };

        if sync_bypass {
            return false;
        }

        let snapshot = self.catalog.snapshot();

        // Routing: aliases first, then the catalog
        let (entry, route) = self.route(body, &requested, &snapshot);

        // Reconcile an inbound thinking object against the routed model
        let entry = self.reconcile_capability(body, entry, &snapshot);

        // Inject or size thinking parameters for the final model
        self.inject_reasoning(body, &requested, entry.as_ref(), route, &snapshot);

        body.get("thinking").map(Value::is_object).unwrap_or(false)
            || body.get("thinkingLevel").is_some()
    }

    /// Alias expansion plus general routing; returns the entry now in effect
    fn route(
        &self,
        body: &mut Value,
        requested: &str,
        snapshot: &CatalogSnapshot,
    ) -> (Option<ModelEntry>, RouteKind) {
        if requested == ALIAS_DEFAULT {
            if let Some(entry) = &snapshot.default_entry {
                body["model"] = json!(entry.upstream_model);
                if snapshot.notify_on_routing {
                    self.notifier
                        .notify(format!("Default Model: {}", entry.upstream_model));
                }
                return (Some(entry.clone()), RouteKind::Alias);
            }
            return (None, RouteKind::Passthrough);
        }
        if requested == ALIAS_THINKING {
            if let Some(entry) = &snapshot.default_thinking_entry {
                body["model"] = json!(entry.upstream_model);
                if snapshot.notify_on_routing {
                    self.notifier
                        .notify(format!("Thinking Model: {}", entry.upstream_model));
                }
                return (Some(entry.clone()), RouteKind::Alias);
            }
            return (None, RouteKind::Passthrough);
        }

        let outcome = self.catalog.rewrite(requested);
        body["model"] = json!(outcome.model);
        match outcome.reason {
            RewriteReason::Forced | RewriteReason::AutoDefault => {
                (outcome.entry, RouteKind::Replaced)
            }
            RewriteReason::Matched => (outcome.entry, RouteKind::Matched),
            RewriteReason::Unchanged => (None, RouteKind::Passthrough),
        }
    }

    /// Step 4: a thinking object on a model that cannot think
    ///
    /// Returns the entry in effect afterwards, which changes when the
    /// request moves to the thinking default.
    fn reconcile_capability(
        &self,
        body: &mut Value,
        entry: Option<ModelEntry>,
        snapshot: &CatalogSnapshot,
    ) -> Option<ModelEntry> {
        let has_thinking = body.get("thinking").map(Value::is_object).unwrap_or(false);
        let Some(current) = entry else {
            return None;
        };
        if !has_thinking || current.supports_thinking {
            return Some(current);
        }

        if let Some(thinking_entry) = &snapshot.default_thinking_entry {
            body["model"] = json!(thinking_entry.upstream_model);
            if snapshot.notify_on_routing {
                self.notifier
                    .notify(format!("Thinking Model: {}", thinking_entry.upstream_model));
            }
            return Some(thinking_entry.clone());
        }

        if let Some(obj) = body.as_object_mut() {
            obj.remove("thinking");
        }
        Some(current)
    }

    /// Step 5: reasoning-level injection and explicit suffix budgets
    fn inject_reasoning(
        &self,
        body: &mut Value,
        requested: &str,
        entry: Option<&ModelEntry>,
        route: RouteKind,
        snapshot: &CatalogSnapshot,
    ) {
        // An explicit -thinking-N suffix on the requested name wins, unless
        // the catalog consumed the whole name (forced/auto routing, or a
        // matched id that itself ends with the suffix - then the name was
        // literal, not an instruction).
        if route != RouteKind::Replaced {
            if let Some((base, budget)) = split_thinking_suffix(requested) {
                let suffix = &requested[base.len()..];
                let literal = entry.map(|e| e.id.ends_with(suffix)).unwrap_or(false);
                if !literal {
                    if route == RouteKind::Passthrough {
                        // Nothing routed; the stripped base is the outbound model
                        body["model"] = json!(base);
                    }
                    if let Some(n) = budget {
                        let budget = n.min(THINKING_HARD_CAP - 1);
                        body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
                        ensure_token_headroom(body, budget);
                    }
                    return;
                }
            }
        }

        let model = body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string();

        if model.starts_with("claude-") && !model.contains("-thinking-") {
            let budget = snapshot.reasoning_level.budget_tokens();
            body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
            ensure_token_headroom(body, budget);
            return;
        }

        let thinking_capable = entry.map(|e| e.supports_thinking).unwrap_or(false);
        if model.starts_with("gemini-") && thinking_capable {
            body["thinkingLevel"] = json!(snapshot.reasoning_level.as_str());
        }
    }
}

/// How routing arrived at the outbound model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteKind {
    /// An alias selected a configured default
    Alias,
    /// The catalog matched the requested name
    Matched,
    /// Panic mode or `auto` replaced the name wholesale
    Replaced,
    /// Unrouted; the requested name survives
    Passthrough,
}

/// Split a trailing `-thinking-N` suffix off a model name
///
/// Returns the base name plus `Some(N)` for a valid positive integer, or
/// `None` when the tail is not one (the suffix is still stripped in that
/// case, just without thinking parameters).
fn split_thinking_suffix(model: &str) -> Option<(&str, Option<u64>)> {
    const MARKER: &str = "-thinking-";
    let idx = model.rfind(MARKER)?;
    let tail = &model[idx + MARKER.len()..];
    let budget = tail.parse::<u64>().ok().filter(|n| *n > 0);
    Some((&model[..idx], budget))
}

/// The max-tokens value a given budget demands
///
/// `budget + max(1024, budget / 10)`, capped at the hard limit, but always
/// strictly above the budget; the cap loses that fight.
fn required_max_tokens(budget: u64) -> u64 {
    let headroom = MINIMUM_HEADROOM.max(budget / 10);
    let required = (budget + headroom).min(THINKING_HARD_CAP);
    if required > budget {
        required
    } else {
        budget + 1
    }
}

/// Raise the output-token limit fields to clear the thinking budget
///
/// Every present field among `max_tokens` / `max_output_tokens` that is at
/// or below the budget is raised; values already above it stay. When
/// neither field is present, `max_tokens` is written.
pub(crate) fn ensure_token_headroom(body: &mut Value, budget: u64) {
    let required = required_max_tokens(budget);
    let mut any_present = false;

    for field in ["max_tokens", "max_output_tokens"] {
        if let Some(current) = body.get(field).and_then(|v| v.as_u64()) {
            any_present = true;
            if current <= budget {
                body[field] = json!(required);
            }
        }
    }

    if !any_present {
        body["max_tokens"] = json!(required);
    }
}
