//! Model catalog - the routing table every request consults
//!
//! The catalog owns the model entries, the routing toggles, the selected
//! default/fallback pairs for both tracks, and the reasoning-effort level.
//! It is loaded once at startup (bundled files plus the discovered-models
//! overlay, see `store`) and mutated only by the embedding app in response
//! to UI events; the request path reads snapshots and never writes.
//!
//! Matching tries, in order: exact id, id after stripping a trailing
//! `-YYYYMMDD` date suffix, prefix (`requested` starts with `id-` or
//! `id_`), and finally the configured default entry.

mod store;

pub use store::load_catalog_entries;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{OnceLock, RwLock};

use crate::events::Notifier;

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// Backend family a model belongs to
///
/// Closed set: catalog files naming anything else fail to parse, which is
/// the earliest point the mistake can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Antigravity,
    Google,
    Qwen,
    Iflow,
    Codex,
    Claude,
    Copilot,
    Kiro,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Antigravity => "antigravity",
            Self::Google => "google",
            Self::Qwen => "qwen",
            Self::Iflow => "iflow",
            Self::Codex => "codex",
            Self::Claude => "claude",
            Self::Copilot => "copilot",
            Self::Kiro => "kiro",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "antigravity" => Ok(Self::Antigravity),
            "google" => Ok(Self::Google),
            "qwen" => Ok(Self::Qwen),
            "iflow" => Ok(Self::Iflow),
            "codex" => Ok(Self::Codex),
            "claude" => Ok(Self::Claude),
            "copilot" => Ok(Self::Copilot),
            "kiro" => Ok(Self::Kiro),
            other => Err(anyhow::anyhow!("unknown provider: {}", other)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Model entry and key
// ─────────────────────────────────────────────────────────────────────────────

/// One routable model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Stable identifier clients use (e.g. "gemini-2.5-flash")
    pub id: String,
    /// Human-readable name for notices and the UI
    pub name: String,
    /// Backend family
    pub provider: Provider,
    /// Identifier actually sent to the upstream
    pub upstream_model: String,
    /// Whether the upstream accepts a `thinking` object for this model
    #[serde(default)]
    pub supports_thinking: bool,
}

impl ModelEntry {
    pub fn key(&self) -> ModelKey {
        ModelKey {
            provider: self.provider,
            id: self.id.clone(),
        }
    }
}

/// Canonical addressable form of an entry: `provider:id`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub provider: Provider,
    pub id: String,
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.id)
    }
}

impl FromStr for ModelKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, id) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("model key must be provider:id, got {:?}", s))?;
        if id.is_empty() {
            return Err(anyhow::anyhow!("model key has empty id: {:?}", s));
        }
        Ok(Self {
            provider: provider.parse()?,
            id: id.to_string(),
        })
    }
}

/// Reasoning effort preference, sized into token budgets by the shaper
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl ReasoningLevel {
    /// Thinking token budget for pure Claude models
    pub fn budget_tokens(&self) -> u64 {
        match self {
            Self::Low => 4096,
            Self::Medium => 16000,
            Self::High => 32000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rewrite outcome
// ─────────────────────────────────────────────────────────────────────────────

/// Why a rewrite produced the model it did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteReason {
    /// Panic mode: routing disabled, everything forced to the default
    Forced,
    /// Smart mode: the catalog matched the requested name
    Matched,
    /// No match, but the request named `auto` and a default exists
    AutoDefault,
    /// Passed through unchanged
    Unchanged,
}

/// Result of routing a requested model name
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    /// The model identifier to send upstream
    pub model: String,
    /// Whether the value actually changed
    pub routed: bool,
    pub reason: RewriteReason,
    /// The catalog entry behind the rewrite, when one was involved
    pub entry: Option<ModelEntry>,
}

impl RewriteOutcome {
    fn unchanged(requested: &str) -> Self {
        Self {
            model: requested.to_string(),
            routed: false,
            reason: RewriteReason::Unchanged,
            entry: None,
        }
    }
}

/// How `match_model` found its entry (internal to rewrite)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchKind {
    Exact,
    DateSuffix,
    Prefix,
    Default,
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalog state
// ─────────────────────────────────────────────────────────────────────────────

/// Bounded length of the recently-used list
const RECENT_KEYS_LIMIT: usize = 5;

#[derive(Debug, Default)]
struct CatalogState {
    entries: Vec<ModelEntry>,
    routing_enabled: bool,
    notify_on_routing: bool,
    default_model_key: Option<ModelKey>,
    fallback_model_key: Option<ModelKey>,
    default_thinking_model_key: Option<ModelKey>,
    fallback_thinking_model_key: Option<ModelKey>,
    reasoning_level: ReasoningLevel,
    recent_keys: Vec<ModelKey>,
}

impl CatalogState {
    fn entry_for(&self, key: &ModelKey) -> Option<&ModelEntry> {
        self.entries
            .iter()
            .find(|e| e.provider == key.provider && e.id == key.id)
    }

    fn default_entry(&self) -> Option<&ModelEntry> {
        self.default_model_key.as_ref().and_then(|k| self.entry_for(k))
    }
}

/// Selections and flags the request path needs, cloned out in one lock hold
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub routing_enabled: bool,
    pub notify_on_routing: bool,
    pub reasoning_level: ReasoningLevel,
    pub default_entry: Option<ModelEntry>,
    pub fallback_entry: Option<ModelEntry>,
    pub default_thinking_entry: Option<ModelEntry>,
    pub fallback_thinking_entry: Option<ModelEntry>,
}

/// The shared catalog: readable concurrently, mutated by a single writer
pub struct ModelCatalog {
    state: RwLock<CatalogState>,
    notifier: Notifier,
}

impl ModelCatalog {
    pub fn new(entries: Vec<ModelEntry>, notifier: Notifier) -> Self {
        Self {
            state: RwLock::new(CatalogState {
                entries,
                routing_enabled: true,
                notify_on_routing: true,
                ..CatalogState::default()
            }),
            notifier,
        }
    }

    // ─── Matching and rewriting ──────────────────────────────────────────────

    /// Resolve a requested model name to a catalog entry
    ///
    /// Falls back to the configured default when nothing matches; `None`
    /// only when the default is unset too.
    pub fn match_model(&self, requested: &str) -> Option<ModelEntry> {
        let state = self.state.read().ok()?;
        match_in(&state, requested).map(|(entry, _)| entry.clone())
    }

    /// Rewrite a requested model to the upstream identifier
    ///
    /// Panic mode (routing disabled with a default set) forces everything
    /// to the default. Smart mode routes through `match_model`, treats a
    /// requested name containing `auto` as a default request, and otherwise
    /// passes the name through untouched. Rewrites that change the value
    /// publish a notice when `notify_on_routing` is set.
    pub fn rewrite(&self, requested: &str) -> RewriteOutcome {
        let state = match self.state.read() {
            Ok(guard) => guard,
            Err(_) => return RewriteOutcome::unchanged(requested),
        };

        if !state.routing_enabled {
            if let Some(entry) = state.default_entry() {
                let routed = entry.upstream_model != requested;
                let outcome = RewriteOutcome {
                    model: entry.upstream_model.clone(),
                    routed,
                    reason: RewriteReason::Forced,
                    entry: Some(entry.clone()),
                };
                if routed && state.notify_on_routing {
                    self.notifier.notify(format!(
                        "Default Model: {} ({})",
                        entry.upstream_model, entry.provider
                    ));
                }
                return outcome;
            }
            // Panic mode without a default behaves like passthrough
            return RewriteOutcome::unchanged(requested);
        }

        match match_in(&state, requested) {
            Some((entry, kind)) if kind != MatchKind::Default => {
                let routed = entry.upstream_model != requested;
                let outcome = RewriteOutcome {
                    model: entry.upstream_model.clone(),
                    routed,
                    reason: RewriteReason::Matched,
                    entry: Some(entry.clone()),
                };
                if routed && state.notify_on_routing {
                    self.notifier.notify(format!(
                        "Using Model: {} ({})",
                        entry.upstream_model, entry.provider
                    ));
                }
                outcome
            }
            _ if requested.to_ascii_lowercase().contains("auto") => {
                match state.default_entry() {
                    Some(entry) => {
                        let routed = entry.upstream_model != requested;
                        let outcome = RewriteOutcome {
                            model: entry.upstream_model.clone(),
                            routed,
                            reason: RewriteReason::AutoDefault,
                            entry: Some(entry.clone()),
                        };
                        if routed && state.notify_on_routing {
                            self.notifier.notify(format!(
                                "Using Model: {} ({})",
                                entry.upstream_model, entry.provider
                            ));
                        }
                        outcome
                    }
                    None => RewriteOutcome::unchanged(requested),
                }
            }
            _ => RewriteOutcome::unchanged(requested),
        }
    }

    // ─── Read access ─────────────────────────────────────────────────────────

    /// Clone the selections and flags the request path needs
    pub fn snapshot(&self) -> CatalogSnapshot {
        // A poisoned lock still holds consistent data; keep serving
        let state = match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        CatalogSnapshot {
            routing_enabled: state.routing_enabled,
            notify_on_routing: state.notify_on_routing,
            reasoning_level: state.reasoning_level,
            default_entry: state.default_entry().cloned(),
            fallback_entry: state
                .fallback_model_key
                .as_ref()
                .and_then(|k| state.entry_for(k))
                .cloned(),
            default_thinking_entry: state
                .default_thinking_model_key
                .as_ref()
                .and_then(|k| state.entry_for(k))
                .cloned(),
            fallback_thinking_entry: state
                .fallback_thinking_model_key
                .as_ref()
                .and_then(|k| state.entry_for(k))
                .cloned(),
        }
    }

    pub fn entries(&self) -> Vec<ModelEntry> {
        self.state
            .read()
            .map(|s| s.entries.clone())
            .unwrap_or_default()
    }

    pub fn recent_keys(&self) -> Vec<ModelKey> {
        self.state
            .read()
            .map(|s| s.recent_keys.clone())
            .unwrap_or_default()
    }

    // ─── Mutation (driven by the embedding app, never the request path) ──────

    pub fn set_routing_enabled(&self, enabled: bool) {
        if let Ok(mut state) = self.state.write() {
            state.routing_enabled = enabled;
        }
    }

    pub fn set_notify_on_routing(&self, enabled: bool) {
        if let Ok(mut state) = self.state.write() {
            state.notify_on_routing = enabled;
        }
    }

    pub fn set_reasoning_level(&self, level: ReasoningLevel) {
        if let Ok(mut state) = self.state.write() {
            state.reasoning_level = level;
        }
    }

    /// Select the fast-track default; the key must name an existing entry
    pub fn set_default_model(&self, key: Option<ModelKey>) -> anyhow::Result<()> {
        self.set_key(key, KeySlot::Default)
    }

    pub fn set_fallback_model(&self, key: Option<ModelKey>) -> anyhow::Result<()> {
        self.set_key(key, KeySlot::Fallback)
    }

    /// Select the thinking-track default; the entry must support thinking
    pub fn set_default_thinking_model(&self, key: Option<ModelKey>) -> anyhow::Result<()> {
        self.set_key(key, KeySlot::DefaultThinking)
    }

    pub fn set_fallback_thinking_model(&self, key: Option<ModelKey>) -> anyhow::Result<()> {
        self.set_key(key, KeySlot::FallbackThinking)
    }

    fn set_key(&self, key: Option<ModelKey>, slot: KeySlot) -> anyhow::Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| anyhow::anyhow!("catalog lock poisoned"))?;
        if let Some(ref k) = key {
            let entry = state
                .entry_for(k)
                .ok_or_else(|| anyhow::anyhow!("no catalog entry for {}", k))?;
            if slot.requires_thinking() && !entry.supports_thinking {
                return Err(anyhow::anyhow!(
                    "{} does not support thinking and cannot be a thinking selection",
                    k
                ));
            }
        }
        match slot {
            KeySlot::Default => state.default_model_key = key,
            KeySlot::Fallback => state.fallback_model_key = key,
            KeySlot::DefaultThinking => state.default_thinking_model_key = key,
            KeySlot::FallbackThinking => state.fallback_thinking_model_key = key,
        }
        Ok(())
    }

    /// Insert an entry, replacing any existing one with the same (provider, id)
    pub fn upsert_entry(&self, entry: ModelEntry) {
        if let Ok(mut state) = self.state.write() {
            match state
                .entries
                .iter_mut()
                .find(|e| e.provider == entry.provider && e.id == entry.id)
            {
                Some(existing) => *existing = entry,
                None => state.entries.push(entry),
            }
        }
    }

    /// Delete an entry and repair any selection that referenced it
    ///
    /// The fast-track default falls back to the first remaining entry; every
    /// other selection is cleared. The key also leaves the recents list.
    pub fn delete_entry(&self, key: &ModelKey) {
        let Ok(mut state) = self.state.write() else {
            return;
        };
        state
            .entries
            .retain(|e| !(e.provider == key.provider && e.id == key.id));
        state.recent_keys.retain(|k| k != key);

        if state.default_model_key.as_ref() == Some(key) {
            let replacement = state.entries.first().map(ModelEntry::key);
            state.default_model_key = replacement;
        }
        if state.fallback_model_key.as_ref() == Some(key) {
            state.fallback_model_key = None;
        }
        if state.default_thinking_model_key.as_ref() == Some(key) {
            state.default_thinking_model_key = None;
        }
        if state.fallback_thinking_model_key.as_ref() == Some(key) {
            state.fallback_thinking_model_key = None;
        }
    }

    /// Push a key to the front of the recents list (bounded, deduplicated)
    pub fn record_recent(&self, key: ModelKey) {
        if let Ok(mut state) = self.state.write() {
            state.recent_keys.retain(|k| k != &key);
            state.recent_keys.insert(0, key);
            state.recent_keys.truncate(RECENT_KEYS_LIMIT);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum KeySlot {
    Default,
    Fallback,
    DefaultThinking,
    FallbackThinking,
}

impl KeySlot {
    fn requires_thinking(&self) -> bool {
        matches!(self, Self::DefaultThinking | Self::FallbackThinking)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Matching helpers
// ─────────────────────────────────────────────────────────────────────────────

fn date_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-\d{8}$").expect("valid regex"))
}

/// Strip a trailing `-YYYYMMDD` date suffix, if present
fn strip_date_suffix(requested: &str) -> Option<&str> {
    date_suffix_re()
        .find(requested)
        .map(|m| &requested[..m.start()])
}

fn match_in<'a>(state: &'a CatalogState, requested: &str) -> Option<(&'a ModelEntry, MatchKind)> {
    // 1. Exact id
    if let Some(entry) = state.entries.iter().find(|e| e.id == requested) {
        return Some((entry, MatchKind::Exact));
    }

    // 2. Exact after stripping a -YYYYMMDD date suffix
    if let Some(stripped) = strip_date_suffix(requested) {
        if let Some(entry) = state.entries.iter().find(|e| e.id == stripped) {
            return Some((entry, MatchKind::DateSuffix));
        }
    }

    // 3. Prefix: requested extends an id with "-" or "_"
    if let Some(entry) = state.entries.iter().find(|e| {
        requested.starts_with(&format!("{}-", e.id)) || requested.starts_with(&format!("{}_", e.id))
    }) {
        return Some((entry, MatchKind::Prefix));
    }

    // 4. The configured default, when there is one
    state.default_entry().map(|e| (e, MatchKind::Default))
}
