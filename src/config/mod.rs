//! Configuration for the gateway
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Preference file (~/.config/ellproxy/preferences.toml)
//! 3. Built-in defaults (lowest priority)
//!
//! The preference file is written by the surrounding app; the core only
//! reads it at startup. Routing selections refer to catalog entries by
//! their `provider:id` key.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::catalog::{ModelCatalog, ModelKey, ReasoningLevel};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default inbound listening port
pub const DEFAULT_LISTEN_PORT: u16 = 8317;

/// Default upstream inference server port
pub const DEFAULT_UPSTREAM_PORT: u16 = 8318;

// ─────────────────────────────────────────────────────────────────────────────
// Application configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the gateway to (loopback only)
    pub bind_addr: SocketAddr,

    /// Port of the local upstream inference server
    pub upstream_port: u16,

    /// Directory of bundled per-provider catalog files
    pub catalog_dir: PathBuf,

    /// Directory of discovered-model overlay files
    pub overlay_dir: PathBuf,

    /// Preference file with routing toggles and selections
    pub preferences_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let base = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ellproxy");
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_LISTEN_PORT)),
            upstream_port: DEFAULT_UPSTREAM_PORT,
            catalog_dir: base.join("models"),
            overlay_dir: base.join("discovered"),
            preferences_path: base.join("preferences.toml"),
        }
    }
}

impl Config {
    /// Build configuration from defaults plus environment overrides
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(port) = env_u16("ELLPROXY_PORT") {
            config.bind_addr = SocketAddr::from(([127, 0, 0, 1], port));
        }
        if let Some(port) = env_u16("ELLPROXY_UPSTREAM_PORT") {
            config.upstream_port = port;
        }
        if let Ok(dir) = std::env::var("ELLPROXY_CATALOG_DIR") {
            config.catalog_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("ELLPROXY_DISCOVERED_DIR") {
            config.overlay_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("ELLPROXY_PREFERENCES") {
            config.preferences_path = PathBuf::from(path);
        }

        config
    }

    /// Upstream address derived from the configured port
    pub fn upstream_addr(&self) -> String {
        format!("127.0.0.1:{}", self.upstream_port)
    }
}

fn env_u16(name: &str) -> Option<u16> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

// ─────────────────────────────────────────────────────────────────────────────
// Preferences
// ─────────────────────────────────────────────────────────────────────────────

/// Scalar preferences read from the preference store at startup
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub routing_enabled: bool,
    pub notify_on_routing: bool,
    pub default_model: Option<String>,
    pub fallback_model: Option<String>,
    pub default_thinking_model: Option<String>,
    pub fallback_thinking_model: Option<String>,
    pub reasoning_level: ReasoningLevel,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            routing_enabled: true,
            notify_on_routing: true,
            default_model: None,
            fallback_model: None,
            default_thinking_model: None,
            fallback_thinking_model: None,
            reasoning_level: ReasoningLevel::Medium,
        }
    }
}

impl Preferences {
    /// Read preferences from a TOML file, falling back to defaults
    ///
    /// A missing file is normal on first run; an unparseable one is logged
    /// and ignored rather than keeping the gateway from starting.
    pub fn load(path: &std::path::Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => {
                tracing::debug!(path = %path.display(), "no preference file, using defaults");
                return Self::default();
            }
        };
        match toml::from_str(&raw) {
            Ok(prefs) => prefs,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unparseable preferences, using defaults");
                Self::default()
            }
        }
    }

    /// Push the stored selections into a freshly-loaded catalog
    ///
    /// Selections naming entries the catalog no longer has are logged and
    /// dropped, which keeps the key invariants intact after a model
    /// disappears between runs.
    pub fn apply_to(&self, catalog: &ModelCatalog) {
        catalog.set_routing_enabled(self.routing_enabled);
        catalog.set_notify_on_routing(self.notify_on_routing);
        catalog.set_reasoning_level(self.reasoning_level);

        apply_selection(&self.default_model, "default_model", |key| {
            catalog.set_default_model(Some(key))
        });
        apply_selection(&self.fallback_model, "fallback_model", |key| {
            catalog.set_fallback_model(Some(key))
        });
        apply_selection(
            &self.default_thinking_model,
            "default_thinking_model",
            |key| catalog.set_default_thinking_model(Some(key)),
        );
        apply_selection(
            &self.fallback_thinking_model,
            "fallback_thinking_model",
            |key| catalog.set_fallback_thinking_model(Some(key)),
        );
    }
}

fn apply_selection<F>(raw: &Option<String>, which: &str, set: F)
where
    F: FnOnce(ModelKey) -> anyhow::Result<()>,
{
    let Some(raw) = raw else {
        return;
    };
    let key: ModelKey = match raw.parse() {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!(preference = which, value = %raw, error = %e, "ignoring malformed selection");
            return;
        }
    };
    if let Err(e) = set(key) {
        tracing::warn!(preference = which, value = %raw, error = %e, "ignoring stale selection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ModelEntry, Provider};
    use crate::events::Notifier;

    #[test]
    fn test_default_config_uses_spec_ports() {
        let config = Config::default();
        assert_eq!(config.bind_addr.port(), 8317);
        assert_eq!(config.upstream_port, 8318);
        assert!(config.bind_addr.ip().is_loopback());
        assert_eq!(config.upstream_addr(), "127.0.0.1:8318");
    }

    #[test]
    fn test_preferences_parse_full_file() {
        let prefs: Preferences = toml::from_str(
            r#"
            routing_enabled = false
            notify_on_routing = true
            default_model = "google:gemini-2.5-flash"
            fallback_model = "qwen:qwen3-coder"
            default_thinking_model = "claude:claude-sonnet-4-5"
            reasoning_level = "high"
            "#,
        )
        .unwrap();

        assert!(!prefs.routing_enabled);
        assert_eq!(prefs.reasoning_level, ReasoningLevel::High);
        assert_eq!(
            prefs.default_model.as_deref(),
            Some("google:gemini-2.5-flash")
        );
        assert!(prefs.fallback_thinking_model.is_none());
    }

    #[test]
    fn test_preferences_missing_keys_fall_back() {
        let prefs: Preferences = toml::from_str("routing_enabled = true").unwrap();
        assert!(prefs.notify_on_routing);
        assert_eq!(prefs.reasoning_level, ReasoningLevel::Medium);
    }

    #[test]
    fn test_apply_skips_stale_selection() {
        let catalog = ModelCatalog::new(
            vec![ModelEntry {
                id: "gemini-2.5-flash".to_string(),
                name: "Gemini Flash".to_string(),
                provider: Provider::Google,
                upstream_model: "gemini-2.5-flash".to_string(),
                supports_thinking: true,
            }],
            Notifier::disabled(),
        );

        let prefs = Preferences {
            default_model: Some("google:gemini-2.5-flash".to_string()),
            fallback_model: Some("codex:gone-model".to_string()),
            ..Preferences::default()
        };
        prefs.apply_to(&catalog);

        let snapshot = catalog.snapshot();
        assert_eq!(
            snapshot.default_entry.map(|e| e.id),
            Some("gemini-2.5-flash".to_string())
        );
        assert!(snapshot.fallback_entry.is_none());
    }
}
