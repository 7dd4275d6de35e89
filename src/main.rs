// EllProxy core - local inference gateway
//
// A loopback HTTP gateway that accepts OpenAI Chat Completions and
// Anthropic Messages requests and forwards them to a single local
// OpenAI-dialect upstream, applying model routing, thinking-mode shaping,
// rate-limit fallback, and protocol translation on the way through.
//
// Architecture:
// - Gateway (axum): routes /v1/messages vs /v1/chat/completions vs passthrough
// - Catalog: model table, routing toggles, default/fallback selections
// - Shaper: thinking-mode injection and token-budget sizing
// - Bridge: Anthropic <-> OpenAI translation, including SSE streams
// - Dispatcher: fresh upstream connection per request, 404/429 recovery
// - Relay: byte pump plus the reasoning-mirroring SSE transformer
//
// The binary is a thin embedding of the library modules: the surrounding
// app normally owns the catalog mutations and drains the notice channel.

mod catalog;
mod config;
mod events;
mod proxy;
mod reasoning;

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use catalog::{load_catalog_entries, ModelCatalog};
use config::{Config, Preferences};
use events::Notifier;
use reasoning::ReasoningCache;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();
    tracing::info!(version = config::VERSION, "starting ellproxy core");

    let entries = load_catalog_entries(&config.catalog_dir, &config.overlay_dir);
    tracing::info!(models = entries.len(), "catalog loaded");

    let (notifier, mut notices) = Notifier::channel(64);
    let catalog = Arc::new(ModelCatalog::new(entries, notifier.clone()));
    Preferences::load(&config.preferences_path).apply_to(&catalog);

    let cache = Arc::new(ReasoningCache::new());

    // Standalone runs log routing notices; an embedding app would drain
    // this channel into its own notification surface instead
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            tracing::info!(at = %notice.timestamp, "{}", notice.message);
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(());
        }
    });

    proxy::start_gateway(config, catalog, cache, notifier, shutdown_rx).await
}
