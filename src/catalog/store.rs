//! Catalog persistence - bundled provider files plus the discovered overlay
//!
//! The surrounding app writes one JSON file per provider into the catalog
//! directory (`{"provider": "...", "models": [...]}`) and, after probing,
//! drops `discovered_<provider>.json` files into the overlay directory with
//! the same shape plus a `last_sync` timestamp. Discovered entries supersede
//! bundled ones with the same `(provider, id)`; everything else appends.
//!
//! Loading is tolerant: a file that fails to parse is logged and skipped so
//! one corrupt probe result cannot keep the gateway from starting.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use super::{ModelEntry, Provider};

/// On-disk shape shared by bundled and discovered files
#[derive(Debug, Deserialize)]
struct ProviderFile {
    provider: Provider,
    models: Vec<ModelEntry>,
    /// Present on discovered files only
    #[serde(default)]
    last_sync: Option<String>,
}

/// Load the model table: bundled directory first, then the discovered overlay
pub fn load_catalog_entries(catalog_dir: &Path, overlay_dir: &Path) -> Vec<ModelEntry> {
    let mut by_key: HashMap<(Provider, String), ModelEntry> = HashMap::new();
    let mut order: Vec<(Provider, String)> = Vec::new();

    for entry in read_provider_files(catalog_dir, false) {
        let key = (entry.provider, entry.id.clone());
        if !by_key.contains_key(&key) {
            order.push(key.clone());
        }
        by_key.insert(key, entry);
    }

    for entry in read_provider_files(overlay_dir, true) {
        let key = (entry.provider, entry.id.clone());
        if !by_key.contains_key(&key) {
            order.push(key.clone());
        }
        by_key.insert(key, entry);
    }

    order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect()
}

/// Parse every matching JSON file in `dir` into model entries
///
/// `discovered_only` restricts to the `discovered_*.json` overlay naming;
/// the bundled pass skips those same names so an overlay dropped into the
/// catalog directory is not read twice.
fn read_provider_files(dir: &Path, discovered_only: bool) -> Vec<ModelEntry> {
    let mut entries = Vec::new();

    let listing = match std::fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "catalog directory not readable");
            return entries;
        }
    };

    let mut paths: Vec<_> = listing
        .filter_map(|item| item.ok().map(|i| i.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .filter(|p| {
            let discovered = p
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("discovered_"))
                .unwrap_or(false);
            discovered == discovered_only
        })
        .collect();
    paths.sort();

    for path in paths {
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "skipping unreadable catalog file");
                continue;
            }
        };
        let file: ProviderFile = match serde_json::from_slice(&bytes) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "skipping unparseable catalog file");
                continue;
            }
        };

        if let Some(ref raw) = file.last_sync {
            match raw.parse::<DateTime<Utc>>() {
                Ok(when) => tracing::debug!(
                    provider = %file.provider,
                    last_sync = %when,
                    "loaded discovered models"
                ),
                Err(_) => tracing::warn!(
                    file = %path.display(),
                    last_sync = %raw,
                    "discovered file has unparseable last_sync"
                ),
            }
        }

        for model in file.models {
            if model.provider != file.provider {
                tracing::warn!(
                    file = %path.display(),
                    model = %model.id,
                    "skipping model whose provider does not match its file"
                );
                continue;
            }
            entries.push(model);
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct TempDirs {
        root: PathBuf,
        catalog: PathBuf,
        overlay: PathBuf,
    }

    impl TempDirs {
        fn new(tag: &str) -> Self {
            let root = std::env::temp_dir().join(format!("ellproxy-store-test-{}", tag));
            let catalog = root.join("catalog");
            let overlay = root.join("discovered");
            std::fs::create_dir_all(&catalog).unwrap();
            std::fs::create_dir_all(&overlay).unwrap();
            Self {
                root,
                catalog,
                overlay,
            }
        }

        fn write(&self, dir: &Path, name: &str, body: &str) {
            std::fs::write(dir.join(name), body).unwrap();
        }
    }

    impl Drop for TempDirs {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    const GOOGLE_FILE: &str = r#"{
        "provider": "google",
        "models": [
            {"id": "gemini-2.5-flash", "name": "Gemini Flash", "provider": "google",
             "upstream_model": "gemini-2.5-flash", "supports_thinking": true}
        ]
    }"#;

    #[test]
    fn test_loads_bundled_provider_files() {
        let dirs = TempDirs::new("bundled");
        dirs.write(&dirs.catalog, "google.json", GOOGLE_FILE);

        let entries = load_catalog_entries(&dirs.catalog, &dirs.overlay);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "gemini-2.5-flash");
        assert!(entries[0].supports_thinking);
    }

    #[test]
    fn test_overlay_supersedes_bundled_entry() {
        let dirs = TempDirs::new("overlay");
        dirs.write(&dirs.catalog, "google.json", GOOGLE_FILE);
        dirs.write(
            &dirs.overlay,
            "discovered_google.json",
            r#"{
                "provider": "google",
                "last_sync": "2025-11-02T09:30:00Z",
                "models": [
                    {"id": "gemini-2.5-flash", "name": "Gemini Flash", "provider": "google",
                     "upstream_model": "gemini-2.5-flash-preview", "supports_thinking": true},
                    {"id": "gemini-2.5-pro", "name": "Gemini Pro", "provider": "google",
                     "upstream_model": "gemini-2.5-pro", "supports_thinking": true}
                ]
            }"#,
        );

        let entries = load_catalog_entries(&dirs.catalog, &dirs.overlay);
        assert_eq!(entries.len(), 2);
        let flash = entries.iter().find(|e| e.id == "gemini-2.5-flash").unwrap();
        assert_eq!(flash.upstream_model, "gemini-2.5-flash-preview");
    }

    #[test]
    fn test_unparseable_file_is_skipped() {
        let dirs = TempDirs::new("corrupt");
        dirs.write(&dirs.catalog, "google.json", GOOGLE_FILE);
        dirs.write(&dirs.catalog, "broken.json", "{ not json");

        let entries = load_catalog_entries(&dirs.catalog, &dirs.overlay);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_unknown_provider_file_is_skipped() {
        let dirs = TempDirs::new("unknown-provider");
        dirs.write(
            &dirs.catalog,
            "mystery.json",
            r#"{"provider": "mystery", "models": []}"#,
        );
        dirs.write(&dirs.catalog, "google.json", GOOGLE_FILE);

        let entries = load_catalog_entries(&dirs.catalog, &dirs.overlay);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].provider, Provider::Google);
    }

    #[test]
    fn test_missing_directories_yield_empty_table() {
        let root = std::env::temp_dir().join("ellproxy-store-test-missing");
        let entries = load_catalog_entries(&root.join("nope"), &root.join("also-nope"));
        assert!(entries.is_empty());
    }

    #[test]
    fn test_mismatched_model_provider_is_skipped() {
        let dirs = TempDirs::new("mismatch");
        dirs.write(
            &dirs.catalog,
            "google.json",
            r#"{
                "provider": "google",
                "models": [
                    {"id": "qwen3-coder", "name": "Qwen", "provider": "qwen",
                     "upstream_model": "qwen3-coder-plus", "supports_thinking": false}
                ]
            }"#,
        );

        let entries = load_catalog_entries(&dirs.catalog, &dirs.overlay);
        assert!(entries.is_empty());
    }
}
