//! Command handlers for the `scada` binary.
//!
//! Shared helpers (config loading, summary files, Ctrl-C wiring) live here.

pub mod backfill;
pub mod ingest;

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

use scada_config::{IngestSettings, LoadedConfig, UnusedKeyPolicy};
use scada_runtime::CancelToken;

use crate::ConfigArgs;

/// `scada config-hash`: hash + canonical JSON, then any unused keys.
pub fn config_hash(paths: &[String]) -> Result<()> {
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = scada_config::load_layered_yaml(&path_refs)?;
    let report = scada_config::report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;

    println!("config_hash={}", loaded.config_hash);
    println!("{}", loaded.canonical_json);
    for p in &report.unused_leaf_pointers {
        println!("unused_key={p}");
    }
    Ok(())
}

/// Merge, lint and type the configuration. No `--config` means all defaults.
pub fn load_settings(args: &ConfigArgs) -> Result<(LoadedConfig, IngestSettings)> {
    let path_refs: Vec<&str> = args.config_paths.iter().map(|s| s.as_str()).collect();
    let loaded = scada_config::load_layered_yaml(&path_refs)?;

    let policy = if args.strict_config {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let report = scada_config::report_unused_keys(&loaded.config_json, policy)?;
    for p in &report.unused_leaf_pointers {
        tracing::warn!(pointer = %p, "config key is not used");
    }

    let settings = loaded.settings()?;
    tracing::info!(config_hash = %loaded.config_hash, "config loaded");
    Ok((loaded, settings))
}

pub fn write_summary_json<T: Serialize>(path: &Path, summary: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("create summary dir failed: {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(summary).context("serialize summary json failed")?;
    fs::write(path, json).with_context(|| format!("write summary failed: {}", path.display()))?;
    println!("summary_path={}", path.display());
    Ok(())
}

/// First Ctrl-C cancels between dates; the date in progress still finishes.
pub fn cancel_on_ctrl_c(token: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing current date then stopping");
            token.cancel();
        }
    });
}
