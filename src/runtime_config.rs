// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the signal-processing pipeline. Every
// tunable parameter named by the external config surface lives here so the
// pipeline can be reconfigured without a restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::ExecutionMode;

fn default_split_percentage() -> f64 {
    0.5
}

fn default_policy_version() -> String {
    "v1.0".to_string()
}

fn default_orchestrator_batch_size() -> u32 {
    10
}

fn default_orchestrator_concurrency() -> u32 {
    4
}

fn default_orchestrator_signal_timeout_ms() -> u64 {
    30_000
}

fn default_orchestrator_retry_delay_ms() -> u64 {
    5_000
}

fn default_provider_priority() -> Vec<String> {
    vec![
        "alpaca".to_string(),
        "polygon".to_string(),
        "marketdata".to_string(),
        "twelvedata".to_string(),
    ]
}

fn default_db_pool_max() -> u32 {
    10
}

fn default_signal_dedup_window_secs() -> i64 {
    600
}

/// Hot-reloadable engine settings. Every field mirrors a config key named in
/// the external interface; fields absent from an older JSON file fall back
/// to these defaults on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub execution_mode: ExecutionMode,

    #[serde(default = "default_split_percentage")]
    pub split_percentage: f64,

    #[serde(default = "default_policy_version")]
    pub policy_version: String,

    #[serde(default = "default_orchestrator_batch_size")]
    pub orchestrator_batch_size: u32,

    #[serde(default = "default_orchestrator_concurrency")]
    pub orchestrator_concurrency: u32,

    #[serde(default = "default_orchestrator_signal_timeout_ms")]
    pub orchestrator_signal_timeout_ms: u64,

    #[serde(default = "default_orchestrator_retry_delay_ms")]
    pub orchestrator_retry_delay_ms: u64,

    /// Ordered vendor names: "alpaca" | "polygon" | "marketdata" | "twelvedata".
    #[serde(default = "default_provider_priority")]
    pub market_data_provider_priority: Vec<String>,

    #[serde(default)]
    pub adaptive_enabled: bool,

    #[serde(default)]
    pub adaptive_dry_run: bool,

    /// Shared HMAC secret for webhook signature verification. Empty string
    /// disables signature checking (development only).
    #[serde(default)]
    pub hmac_secret: String,

    #[serde(default)]
    pub db_connection_string: String,

    #[serde(default = "default_db_pool_max")]
    pub db_pool_max: u32,

    /// Dedup window for signal_hash collisions, in seconds.
    #[serde(default = "default_signal_dedup_window_secs")]
    pub signal_dedup_window_secs: i64,

    /// Maximum retry attempts for a claimed signal before it is rejected
    /// with rejection_reason="exhausted_retries".
    #[serde(default = "default_max_processing_attempts")]
    pub max_processing_attempts: i32,
}

fn default_max_processing_attempts() -> i32 {
    5
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::ShadowOnly,
            split_percentage: default_split_percentage(),
            policy_version: default_policy_version(),
            orchestrator_batch_size: default_orchestrator_batch_size(),
            orchestrator_concurrency: default_orchestrator_concurrency(),
            orchestrator_signal_timeout_ms: default_orchestrator_signal_timeout_ms(),
            orchestrator_retry_delay_ms: default_orchestrator_retry_delay_ms(),
            market_data_provider_priority: default_provider_priority(),
            adaptive_enabled: false,
            adaptive_dry_run: true,
            hmac_secret: String::new(),
            db_connection_string: String::new(),
            db_pool_max: default_db_pool_max(),
            signal_dedup_window_secs: default_signal_dedup_window_secs(),
            max_processing_attempts: default_max_processing_attempts(),
        }
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::ShadowOnly
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            execution_mode = %config.execution_mode,
            policy_version = %config.policy_version,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.execution_mode, ExecutionMode::ShadowOnly);
        assert_eq!(cfg.split_percentage, 0.5);
        assert_eq!(cfg.market_data_provider_priority.len(), 4);
        assert!(cfg.adaptive_dry_run);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.execution_mode, ExecutionMode::ShadowOnly);
        assert_eq!(cfg.policy_version, "v1.0");
        assert_eq!(cfg.max_processing_attempts, 5);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "executionMode": "ENGINE_A_PRIMARY", "splitPercentage": 0.3 }"#;
        // field names here are snake_case in the struct; the external wire
        // format maps through api::rest for camelCase, so this uses the
        // struct's own serde names.
        let json = json.replace("executionMode", "execution_mode");
        let json = json.replace("splitPercentage", "split_percentage");
        let cfg: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.execution_mode, ExecutionMode::EngineAPrimary);
        assert_eq!(cfg.split_percentage, 0.3);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.policy_version, cfg2.policy_version);
        assert_eq!(cfg.execution_mode, cfg2.execution_mode);
    }
}
