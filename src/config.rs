// =============================================================================
// Engine Configuration — settings for one reentry engine process
// =============================================================================
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file. Environment variables listed in
// spec §6.4 override whatever the file holds, applied after load.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

fn default_root() -> PathBuf {
    PathBuf::from("reentry")
}

fn default_max_chain_duration_hours() -> i64 {
    24
}

fn default_ack_grace_seconds() -> u64 {
    30
}

fn default_order_retry_attempts() -> u32 {
    3
}

fn default_bus_contention_timeout_ms() -> u64 {
    2_000
}

fn default_reload_debounce_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Process-wide settings for the reentry engine (spec §6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_max_chain_duration_hours")]
    pub max_chain_duration_hours: i64,
    #[serde(default = "default_ack_grace_seconds")]
    pub ack_grace_seconds: u64,
    #[serde(default = "default_order_retry_attempts")]
    pub order_retry_attempts: u32,
    #[serde(default = "default_bus_contention_timeout_ms")]
    pub bus_contention_timeout_ms: u64,
    #[serde(default = "default_reload_debounce_ms")]
    pub reload_debounce_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            max_chain_duration_hours: default_max_chain_duration_hours(),
            ack_grace_seconds: default_ack_grace_seconds(),
            order_retry_attempts: default_order_retry_attempts(),
            bus_contention_timeout_ms: default_bus_contention_timeout_ms(),
            reload_debounce_ms: default_reload_debounce_ms(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`, falling back to
    /// defaults if the file does not exist, then apply any `REENTRY_*`
    /// environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read engine config from {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse engine config from {}", path.display()))?
        } else {
            warn!(path = %path.display(), "engine config not found — using defaults");
            Self::default()
        };

        config.apply_env_overrides();

        info!(
            root = %config.root.display(),
            max_chain_duration_hours = config.max_chain_duration_hours,
            ack_grace_seconds = config.ack_grace_seconds,
            log_level = %config.log_level,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise engine config")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Build a config for `root` with `REENTRY_*` env overrides applied,
    /// without requiring a persisted `engine_config.json` to exist. Used by
    /// the CLI, where `<root>` is the one thing every subcommand takes
    /// explicitly (spec §6.3) and the rest comes from the environment.
    pub fn with_root(root: impl Into<std::path::PathBuf>) -> Self {
        let mut config = Self::default();
        config.root = root.into();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("REENTRY_ROOT") {
            self.root = PathBuf::from(root);
        }
        if let Ok(hours) = std::env::var("REENTRY_MAX_CHAIN_HOURS") {
            match hours.parse() {
                Ok(v) => self.max_chain_duration_hours = v,
                Err(_) => warn!(value = %hours, "ignoring invalid REENTRY_MAX_CHAIN_HOURS"),
            }
        }
        if let Ok(secs) = std::env::var("REENTRY_ACK_GRACE_SECONDS") {
            match secs.parse() {
                Ok(v) => self.ack_grace_seconds = v,
                Err(_) => warn!(value = %secs, "ignoring invalid REENTRY_ACK_GRACE_SECONDS"),
            }
        }
        if let Ok(level) = std::env::var("REENTRY_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    pub fn bridge_dir(&self) -> PathBuf {
        self.root.join("bridge")
    }
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }
    pub fn trading_signals_path(&self) -> PathBuf {
        self.bridge_dir().join("trading_signals.csv")
    }
    pub fn trade_responses_path(&self) -> PathBuf {
        self.bridge_dir().join("trade_responses.csv")
    }
    pub fn parameter_log_path(&self) -> PathBuf {
        self.logs_dir().join("parameter_log.csv")
    }
    pub fn chain_history_path(&self) -> PathBuf {
        self.logs_dir().join("chain_history.csv")
    }
    pub fn matrix_map_path(&self) -> PathBuf {
        self.config_dir().join("matrix_map.csv")
    }
    pub fn parameters_schema_path(&self) -> PathBuf {
        self.config_dir().join("parameters.schema.json")
    }
    pub fn parameter_sets_path(&self) -> PathBuf {
        self.config_dir().join("parameter_sets.json")
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path().join("missing.json")).unwrap();
        assert_eq!(config.max_chain_duration_hours, 24);
        assert_eq!(config.ack_grace_seconds, 30);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine_config.json");
        let mut config = EngineConfig::default();
        config.max_chain_duration_hours = 48;
        config.save(&path).unwrap();

        let reloaded = EngineConfig::load(&path).unwrap();
        assert_eq!(reloaded.max_chain_duration_hours, 48);
    }

    #[test]
    fn derived_paths_nest_under_root() {
        let mut config = EngineConfig::default();
        config.root = PathBuf::from("/tmp/reentry-test");
        assert_eq!(
            config.trading_signals_path(),
            PathBuf::from("/tmp/reentry-test/bridge/trading_signals.csv")
        );
        assert_eq!(
            config.chain_history_path(),
            PathBuf::from("/tmp/reentry-test/logs/chain_history.csv")
        );
        assert_eq!(
            config.parameter_sets_path(),
            PathBuf::from("/tmp/reentry-test/config/parameter_sets.json")
        );
    }
}
