//! TOML-based configuration for the key fill host.
//!
//! Reads and writes `HostConfig` at an explicit path or at the
//! platform-appropriate config file:
//! - Windows:  `%APPDATA%\KfdHost\config.toml`
//! - Linux:    `~/.config/kfdhost/config.toml`
//! - macOS:    `~/Library/Application Support/KfdHost/config.toml`
//!
//! # Example file (for beginners)
//!
//! ```toml
//! [host]
//! log_level = "debug"
//!
//! [timing]
//! settle_ms = 500
//!
//! [relay]
//! url = "ws://relay.local:8080"
//! target_ip = "10.0.0.7"
//! motorola = true
//!
//! [adapter]
//! model = "kfd-micro"
//! ```
//!
//! Every section and field may be left out.  Fields annotated with
//! `#[serde(default = "some_fn")]` take the value of `some_fn()` when absent,
//! so a first run without a file and an older file missing newer fields both
//! load cleanly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kfd_core::AdapterModel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::session::RecoveryPolicy;
use crate::infrastructure::transport::ReadPolicy;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level host configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSection,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostSection {
    /// `tracing` filter directive, e.g. `"info"` or `"kfd_host=debug"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Read windows, retry counts and settle delays, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Polls before a read times out.
    #[serde(default = "default_read_attempts")]
    pub read_attempts: u32,
    /// Base settle time between session initialization attempts.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_init_attempts")]
    pub init_attempts: u32,
    /// Attempts per KMM exchange before a timeout surfaces.
    #[serde(default = "default_transfer_attempts")]
    pub transfer_attempts: u32,
    #[serde(default = "default_disconnect_gap_ms")]
    pub disconnect_gap_ms: u64,
    /// Minimum time between two link resets.
    #[serde(default = "default_reset_throttle_ms")]
    pub reset_throttle_ms: u64,
    /// Delay after each DLI handshake step.
    #[serde(default = "default_dli_step_delay_ms")]
    pub dli_step_delay_ms: u64,
}

/// Network relay defaults for `radio --relay`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ip: Option<String>,
    /// Use the Motorola (MFID 0x90) handshake.
    #[serde(default)]
    pub motorola: bool,
}

/// Direct adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdapterConfig {
    /// Selects the byte framing scheme.
    #[serde(default = "default_adapter_model")]
    pub model: AdapterModel,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_poll_interval_ms() -> u64 {
    10
}
fn default_read_attempts() -> u32 {
    100
}
fn default_settle_ms() -> u64 {
    300
}
fn default_init_attempts() -> u32 {
    3
}
fn default_transfer_attempts() -> u32 {
    3
}
fn default_disconnect_gap_ms() -> u64 {
    100
}
fn default_reset_throttle_ms() -> u64 {
    3000
}
fn default_dli_step_delay_ms() -> u64 {
    300
}
fn default_adapter_model() -> AdapterModel {
    AdapterModel::KfdToolAvr
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            read_attempts: default_read_attempts(),
            settle_ms: default_settle_ms(),
            init_attempts: default_init_attempts(),
            transfer_attempts: default_transfer_attempts(),
            disconnect_gap_ms: default_disconnect_gap_ms(),
            reset_throttle_ms: default_reset_throttle_ms(),
            dli_step_delay_ms: default_dli_step_delay_ms(),
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            model: default_adapter_model(),
        }
    }
}

impl TimingConfig {
    pub fn read_policy(&self) -> ReadPolicy {
        ReadPolicy {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.read_attempts,
        }
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            init_attempts: self.init_attempts.max(1),
            transfer_attempts: self.transfer_attempts.max(1),
            settle: Duration::from_millis(self.settle_ms),
            disconnect_gap: Duration::from_millis(self.disconnect_gap_ms),
            reset_throttle: Duration::from_millis(self.reset_throttle_ms),
            ..RecoveryPolicy::default()
        }
    }

    pub fn dli_step_delay(&self) -> Duration {
        Duration::from_millis(self.dli_step_delay_ms)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `HostConfig` from `path`, or from the platform config file when
/// `path` is `None`.  A missing file yields `HostConfig::default()`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<HostConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HostConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &HostConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory plus the `KfdHost` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("KfdHost"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("kfdhost"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("KfdHost"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_default_timing_matches_protocol_constants() {
        // Arrange / Act
        let cfg = HostConfig::default();

        // Assert
        assert_eq!(cfg.timing.read_policy(), ReadPolicy::default());
        assert_eq!(cfg.timing.recovery_policy(), RecoveryPolicy::default());
        assert_eq!(cfg.timing.dli_step_delay(), Duration::from_millis(300));
    }

    #[test]
    fn test_default_adapter_is_single_delimiter() {
        let cfg = HostConfig::default();
        assert_eq!(cfg.adapter.model, AdapterModel::KfdToolAvr);
        assert_eq!(cfg.host.log_level, "info");
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: HostConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, HostConfig::default());
    }

    #[test]
    fn test_deserialize_partial_timing_overrides_defaults() {
        // Arrange
        let toml_str = r#"
[timing]
settle_ms = 500

[adapter]
model = "kfd-micro"
"#;

        // Act
        let cfg: HostConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.timing.settle_ms, 500);
        assert_eq!(cfg.timing.read_attempts, 100);
        assert_eq!(cfg.adapter.model, AdapterModel::KfdMicro);
    }

    #[test]
    fn test_relay_without_url_omits_it_from_toml() {
        let cfg = HostConfig::default();

        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");

        assert!(!toml_str.contains("url"), "None url must be omitted");
        assert!(!toml_str.contains("target_ip"));
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let result: Result<HostConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/config.toml");

        let cfg = load_config(Some(&path)).unwrap();

        assert_eq!(cfg, HostConfig::default());
    }

    #[test]
    fn test_save_and_load_config_round_trip_via_temp_dir() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("kfd_test_{}", Uuid::new_v4()));
        let path = dir.join("config.toml");
        let mut cfg = HostConfig::default();
        cfg.relay.url = Some("ws://relay.local:8080".to_string());
        cfg.relay.motorola = true;
        cfg.timing.reset_throttle_ms = 5000;

        // Act
        save_config(&cfg, &path).unwrap();
        let loaded = load_config(Some(&path)).unwrap();

        // Assert
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.timing.recovery_policy().reset_throttle, Duration::from_secs(5));

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("config.toml"), "got {path:?}");
        }
    }
}
