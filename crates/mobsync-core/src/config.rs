//! Persistent configuration for mobsync.
//!
//! Stores the backend endpoint, one device profile per platform and the
//! synchronization defaults in `~/.mobsync/config.json`. Every section is
//! optional; missing sections fall back to their defaults.
//!
//! # Example
//!
//! ```no_run
//! use mobsync_core::config::MobsyncConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let config = MobsyncConfig::load();
//! println!("backend at {}:{}", config.backend.host, config.backend.port);
//! ```

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::capability::{CapabilityInput, Platform, PortPool, ANDROID_PORT_RANGE, IOS_PORT_RANGE};
use crate::driver::SessionTimeouts;
use crate::wait::{WaitSettings, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};

const CONFIG_FILENAME: &str = "config.json";

/// Errors raised while reading or writing the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHomeDir,

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Returns `~/.mobsync/`, creating it if needed.
pub fn mobsync_dir() -> Result<PathBuf, ConfigError> {
    let dir = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?.join(".mobsync");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Path of the default config file.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(mobsync_dir()?.join(CONFIG_FILENAME))
}

/// Where the automation backend listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4723,
        }
    }
}

/// Default element-wait deadline and poll interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

/// Stability timeouts applied to each new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub implicit_wait_ms: u64,
    pub page_load_secs: u64,
    pub script_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let defaults = SessionTimeouts::default();
        Self {
            implicit_wait_ms: defaults.implicit_wait.as_millis() as u64,
            page_load_secs: defaults.page_load.as_secs(),
            script_secs: defaults.script.as_secs(),
        }
    }
}

/// Inclusive local port ranges for per-session agent ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub android_start: u16,
    pub android_end: u16,
    pub ios_start: u16,
    pub ios_end: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            android_start: *ANDROID_PORT_RANGE.start(),
            android_end: *ANDROID_PORT_RANGE.end(),
            ios_start: *IOS_PORT_RANGE.start(),
            ios_end: *IOS_PORT_RANGE.end(),
        }
    }
}

impl PortConfig {
    fn android(&self) -> RangeInclusive<u16> {
        self.android_start..=self.android_end
    }

    fn ios(&self) -> RangeInclusive<u16> {
        self.ios_start..=self.ios_end
    }
}

/// Persistent mobsync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MobsyncConfig {
    pub backend: BackendConfig,
    /// Device profile used when an Android session is requested.
    pub android: CapabilityInput,
    /// Device profile used when an iOS session is requested.
    pub ios: CapabilityInput,
    pub waits: WaitConfig,
    pub timeouts: TimeoutConfig,
    pub ports: PortConfig,
}

impl MobsyncConfig {
    /// Load config from `~/.mobsync/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        let path = match default_config_path() {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "no config directory, using defaults");
                return Self::default();
            }
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load_from(&path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring unreadable config");
            Self::default()
        })
    }

    /// Load and validate config from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to `~/.mobsync/config.json`.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&default_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Rejects settings that would make every wait or port allocation fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.waits.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("waits.poll_interval_ms must be positive".into()));
        }
        if self.ports.android_start > self.ports.android_end {
            return Err(ConfigError::Invalid("ports: android_start exceeds android_end".into()));
        }
        if self.ports.ios_start > self.ports.ios_end {
            return Err(ConfigError::Invalid("ports: ios_start exceeds ios_end".into()));
        }
        Ok(())
    }

    pub fn profile(&self, platform: Platform) -> &CapabilityInput {
        match platform {
            Platform::Android => &self.android,
            Platform::Ios => &self.ios,
        }
    }

    pub fn wait_settings(&self) -> WaitSettings {
        WaitSettings {
            timeout: Duration::from_millis(self.waits.timeout_ms),
            poll_interval: Duration::from_millis(self.waits.poll_interval_ms),
        }
    }

    pub fn session_timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            implicit_wait: Duration::from_millis(self.timeouts.implicit_wait_ms),
            page_load: Duration::from_secs(self.timeouts.page_load_secs),
            script: Duration::from_secs(self.timeouts.script_secs),
        }
    }

    pub fn port_pool(&self) -> PortPool {
        PortPool::new(self.ports.android(), self.ports.ios())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_local_backend() {
        let config = MobsyncConfig::default();
        assert_eq!(config.backend.host, "127.0.0.1");
        assert_eq!(config.backend.port, 4723);
        assert!(config.android.device_name.is_none());
        assert_eq!(config.wait_settings(), WaitSettings::default());
        assert_eq!(config.session_timeouts(), SessionTimeouts::default());
    }

    #[test]
    fn deserialize_empty_json() {
        let loaded: MobsyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(loaded.backend, BackendConfig::default());
        assert_eq!(loaded.ports, PortConfig::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let loaded: MobsyncConfig = serde_json::from_str(
            r#"{
                "backend": { "port": 4800 },
                "android": { "device_name": "Pixel 7", "app_package": "com.example.shop" },
                "waits": { "timeout_ms": 2500 }
            }"#,
        )
        .unwrap();
        assert_eq!(loaded.backend.host, "127.0.0.1");
        assert_eq!(loaded.backend.port, 4800);
        assert_eq!(
            loaded.profile(Platform::Android).device_name.as_deref(),
            Some("Pixel 7")
        );
        assert_eq!(loaded.wait_settings().timeout, Duration::from_millis(2500));
        assert_eq!(loaded.wait_settings().poll_interval, DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = MobsyncConfig::default();
        config.ios.bundle_id = Some("com.example.Shop".into());
        config.save_to(&path).unwrap();

        let loaded = MobsyncConfig::load_from(&path).unwrap();
        assert_eq!(loaded.ios.bundle_id.as_deref(), Some("com.example.Shop"));
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            MobsyncConfig::load_from(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = MobsyncConfig::load_from(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn validate_rejects_inverted_port_range() {
        let mut config = MobsyncConfig::default();
        config.ports.ios_start = 9000;
        config.ports.ios_end = 8000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_zero_poll_interval() {
        let mut config = MobsyncConfig::default();
        config.waits.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
