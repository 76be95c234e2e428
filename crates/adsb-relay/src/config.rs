//! Configuration management for adsb-relay.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::processor::RollbackMatching;
use crate::scheduler::MalformedSnapshotPolicy;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default configuration directory name.
const CONFIG_DIR_NAME: &str = "adsb-relay";

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "ADSB_RELAY_";

/// Longest accepted retention of uploaded flights (one year).
const MAX_CLEANUP_INTERVAL_MINUTES: f64 = 525_600.0;

/// Placeholder shown instead of the delivery credential.
const REDACTED: &str = "********";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `ADSB_RELAY_`, sections split by `__`)
/// 2. TOML config file at `~/.config/adsb-relay/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity of this receiver.
    pub device: DeviceConfig,
    /// Where snapshots come from.
    pub receiver: ReceiverConfig,
    /// Where finished flights go.
    pub upload: UploadConfig,
    /// Retention of uploaded flights.
    pub cleanup: CleanupConfig,
    /// Process-level policies.
    pub runtime: RuntimeConfig,
}

/// Device identity configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Identifier reported as the `Location` of every uploaded flight.
    pub device_id: String,
}

/// Receiver (snapshot source) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Host running the ADS-B decoder's web interface.
    pub target_host: String,
    /// Port of the decoder's web interface.
    pub port: u16,
    /// Path of the aircraft JSON document.
    pub path: String,
    /// Seconds between polling cycles.
    pub retrieval_interval_secs: u64,
    /// Timeout for a single snapshot request, in seconds.
    pub request_timeout_secs: u64,
}

/// Upload sink configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// HTTP(S) endpoint that receives the JSON batches.
    pub endpoint: Option<String>,
    /// Value of the `Authorization` header sent with every batch.
    pub credential: Option<String>,
    /// Timeout for a single upload request, in seconds.
    pub timeout_secs: u64,
    /// How records of a failed batch are found again for rollback.
    pub rollback_match: RollbackMatching,
}

/// Cleanup configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Minutes an uploaded flight is remembered before its id can be reused.
    pub cleanup_interval_minutes: f64,
}

/// Runtime policy configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// What to do when the receiver returns a snapshot without `now` or `aircraft`.
    pub on_malformed_snapshot: MalformedSnapshotPolicy,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: "adsb-receiver".to_string(),
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            target_host: "localhost".to_string(),
            port: 8080,
            path: "/data/aircraft.json".to_string(),
            retrieval_interval_secs: 10,
            request_timeout_secs: 5,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            credential: None,
            timeout_secs: 30,
            rollback_match: RollbackMatching::default(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_minutes: 5.0,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.device.device_id.trim().is_empty() {
            return Err(Error::config_validation("device_id must not be empty"));
        }

        if self.receiver.target_host.trim().is_empty() {
            return Err(Error::config_validation("target_host must not be empty"));
        }

        if self.receiver.retrieval_interval_secs == 0 {
            return Err(Error::config_validation(
                "retrieval_interval_secs must be greater than 0",
            ));
        }

        if self.receiver.request_timeout_secs == 0 {
            return Err(Error::config_validation(
                "request_timeout_secs must be greater than 0",
            ));
        }

        if self.upload.timeout_secs == 0 {
            return Err(Error::config_validation(
                "upload timeout_secs must be greater than 0",
            ));
        }

        let minutes = self.cleanup.cleanup_interval_minutes;
        if !minutes.is_finite() || minutes < 0.0 {
            return Err(Error::config_validation(format!(
                "cleanup_interval_minutes must be a non-negative number, got {minutes}"
            )));
        }
        if minutes > MAX_CLEANUP_INTERVAL_MINUTES {
            return Err(Error::config_validation(format!(
                "cleanup_interval_minutes must be at most {MAX_CLEANUP_INTERVAL_MINUTES}, got {minutes}"
            )));
        }

        if let Some(endpoint) = &self.upload.endpoint {
            let url = reqwest::Url::parse(endpoint).map_err(|e| {
                Error::config_validation(format!("invalid upload endpoint {endpoint}: {e}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::config_validation(format!(
                    "upload endpoint must use http or https, got {}",
                    url.scheme()
                )));
            }
        }

        Ok(())
    }

    /// URL of the receiver's aircraft snapshot.
    #[must_use]
    pub fn snapshot_url(&self) -> String {
        let path = &self.receiver.path;
        let separator = if path.starts_with('/') { "" } else { "/" };
        format!(
            "http://{}:{}{separator}{path}",
            self.receiver.target_host, self.receiver.port
        )
    }

    /// Get the polling interval as a Duration.
    #[must_use]
    pub fn retrieval_interval(&self) -> Duration {
        Duration::from_secs(self.receiver.retrieval_interval_secs)
    }

    /// Get the snapshot request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.receiver.request_timeout_secs)
    }

    /// Get the upload request timeout as a Duration.
    #[must_use]
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload.timeout_secs)
    }

    /// How long uploaded flights are kept before they expire.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn cleanup_ttl(&self) -> chrono::Duration {
        let millis = (self.cleanup.cleanup_interval_minutes * 60_000.0).round();
        chrono::Duration::milliseconds(millis as i64)
    }

    /// Copy of this configuration that is safe to print.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.upload.credential.is_some() {
            config.upload.credential = Some(REDACTED.to_string());
        }
        config
    }
}
