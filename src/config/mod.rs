use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::utils::error::{Result, SentinelError};
use crate::utils::logging::LogConfig;

mod blocklist_config;
mod detector_config;
mod threshold_config;

pub use blocklist_config::{BlocklistConfig, BlocklistMode};
pub use detector_config::{
    DetectorConfig, EntropyConfig, FailureThresholdConfig, JwtConfig, NotifyConfig,
    RateLimitConfig, ReputationDetectorConfig, ReputationHandlerConfig, ScannerConfig,
    SmugglingConfig,
};
pub use threshold_config::{ThresholdConfig, ThresholdPreset};

// Environment variable prefix: SENTINEL__BLOCKLIST__MODE=cuckoo etc.
const ENV_PREFIX: &str = "SENTINEL";
const ENV_SEPARATOR: &str = "__";

/// Root configuration for the Sentinel core.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct SentinelConfig {
    pub logging: LogConfig,
    pub detectors: DetectorConfig,
    pub blocklist: BlocklistConfig,
    pub thresholds: ThresholdConfig,
    pub notify: NotifyConfig,
    pub reputation: ReputationHandlerConfig,
}

impl SentinelConfig {
    /// Loads configuration from an optional TOML file with environment
    /// overrides (`SENTINEL__` prefix, `__` separator), then validates.
    #[instrument(skip(path))]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config: SentinelConfig = builder
            .build()
            .map_err(|e| SentinelError::config(format!("config load failed: {e}")))?
            .try_deserialize()
            .map_err(|e| SentinelError::config(format!("config invalid: {e}")))?;

        config.validate()?;
        info!(
            blocklist_mode = ?config.blocklist.mode,
            preset = ?config.thresholds.preset,
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.blocklist.validate()?;
        // Surface threshold-table mistakes at startup, not first request.
        self.thresholds.resolver()?;
        if self.notify.enabled && self.notify.webhook_url.is_empty() {
            return Err(SentinelError::config(
                "notify.enabled requires notify.webhook_url",
            ));
        }
        Ok(())
    }
}
