//! Auto-refresh settings
//!
//! `RefreshConfig` is persisted in the settings file under
//! `autoRefreshConfig` as camelCase JSON. Older records may lack
//! `maxBatchSize` and `concurrency`; those are filled from defaults and the
//! record is written back. Values outside their range are replaced by
//! defaults with a warning rather than failing startup.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::batch::BatchLimits;
use crate::error::{Error, Result};
use crate::executor::RefreshMode;
use crate::settings::SettingsStore;

/// Settings key holding the record.
pub const AUTO_REFRESH_CONFIG_KEY: &str = "autoRefreshConfig";

pub const MAX_BATCH_SIZE_RANGE: std::ops::RangeInclusive<u32> = 1..=100;
pub const CONCURRENCY_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

/// Shortest and longest timer period the scheduler will arm.
const MIN_TICK: Duration = Duration::from_secs(1);
const MAX_TICK: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshConfig {
    pub enabled: bool,
    /// Minutes between cycles. Fractional values are allowed.
    pub interval: f64,
    /// Full sync (profile, usage) when true, token-only when false.
    pub sync_info: bool,
    pub max_batch_size: u32,
    pub concurrency: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 5.0,
            sync_info: true,
            max_batch_size: 20,
            concurrency: 3,
        }
    }
}

pub fn validate_interval(minutes: f64) -> Result<()> {
    if minutes.is_finite() && minutes > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidSetting(format!(
            "interval must be a positive number of minutes, got {minutes}"
        )))
    }
}

pub fn validate_max_batch_size(size: u32) -> Result<()> {
    if MAX_BATCH_SIZE_RANGE.contains(&size) {
        Ok(())
    } else {
        Err(Error::InvalidSetting(format!(
            "maxBatchSize must be between 1 and 100, got {size}"
        )))
    }
}

pub fn validate_concurrency(count: u32) -> Result<()> {
    if CONCURRENCY_RANGE.contains(&count) {
        Ok(())
    } else {
        Err(Error::InvalidSetting(format!(
            "concurrency must be between 1 and 10, got {count}"
        )))
    }
}

impl RefreshConfig {
    /// Timer period, clamped to what the scheduler can arm.
    pub fn interval_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval * 60.0)
            .unwrap_or(MAX_TICK)
            .clamp(MIN_TICK, MAX_TICK)
    }

    pub fn mode(&self) -> RefreshMode {
        RefreshMode::from_sync_info(self.sync_info)
    }

    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits::new(self.max_batch_size as usize, self.concurrency as usize)
    }

    /// Read the persisted record, filling and sanitizing fields.
    ///
    /// No record means defaults (nothing is written). A record missing
    /// `maxBatchSize`/`concurrency`, or holding invalid values, is written
    /// back with the defaults merged in.
    pub async fn load(settings: &SettingsStore) -> Result<Self> {
        let Some(raw) = settings.get_raw(AUTO_REFRESH_CONFIG_KEY).await else {
            info!("no auto-refresh settings saved, using defaults");
            return Ok(Self::default());
        };

        let (config, repaired) = Self::from_stored(&raw);
        if repaired {
            settings.set(AUTO_REFRESH_CONFIG_KEY, &config).await?;
            info!(?config, "auto-refresh settings updated with defaults");
        } else {
            info!(?config, "loaded auto-refresh settings");
        }
        Ok(config)
    }

    /// Merge a stored record over the defaults. The flag is true when the
    /// record needs rewriting.
    fn from_stored(raw: &Value) -> (Self, bool) {
        let defaults = Self::default();
        let Some(obj) = raw.as_object() else {
            warn!("auto-refresh settings record is not an object, resetting to defaults");
            return (defaults, true);
        };

        let mut repaired = false;
        let mut invalid = |field: &str, value: &Value| {
            warn!(field, %value, "invalid auto-refresh setting, using default");
            repaired = true;
        };

        let enabled = match obj.get("enabled") {
            None => defaults.enabled,
            Some(v) => v.as_bool().unwrap_or_else(|| {
                invalid("enabled", v);
                defaults.enabled
            }),
        };
        let interval = match obj.get("interval") {
            None => defaults.interval,
            Some(v) => match v.as_f64().filter(|m| validate_interval(*m).is_ok()) {
                Some(m) => m,
                None => {
                    invalid("interval", v);
                    defaults.interval
                }
            },
        };
        let sync_info = match obj.get("syncInfo") {
            None => defaults.sync_info,
            Some(v) => v.as_bool().unwrap_or_else(|| {
                invalid("syncInfo", v);
                defaults.sync_info
            }),
        };
        let max_batch_size = match obj.get("maxBatchSize") {
            None => None,
            Some(v) => Some(
                as_u32(v)
                    .filter(|n| validate_max_batch_size(*n).is_ok())
                    .unwrap_or_else(|| {
                        invalid("maxBatchSize", v);
                        defaults.max_batch_size
                    }),
            ),
        };
        let concurrency = match obj.get("concurrency") {
            None => None,
            Some(v) => Some(
                as_u32(v)
                    .filter(|n| validate_concurrency(*n).is_ok())
                    .unwrap_or_else(|| {
                        invalid("concurrency", v);
                        defaults.concurrency
                    }),
            ),
        };

        if max_batch_size.is_none() || concurrency.is_none() {
            repaired = true;
        }

        let config = Self {
            enabled,
            interval,
            sync_info,
            max_batch_size: max_batch_size.unwrap_or(defaults.max_batch_size),
            concurrency: concurrency.unwrap_or(defaults.concurrency),
        };
        (config, repaired)
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|n| u32::try_from(n).ok())
}
