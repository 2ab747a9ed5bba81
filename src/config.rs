//! Engine configuration.
//!
//! Every field has a default, so a TOML file only needs the values it
//! overrides:
//!
//! ```toml
//! max_offers_crossed = 100
//!
//! [reserve]
//! base = "20"
//! ```

use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::amount::Precision;
use crate::error::{ConfigError, Result};

/// Parameters of the crossing engine. Replicas must agree on every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Committed decimal scale per asset kind
    pub precision: Precision,

    /// Native reserve requirements
    pub reserve: ReserveConfig,

    /// Offers per book directory page
    pub directory_page_size: usize,

    /// Upper bound on offers one order may cross (stale self-offers included)
    pub max_offers_crossed: usize,

    /// Allow bridging through the native asset
    pub bridging: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            precision: Precision::default(),
            reserve: ReserveConfig::default(),
            directory_page_size: 32,
            max_offers_crossed: 850,
            bridging: true,
        }
    }
}

/// Native balance an account must keep: `base + increment × owner_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReserveConfig {
    pub base: Decimal,
    pub increment: Decimal,
}

impl ReserveConfig {
    /// Reserve required for an account owning `owner_count` objects.
    pub fn required(&self, owner_count: u32) -> Decimal {
        self.base + self.increment * Decimal::from(owner_count)
    }
}

impl Default for ReserveConfig {
    fn default() -> Self {
        Self {
            base: Decimal::from(10),
            increment: Decimal::from(2),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(raw).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.directory_page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "directory_page_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_offers_crossed == 0 {
            return Err(ConfigError::Invalid {
                field: "max_offers_crossed",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.reserve.base.is_sign_negative() || self.reserve.increment.is_sign_negative() {
            return Err(ConfigError::Invalid {
                field: "reserve",
                reason: "reserve amounts cannot be negative".to_string(),
            });
        }
        // Decimal carries at most 28 fractional digits
        if self.precision.native_scale > 28 || self.precision.issued_scale > 28 {
            return Err(ConfigError::Invalid {
                field: "precision",
                reason: "scale cannot exceed 28".to_string(),
            });
        }
        Ok(())
    }
}
