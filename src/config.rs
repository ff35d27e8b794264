//! JSON configuration for distribution heads.
//!
//! ```ignore
//! use zerolss::config::DistributionConfig;
//!
//! let dist = DistributionConfig::from_json(
//!     r#"{"distribution": "ZIPoisson", "response_fn": "softplus", "stabilization": "MAD"}"#,
//! )?
//! .build()?;
//! ```

use crate::distributions::{Distribution, ZAGamma, ZIPoisson};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Options shared by every head. Missing fields take the head's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeadOptions {
    /// One of "None", "MAD", "L2".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stabilization: Option<String>,
    /// Response function key, validated against the head's allowed set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_fn: Option<String>,
    /// One of "nll", "crps".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_fn: Option<String>,
    /// Whether to compute start values before boosting.
    #[serde(default)]
    pub initialize: bool,
}

/// Configuration of a single distribution head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "distribution")]
pub enum DistributionConfig {
    ZAGamma(HeadOptions),
    ZIPoisson(HeadOptions),
}

impl DistributionConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Build the distribution head, validating every option.
    pub fn build(&self) -> Result<Box<dyn Distribution>> {
        match self {
            DistributionConfig::ZAGamma(opts) => {
                let dist = ZAGamma::from_options(
                    opts.stabilization.as_deref().unwrap_or("None"),
                    opts.response_fn.as_deref().unwrap_or("exp"),
                    opts.loss_fn.as_deref().unwrap_or("nll"),
                )?
                .with_initialize(opts.initialize);
                Ok(Box::new(dist))
            }
            DistributionConfig::ZIPoisson(opts) => {
                let dist = ZIPoisson::from_options(
                    opts.stabilization.as_deref().unwrap_or("None"),
                    opts.response_fn.as_deref().unwrap_or("relu"),
                    opts.loss_fn.as_deref().unwrap_or("nll"),
                )?
                .with_initialize(opts.initialize);
                Ok(Box::new(dist))
            }
        }
    }
}
