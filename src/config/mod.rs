//! # Configuration
//!
//! Runtime settings for the claim protocol, event fan-out, bundle numbering,
//! template loading and the PostgreSQL store. Every section has working
//! defaults; [`ConfigLoader`] layers YAML files and `GARMENT_FLOW__*`
//! environment variables over them.
//!
//! ```yaml
//! claim:
//!   max_attempts: 5
//!   base_delay_ms: 25
//! events:
//!   channel_capacity: 1024
//! ```

pub mod loader;

pub use loader::ConfigLoader;

use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FlowConfig {
    pub claim: ClaimConfig,
    pub events: EventsConfig,
    pub bundles: BundlesConfig,
    pub templates: TemplatesConfig,
    pub database: DatabaseConfig,
}

/// Retry and backoff for transient store failures, plus the bound on
/// re-reads when a completion or release races a sibling write
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClaimConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Fraction of the computed delay added as random jitter (0.0 - 1.0)
    pub jitter_factor: f64,
    pub max_conflict_retries: u32,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 25,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            max_conflict_retries: 16,
        }
    }
}

impl ClaimConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BundlesConfig {
    /// First sequence number handed out by a factory; raise it after a restart
    pub sequence_start: u64,
}

impl Default for BundlesConfig {
    fn default() -> Self {
        Self { sequence_start: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TemplatesConfig {
    /// Directory of `*.yaml`/`*.yml` template files loaded at startup
    pub directory: String,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            directory: "config/templates".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/garment_flow_development".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 5,
        }
    }
}

impl FlowConfig {
    /// Reject values the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        let claim = &self.claim;
        if claim.max_attempts == 0 {
            return Err(invalid("claim.max_attempts", "must be at least 1"));
        }
        if !claim.backoff_multiplier.is_finite() || claim.backoff_multiplier < 1.0 {
            return Err(invalid("claim.backoff_multiplier", "must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&claim.jitter_factor) {
            return Err(invalid("claim.jitter_factor", "must be between 0.0 and 1.0"));
        }
        if claim.base_delay_ms > claim.max_delay_ms {
            return Err(invalid(
                "claim.base_delay_ms",
                "must not exceed claim.max_delay_ms",
            ));
        }
        if claim.max_conflict_retries == 0 {
            return Err(invalid("claim.max_conflict_retries", "must be at least 1"));
        }
        if self.events.channel_capacity == 0 {
            return Err(invalid("events.channel_capacity", "must be greater than 0"));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections", "must be greater than 0"));
        }
        if self.database.url.trim().is_empty() {
            return Err(invalid("database.url", "must not be blank"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> FlowError {
    FlowError::ConfigurationError(format!("{field} {reason}"))
}
