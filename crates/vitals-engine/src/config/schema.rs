use serde::Deserialize;
use vitals_core::error::{Result, VitalsError};

use crate::storage::validate_descriptor;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VitalsConfig {
    pub version: u32,

    #[serde(default)]
    pub metrics: MetricsSection,
}

impl VitalsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(VitalsError::Configuration(
                "unsupported config version (expected 1)".into(),
            ));
        }
        self.metrics.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    /// Backend descriptor: `memory://` or `sqlite://path/to/metrics.db`.
    #[serde(default = "default_storage")]
    pub storage: String,

    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,

    #[serde(default = "default_enable_cleanup")]
    pub enable_cleanup: bool,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            storage: default_storage(),
            retention_hours: default_retention_hours(),
            enable_cleanup: default_enable_cleanup(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl MetricsSection {
    pub fn validate(&self) -> Result<()> {
        // Unknown scheme must fail here, before any request is served.
        validate_descriptor(&self.storage)?;

        if !(1..=8760).contains(&self.retention_hours) {
            return Err(VitalsError::Configuration(
                "metrics.retention_hours must be between 1 and 8760".into(),
            ));
        }
        if !(60..=86400).contains(&self.cleanup_interval_secs) {
            return Err(VitalsError::Configuration(
                "metrics.cleanup_interval_secs must be between 60 and 86400".into(),
            ));
        }
        Ok(())
    }
}

fn default_storage() -> String {
    "memory://".into()
}
fn default_retention_hours() -> u32 {
    24
}
fn default_enable_cleanup() -> bool {
    true
}
fn default_cleanup_interval_secs() -> u64 {
    3600
}
