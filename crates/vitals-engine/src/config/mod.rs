//! Engine config loader (strict parsing).

pub mod schema;

use std::fs;

use vitals_core::error::{Result, VitalsError};

pub use schema::{MetricsSection, VitalsConfig};

pub fn load_from_file(path: &str) -> Result<VitalsConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| VitalsError::Configuration(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<VitalsConfig> {
    let cfg: VitalsConfig = serde_yaml::from_str(s)
        .map_err(|e| VitalsError::Configuration(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
