//! Command implementations.

mod decode;
mod export;
mod info;
mod live;
mod validate;

pub use decode::run_decode;
pub use export::run_export;
pub use info::run_info;
pub use live::run_live;
pub use validate::run_validate;

use std::path::Path;

use anyhow::{Context, Result};
use contracts::TelemetryConfig;

/// Load and validate a config file
fn load_config(path: &Path) -> Result<TelemetryConfig> {
    if !path.exists() {
        anyhow::bail!("Configuration file not found: {}", path.display());
    }
    config_loader::ConfigLoader::load_from_path(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}
