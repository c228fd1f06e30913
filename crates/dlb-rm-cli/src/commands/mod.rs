//! CLI command implementations.

mod config;
mod plan;
mod resources;

use std::path::Path;

use anyhow::Context;
use dlb_rm_core::{load_config, DeviceConfig};

pub use config::config;
pub use plan::{plan, PlanArgs};
pub use resources::{resources, ResourcesArgs};

/// Configuration from `path`, or from the standard locations.
pub fn device_config(path: Option<&Path>) -> anyhow::Result<DeviceConfig> {
    match path {
        Some(path) => DeviceConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => load_config().context("loading configuration"),
    }
}
