pub mod ports;
pub mod serve;
pub mod simulate;

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use pulsewatch_core::PipelineConfig;
use pulsewatch_server::ServerConfig;

/// On-disk configuration. Both sections are optional; missing fields keep
/// their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
}

impl FileConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("cannot parse config {}", path.display()))?;
        config.pipeline.validate()?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }
}

/// Runtime for the blocking CLI entry points.
pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("cannot start the async runtime")
}
