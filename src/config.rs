use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use svc_bus::{SvcConfig, channel::DEFAULT_CAPACITY};

/// Environment variable holding the path of the JSON config file.
pub const CONFIG_ENV: &str = "SVC_RELAY_CONFIG";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub svc: SvcConfig,
    pub queue_capacity: usize,
    pub log_level: String,
    /// write every grid decoder's output as `<tag>.yuv` under the work dir
    pub dump_decoded: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            svc: SvcConfig::default(),
            queue_capacity: DEFAULT_CAPACITY,
            log_level: "info".to_string(),
            dump_decoded: false,
        }
    }
}

impl RelayConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let mut config: Self = serde_json::from_str(json).context("parse relay config")?;
        config.svc.clamp();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json(&json)
    }

    /// Reads the file named by `SVC_RELAY_CONFIG`, defaults when unset.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn level_filter(&self) -> anyhow::Result<log::LevelFilter> {
        self.log_level
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid log level {:?}", self.log_level))
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
