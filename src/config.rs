use std::{
    collections::HashMap,
    fs::{self, File},
    io::prelude::*,
    net::SocketAddr,
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::engine::{DEFAULT_MAX_EVENTS, EngineOptions};

/// Top-level configuration for the load generator, loaded from a TOML file.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SurgeConfig {
    /// Already-resolved targets, e.g. "10.0.0.5:8080".
    #[serde(default = "default_targets")]
    pub targets: Vec<String>,

    /// Byte pattern streamed on every connection.
    #[serde(default = "default_message")]
    pub message: String,

    /// Worker count override; unset means one worker per usable CPU.
    #[serde(default)]
    pub workers: Option<usize>,

    #[serde(default)]
    pub pin_workers: bool,

    #[serde(default = "default_max_events")]
    pub max_events: usize,

    #[serde(default)]
    pub load: LoadConfig,

    #[serde(flatten)]
    pub other_fields: HashMap<String, toml::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoadConfig {
    /// Connections to open in total.
    pub connections: u32,
    /// Connect commands per second, 0 opens everything at once.
    pub connect_rate: u32,
    /// Seconds to hold the load after ramp-up.
    pub duration: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            connections: 1,
            connect_rate: 100,
            duration: 10,
        }
    }
}

fn default_targets() -> Vec<String> {
    vec!["127.0.0.1:8080".to_string()]
}

fn default_message() -> String {
    "abc".to_string()
}

fn default_max_events() -> usize {
    DEFAULT_MAX_EVENTS
}

impl Default for SurgeConfig {
    fn default() -> Self {
        Self {
            targets: default_targets(),
            message: default_message(),
            workers: None,
            pin_workers: false,
            max_events: default_max_events(),
            load: LoadConfig::default(),
            other_fields: HashMap::new(),
        }
    }
}

impl SurgeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self, ConfigLoadError> {
        let raw = fs::read_to_string(path).map_err(ConfigLoadError::Io)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self, ConfigLoadError> {
        let config: Self = toml::from_str(raw).map_err(ConfigLoadError::Parse)?;

        for field in &config.other_fields {
            log::warn!(
                "Unknown configuration '{}' with value {:?}",
                field.0,
                field.1
            );
        }

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let config_str = toml::to_string(&self)?;
        let mut file = File::create(path)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }

    pub fn addresses(&self) -> anyhow::Result<Vec<SocketAddr>> {
        if self.targets.is_empty() {
            anyhow::bail!("no targets configured");
        }
        self.targets
            .iter()
            .map(|target| {
                let trimmed = target.trim();
                trimmed
                    .parse::<SocketAddr>()
                    .map_err(|err| anyhow::anyhow!("invalid target '{trimmed}': {err}"))
            })
            .collect()
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            workers: self.workers,
            pin_workers: self.pin_workers,
            max_events: self.max_events,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Could not open config")]
    Io(#[from] std::io::Error),
    #[error("Could not parse")]
    Parse(#[from] toml::de::Error),
}
