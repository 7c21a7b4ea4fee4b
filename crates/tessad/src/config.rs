//! Configuration management for tessad.
//!
//! Loads settings from /etc/tessa/config.toml or uses defaults.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{info, warn};

use tessa_common::llm::CompletionConfig;
use tessa_common::retry::RetryConfig;
use tessa_common::tracker::TrackerConfig;

use crate::batch::BatchConfig;
use crate::jql::KeywordJoin;

/// Config file path
pub const CONFIG_PATH: &str = "/etc/tessa/config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchConfig {
    /// Join operator between keyword clauses.
    #[serde(default)]
    pub keyword_join: KeywordJoin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle drafts are dropped after this many seconds.
    #[serde(default = "default_idle_expiry_secs")]
    pub idle_expiry_secs: u64,
}

fn default_idle_expiry_secs() -> u64 {
    1800
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_expiry_secs: default_idle_expiry_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TessadConfig {
    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub batch: BatchConfig,
}

impl TessadConfig {
    /// Load from the default path, falling back to defaults when the file
    /// is absent or unreadable.
    pub fn load() -> Self {
        match Self::load_from_path(CONFIG_PATH) {
            Ok(config) => {
                info!("Loaded config from {}", CONFIG_PATH);
                config
            }
            Err(e) => {
                warn!("Could not load {} ({}), using defaults", CONFIG_PATH, e);
                Self::default()
            }
        }
    }

    pub fn load_from_path(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}
