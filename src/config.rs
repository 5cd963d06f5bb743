use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::lorawan::keys::{KeyPrefixes, NoncePolicy};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registry: RegistryConfig,
    pub sessions: SessionConfig,
    pub join: JoinConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// JSON-lines provisioning file
    pub keys_file: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Append-only session log
    pub file: PathBuf,
}

/// Join procedure policy. Nonce reuse and the derivation prefixes change
/// the derived keys, so keep them fixed for a given fleet.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    pub nonce_policy: NoncePolicy,
    pub key_prefixes: KeyPrefixes,
    /// Pause before emitting a Join-Accept (RX1 join window)
    pub accept_delay_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        Ok(config)
    }
}

impl JoinConfig {
    pub fn accept_delay(&self) -> Duration {
        Duration::from_millis(self.accept_delay_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            keys_file: PathBuf::from("local/lora-keys.txt"),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("local/lora-sessions.txt"),
        }
    }
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            nonce_policy: NoncePolicy::Fresh,
            key_prefixes: KeyPrefixes::Lorawan,
            accept_delay_ms: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
