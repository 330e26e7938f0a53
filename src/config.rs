//! Bot configuration, loaded once from a JSON file at startup.

use std::path::Path;
use std::time::Duration;

use serde_derive::Deserialize;

use crate::bot::constants::{defaults, ControlState};
use crate::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub host: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_true")]
    pub keep_alive: bool,
    #[serde(default = "default_probe_interval")]
    pub probe_interval: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: u64,
}

/// Scripted input vocabulary and retry parameters. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionConfig {
    pub commands: Vec<ControlState>,
    pub hold_duration: u64,
    pub retry_delay: u64,
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BotConfig {
    pub client: ClientConfig,
    pub action: ActionConfig,
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    defaults::CONNECT_TIMEOUT_MS
}

fn default_probe_interval() -> u64 {
    defaults::PROBE_INTERVAL_MS
}

fn default_probe_timeout() -> u64 {
    defaults::PROBE_TIMEOUT_MS
}

fn default_max_retry_delay() -> u64 {
    defaults::MAX_RETRY_DELAY_MS
}

// ports may be written as a number or as a numeric string
#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Text(String),
}

fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match <PortValue as serde::Deserialize>::deserialize(deserializer)? {
        PortValue::Number(port) => Ok(port),
        PortValue::Text(text) => text
            .trim()
            .parse::<u16>()
            .map_err(|err| serde::de::Error::custom(format!("invalid port `{text}`: {err}"))),
    }
}

impl BotConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|err| AppError::Config(format!("invalid config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("cannot read config {}: {err}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    fn validate(&self) -> Result<()> {
        if self.client.host.trim().is_empty() {
            return Err(AppError::Config("client.host must not be empty".into()));
        }
        if self.client.username.trim().is_empty() {
            return Err(AppError::Config("client.username must not be empty".into()));
        }
        if self.client.connect_timeout == 0 {
            return Err(AppError::Config("client.connectTimeout must be positive".into()));
        }
        if self.client.probe_interval == 0 || self.client.probe_timeout == 0 {
            return Err(AppError::Config(
                "client.probeInterval and client.probeTimeout must be positive".into(),
            ));
        }
        if self.action.commands.is_empty() {
            return Err(AppError::Config("action.commands must not be empty".into()));
        }
        if self.action.hold_duration == 0 {
            return Err(AppError::Config("action.holdDuration must be positive".into()));
        }
        if self.action.retry_delay == 0 {
            return Err(AppError::Config("action.retryDelay must be positive".into()));
        }
        if self.action.max_retry_delay < self.action.retry_delay {
            return Err(AppError::Config(format!(
                "action.maxRetryDelay ({}) must be >= action.retryDelay ({})",
                self.action.max_retry_delay, self.action.retry_delay
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn hold_duration(&self) -> Duration {
        Duration::from_millis(self.action.hold_duration)
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.action.retry_delay)
    }

    #[must_use]
    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.action.max_retry_delay)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.client.connect_timeout)
    }

    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.client.probe_interval)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.client.probe_timeout)
    }
}
