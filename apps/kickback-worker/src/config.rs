use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::str::FromStr;
use std::time::Duration;

/// How the reward guard treats a referrer who already earned a reward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardPolicy {
    /// Every further batch of validated referrals earns another reward.
    #[default]
    Repeating,
    /// A referrer is rewarded at most once, ever.
    Once,
}

impl FromStr for RewardPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "repeating" => Ok(RewardPolicy::Repeating),
            "once" => Ok(RewardPolicy::Once),
            other => Err(anyhow::anyhow!("Unknown reward policy '{}'", other)),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_oracle_timeout_secs() -> u64 {
    10
}

fn default_notify_timeout_secs() -> u64 {
    5
}

fn default_watch_interval_secs() -> u64 {
    300
}

fn default_reward_link() -> String {
    "/referrals".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_oracle_timeout_secs")]
    pub oracle_timeout_secs: u64,
    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,
    #[serde(default)]
    pub reward_policy: RewardPolicy,
    #[serde(default = "default_watch_interval_secs")]
    pub watch_interval_secs: u64,
    #[serde(default = "default_reward_link")]
    pub reward_link: String,
}

impl WorkerConfig {
    pub fn load() -> Result<Self> {
        let config_paths = ["/etc/kickback/worker.toml", "./worker.toml"];

        for path in config_paths {
            if let Ok(contents) = fs::read_to_string(path) {
                tracing::info!("Loading config from {}", path);
                return Self::from_toml(&contents).with_context(|| format!("Invalid config in {}", path));
            }
        }

        tracing::info!("Loading config from environment");
        Self::from_env(|key| std::env::var(key).ok())
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_env(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            database_url: var("DATABASE_URL").context("DATABASE_URL must be set")?,
            db_max_connections: parse_number(&var, "DB_MAX_CONNECTIONS", default_max_connections())?,
            oracle_timeout_secs: parse_number(&var, "ORACLE_TIMEOUT_SECS", default_oracle_timeout_secs())?,
            notify_timeout_secs: parse_number(&var, "NOTIFY_TIMEOUT_SECS", default_notify_timeout_secs())?,
            reward_policy: match var("REWARD_POLICY") {
                Some(v) => v.parse()?,
                None => RewardPolicy::default(),
            },
            watch_interval_secs: parse_number(&var, "WATCH_INTERVAL_SECS", default_watch_interval_secs())?,
            reward_link: var("REWARD_LINK").unwrap_or_else(default_reward_link),
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            oracle_timeout: Duration::from_secs(self.oracle_timeout_secs),
            notify_timeout: Duration::from_secs(self.notify_timeout_secs),
            reward_policy: self.reward_policy,
            reward_link: Some(self.reward_link.clone()).filter(|l| !l.is_empty()),
        }
    }
}

fn parse_number<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{} must be a whole number, got '{}'", key, v)),
        None => Ok(default),
    }
}

/// Runtime knobs of a validation pass.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub oracle_timeout: Duration,
    pub notify_timeout: Duration,
    pub reward_policy: RewardPolicy,
    pub reward_link: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            oracle_timeout: Duration::from_secs(default_oracle_timeout_secs()),
            notify_timeout: Duration::from_secs(default_notify_timeout_secs()),
            reward_policy: RewardPolicy::default(),
            reward_link: Some(default_reward_link()),
        }
    }
}
