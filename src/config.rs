use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::models::{AiProvider, AiSettings};

/// Scheduler credentials shorter than this are refused at start-up.
pub const MIN_SCHEDULER_TOKEN_LEN: usize = 16;

pub const DEFAULT_PWNED_API_URL: &str = "https://api.pwnedpasswords.com";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "SPENDWISE_SCHEDULER_TOKEN must be at least {} characters",
        MIN_SCHEDULER_TOKEN_LEN
    )]
    WeakSchedulerToken,

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub migrations_path: PathBuf,
    /// Pre-shared credential for trusted schedulers. `None` disables it.
    pub scheduler_token: Option<String>,
    /// Period of the in-process materialization task, if enabled.
    pub materialize_interval: Option<Duration>,
    pub pwned_api_url: String,
    pub ai: AiSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let scheduler_token = match non_empty_var("SPENDWISE_SCHEDULER_TOKEN") {
            Some(token) if token.len() < MIN_SCHEDULER_TOKEN_LEN => {
                return Err(ConfigError::WeakSchedulerToken)
            }
            other => other,
        };

        let materialize_interval = match non_empty_var("SPENDWISE_MATERIALIZE_INTERVAL_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    return Err(ConfigError::InvalidValue {
                        name: "SPENDWISE_MATERIALIZE_INTERVAL_SECS",
                        value: raw,
                    })
                }
            },
            None => None,
        };

        let port = match non_empty_var("SPENDWISE_PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                name: "SPENDWISE_PORT",
                value: raw,
            })?,
            None => 7070,
        };

        Ok(Self {
            host: env::var("SPENDWISE_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
            database_path: env::var("SPENDWISE_DATABASE_URL")
                .map(|v| {
                    PathBuf::from(
                        v.strip_prefix("sqlite://")
                            .or_else(|| v.strip_prefix("sqlite:"))
                            .unwrap_or(&v),
                    )
                })
                .unwrap_or_else(|_| PathBuf::from("data/spendwise.db")),
            migrations_path: env::var("SPENDWISE_MIGRATIONS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("migrations")),
            scheduler_token,
            materialize_interval,
            pwned_api_url: non_empty_var("SPENDWISE_PWNED_API_URL")
                .unwrap_or_else(|| DEFAULT_PWNED_API_URL.into()),
            ai: ai_settings_from_env()?,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn ai_settings_from_env() -> Result<AiSettings, ConfigError> {
    let provider = match non_empty_var("SPENDWISE_AI_PROVIDER") {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            name: "SPENDWISE_AI_PROVIDER",
            value: raw,
        })?,
        None => AiProvider::default(),
    };

    Ok(AiSettings {
        provider,
        base_url: non_empty_var("SPENDWISE_AI_BASE_URL")
            .unwrap_or_else(|| provider.default_base_url().into()),
        api_key: non_empty_var("SPENDWISE_AI_API_KEY").unwrap_or_default(),
        model: non_empty_var("SPENDWISE_AI_MODEL")
            .unwrap_or_else(|| provider.default_model().into()),
    })
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
