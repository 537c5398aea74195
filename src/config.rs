use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::phantasma_client::DEFAULT_RPC_URL;
use crate::retry::RetryPolicy;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(String),
    #[error("invalid value {value:?} for {name}")]
    Invalid { name: String, value: String },
}

/// Knobs of a synchronization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Chains walked at the same time.
    pub chain_concurrency: usize,
    /// Blocks fetched ahead of the committer on each chain.
    pub block_prefetch: usize,
    /// Run the balance stage only when accounts existed before the run started.
    pub legacy_balance_gating: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            chain_concurrency: 2,
            block_prefetch: 16,
            legacy_balance_gating: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub rpc_url: String,
    pub retry: RetryPolicy,
    pub sync: SyncConfig,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ConfigError::Missing("DATABASE_URL".to_string()))?;
        let rpc_url = lookup("RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
        let defaults = RetryPolicy::default();
        let sync_defaults = SyncConfig::default();
        let retry = RetryPolicy {
            timeout: Duration::from_millis(parse_or(
                &lookup,
                "RPC_TIMEOUT_MS",
                defaults.timeout.as_millis() as u64,
            )?),
            max_retries: parse_or(&lookup, "RPC_MAX_RETRIES", defaults.max_retries)?,
            initial_delay: Duration::from_millis(parse_or(
                &lookup,
                "RPC_RETRY_DELAY_MS",
                defaults.initial_delay.as_millis() as u64,
            )?),
            max_delay: MAX_RETRY_DELAY,
        };
        let sync = SyncConfig {
            chain_concurrency: positive(
                "CHAIN_CONCURRENCY",
                parse_or(&lookup, "CHAIN_CONCURRENCY", sync_defaults.chain_concurrency)?,
            )?,
            block_prefetch: positive(
                "BLOCK_PREFETCH",
                parse_or(&lookup, "BLOCK_PREFETCH", sync_defaults.block_prefetch)?,
            )?,
            legacy_balance_gating: parse_or(
                &lookup,
                "LEGACY_BALANCE_GATING",
                sync_defaults.legacy_balance_gating,
            )?,
        };
        Ok(Config {
            database_url,
            rpc_url,
            retry,
            sync,
        })
    }
}

fn parse_or<T, F>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            name: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn positive(name: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            name: name.to_string(),
            value: value.to_string(),
        });
    }
    Ok(value)
}
