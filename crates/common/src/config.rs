use std::time::Duration;

use url::Url;

use crate::{Address, ContractConfig, Error, Result, POLYGON_MAINNET};

/// All configuration loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Identity
    pub owner_address: Address,
    pub signer_url: Url,

    // Remote services
    pub clob_url: Url,
    pub relayer_url: Url,
    pub rpc_url: Url,

    // Control API
    pub control_token: String,
    pub control_port: u16,

    // Database
    pub database_url: String,

    // Confirmation polling
    pub confirmation_poll: Duration,
    pub confirmation_max_polls: u32,

    pub activate_on_start: bool,

    pub contracts: ContractConfig,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let owner_address = required_env("OWNER_ADDRESS")?
            .parse()
            .map_err(|e| Error::Config(format!("OWNER_ADDRESS: {e}")))?;

        Ok(Config {
            owner_address,
            signer_url: url_env("SIGNER_URL", None)?,
            clob_url: url_env("CLOB_URL", Some("https://clob.polymarket.com"))?,
            relayer_url: url_env("RELAYER_URL", Some("https://relayer-v2.polymarket.com"))?,
            rpc_url: url_env("RPC_URL", Some("https://polygon-rpc.com"))?,
            control_token: required_env("CONTROL_TOKEN")?,
            control_port: parsed_env("CONTROL_PORT")?.unwrap_or(8080),
            database_url: optional_env("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://sessions.db?mode=rwc".to_string()),
            confirmation_poll: Duration::from_millis(
                parsed_env("CONFIRMATION_POLL_MS")?.unwrap_or(2_000),
            ),
            confirmation_max_polls: parsed_env("CONFIRMATION_MAX_POLLS")?.unwrap_or(100),
            activate_on_start: parsed_env("ACTIVATE_ON_START")?.unwrap_or(false),
            contracts: POLYGON_MAINNET,
        })
    }
}

fn required_env(key: &str) -> Result<String> {
    optional_env(key).ok_or_else(|| {
        Error::Config(format!(
            "Required environment variable '{key}' is not set. Check your .env file."
        ))
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_env<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("{key}='{v}': {e}")))
        })
        .transpose()
}

fn url_env(key: &str, default: Option<&str>) -> Result<Url> {
    let raw = match (optional_env(key), default) {
        (Some(v), _) => v,
        (None, Some(d)) => d.to_string(),
        (None, None) => required_env(key)?,
    };
    Url::parse(&raw).map_err(|e| Error::Config(format!("{key}='{raw}' is not a valid URL: {e}")))
}
