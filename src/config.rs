// runtime configuration
// everything is resolved once at startup and handed down explicitly;
// nothing below this layer reads the environment

use clap::ValueEnum;
use std::path::Path;
use tracing::info;

use crate::Error;
use crate::core::{PolicyConfig, PoolSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Everything `serve` needs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub pool: PoolSettings,
    pub api_key: Option<String>,
    pub policy: PolicyConfig,
}

/// Load the policy file if one is given, otherwise use the defaults, then
/// apply the strict mode override.
pub fn load_policy(path: Option<&Path>, strict_mode: Option<bool>) -> Result<PolicyConfig, Error> {
    let policy = match path {
        Some(path) => {
            let policy = PolicyConfig::load(path)?;
            info!(path = %path.display(), "loaded safety policy");
            policy
        }
        None => {
            info!("no policy file given, using the default read-only policy");
            PolicyConfig::default()
        }
    };

    Ok(match strict_mode {
        Some(strict) => policy.with_strict_mode(strict),
        None => policy,
    })
}
