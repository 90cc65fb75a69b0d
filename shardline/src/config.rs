//! Minimal environment-variable configuration (§10.3). No file formats, no
//! layered sources, no watching — just enough to boot one node.

use anyhow::{Context, Result};
use shardline_model::Intents;
use std::net::SocketAddr;

/// Everything one `shardline` process needs to start. `coordinator_url`
/// being absent means this node bootstraps the cluster as its original
/// coordinator.
#[derive(Clone, Debug)]
pub struct Config {
    pub discord_token: String,
    pub intents: Intents,
    pub process_id: String,
    pub public_url: String,
    pub listen_addr: SocketAddr,
    pub coordinator_url: Option<String>,
    pub is_original_coordinator: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let discord_token = env_var("SHARDLINE_DISCORD_TOKEN")?;
        let intents = Intents::from_bits_truncate(env_var_parsed("SHARDLINE_INTENTS").unwrap_or(0));
        let process_id = std::env::var("SHARDLINE_PROCESS_ID").unwrap_or_else(|_| generate_process_id());
        let public_url = env_var("SHARDLINE_PUBLIC_URL")?;
        let listen_addr: SocketAddr = env_var_parsed("SHARDLINE_LISTEN_ADDR")?;
        let coordinator_url = std::env::var("SHARDLINE_COORDINATOR_URL").ok().filter(|value| !value.is_empty());
        let is_original_coordinator = env_var_parsed("SHARDLINE_IS_ORIGINAL_COORDINATOR").unwrap_or(false);

        Ok(Self { discord_token, intents, process_id, public_url, listen_addr, coordinator_url, is_original_coordinator })
    }
}

fn env_var(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("missing required environment variable {name}"))
}

fn env_var_parsed<T: std::str::FromStr>(name: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_var(name)?.parse().with_context(|| format!("environment variable {name} failed to parse"))
}

fn generate_process_id() -> String {
    let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    format!("shardline-{nanos:x}")
}
