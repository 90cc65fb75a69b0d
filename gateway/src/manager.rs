//! [`ShardManager`] owns every shard runner this process is responsible for
//! and is the surface a worker process drives (§4.3).

use crate::{
    error::{Error, Result},
    runner::{Dispatcher, ShardRunner},
    session::{ErrorSink, GatewaySessionConfig},
};
use dashmap::DashMap;
use shardline_model::{Intents, ShardInfo};
use std::sync::Arc;

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// Immutable configuration shared by every shard this manager runs.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub token: String,
    pub intents: Intents,
    pub total_shards: u32,
    pub gateway_url: String,
}

impl ManagerConfig {
    pub fn new(token: impl Into<String>, intents: Intents, total_shards: u32) -> Self {
        Self { token: token.into(), intents, total_shards, gateway_url: DEFAULT_GATEWAY_URL.to_owned() }
    }
}

/// Owns the set of shards this process currently runs, keyed by shard id.
///
/// Cloning a `ShardManager` is cheap and shares the same underlying runner
/// set, mirroring the `Cluster` handle pattern this is grounded on.
#[derive(Clone, Debug, Default)]
pub struct ShardManager {
    config: Option<ManagerConfig>,
    runners: Arc<DashMap<u32, ShardRunner>>,
}

impl ShardManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self { config: Some(config), runners: Arc::new(DashMap::new()) }
    }

    /// Start running the given shard id. Returns [`ErrorType::AlreadyRunning`]
    /// if this manager already owns a runner for that id.
    ///
    /// [`ErrorType::AlreadyRunning`]: crate::error::ErrorType::AlreadyRunning
    pub fn start(&self, id: u32, dispatcher: Dispatcher, error_sink: ErrorSink) -> Result<()> {
        let config = self.config.as_ref().expect("ShardManager::start called on a manager built with Default");

        if self.runners.contains_key(&id) {
            return Err(Error::already_running(id));
        }

        let session_config = GatewaySessionConfig {
            token: config.token.clone(),
            intents: config.intents,
            shard: Some((id, config.total_shards)),
            gateway_url: config.gateway_url.clone(),
        };

        let runner = ShardRunner::start(session_config, id, dispatcher, error_sink);
        self.runners.insert(id, runner);
        Ok(())
    }

    /// Stop a running shard, if present. A no-op if the id isn't running.
    pub async fn stop(&self, id: u32) {
        if let Some((_, runner)) = self.runners.remove(&id) {
            runner.shutdown().await;
        }
    }

    /// Stop every shard this manager is running.
    pub async fn shutdown_all(&self) {
        let ids: Vec<u32> = self.runners.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.stop(id).await;
        }
    }

    pub fn is_running(&self, id: u32) -> bool {
        self.runners.get(&id).is_some_and(|runner| !runner.is_finished())
    }

    pub fn running_ids(&self) -> Vec<u32> {
        self.runners.iter().map(|entry| *entry.key()).collect()
    }

    /// Health/metrics snapshot for every shard this manager owns.
    pub fn snapshot(&self) -> Vec<ShardInfo> {
        self.runners.iter().map(|entry| entry.value().info()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(ShardManager: Clone, Send, Sync, std::fmt::Debug);

    #[tokio::test]
    async fn starting_an_already_running_shard_fails_fast() {
        let manager = ShardManager::new(ManagerConfig::new("token", Intents::empty(), 1));
        assert!(!manager.runners.contains_key(&0));

        manager.runners.insert(
            0,
            ShardRunner::start(
                GatewaySessionConfig {
                    token: "token".into(),
                    intents: Intents::empty(),
                    shard: Some((0, 1)),
                    gateway_url: "wss://unreachable.invalid".into(),
                },
                0,
                Box::new(|_| {}),
                Arc::new(|_| {}),
            ),
        );

        let error = manager.start(0, Box::new(|_| {}), Arc::new(|_| {})).unwrap_err();
        assert!(matches!(error.kind(), crate::error::ErrorType::AlreadyRunning { id: 0 }));

        manager.shutdown_all().await;
    }
}
