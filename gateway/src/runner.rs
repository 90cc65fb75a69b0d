//! A [`ShardRunner`] owns one [`GatewaySession`] and turns its raw snapshot
//! and counters into the [`ShardInfo`] that gets reported up to the
//! coordinator.

use crate::{
    metrics::ShardMetrics,
    session::{Dispatcher as EventDispatcher, ErrorSink, GatewaySession, GatewaySessionConfig},
};
use shardline_model::{DispatchEvent, ShardInfo};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};

/// A shard's dispatcher callback: invoked with every decoded `Dispatch`
/// event the shard receives, in order.
pub type Dispatcher = Box<dyn Fn(DispatchEvent) + Send + Sync>;

/// Runs a single shard's gateway session and exposes its health as a
/// [`ShardInfo`] snapshot.
#[derive(Debug)]
pub struct ShardRunner {
    id: u32,
    session: GatewaySession,
    metrics: Arc<ShardMetrics>,
    _forward: JoinHandle<()>,
}

impl ShardRunner {
    pub fn start(config: GatewaySessionConfig, id: u32, dispatcher: Dispatcher, error_sink: ErrorSink) -> Self {
        let metrics = Arc::new(ShardMetrics::new());
        let (tx, mut rx): (EventDispatcher, mpsc::UnboundedReceiver<DispatchEvent>) = mpsc::unbounded_channel();

        let forward = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                dispatcher(event);
            }
        });

        let session = GatewaySession::connect(config, tx, Arc::clone(&metrics), error_sink);

        Self { id, session, metrics, _forward: forward }
    }

    pub const fn id(&self) -> u32 {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.session.is_finished()
    }

    #[must_use]
    pub fn info(&self) -> ShardInfo {
        let snapshot = self.session.snapshot();

        ShardInfo {
            id: self.id,
            status: snapshot.stage.status(),
            latency_ms: snapshot.latency.map(|latency| latency.as_millis() as u64),
            events_per_sec: self.metrics.events.events_per_sec(),
            commands_per_sec: self.metrics.events.commands_per_sec(),
            guild_count: self.metrics.guild_count(),
        }
    }

    pub async fn shutdown(self) {
        self.session.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(ShardRunner: Send, Sync, std::fmt::Debug);
}
