//! Coordinator-side liveness sweep (§4.5): runs every 5s, declares a peer
//! dead after 3 missed heartbeats (15s).

use crate::peer_registry::PEER_TIMEOUT_MS;
use std::{future::Future, time::Duration};
use tokio::task::JoinHandle;

pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

pub fn is_dead(last_heartbeat: u64, now: u64) -> bool {
    now.saturating_sub(last_heartbeat) > PEER_TIMEOUT_MS
}

/// Spawns a task that invokes `on_tick` every [`HEALTH_CHECK_INTERVAL`].
/// `on_tick` is expected to evict dead peers, reassign their shards, and
/// broadcast the resulting succession; see [`crate::coordinator::Coordinator::run_health_check`].
pub fn spawn<F, Fut>(mut on_tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        loop {
            interval.tick().await;
            on_tick().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_is_dead_once_past_fifteen_seconds() {
        assert!(!is_dead(0, 15_000));
        assert!(is_dead(0, 15_001));
    }
}
