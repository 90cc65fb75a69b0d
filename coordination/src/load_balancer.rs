//! Coordinator-side rebalancing sweep (§4.5): runs every 10s, migrates one
//! shard at a time away from overloaded workers.

use shardline_model::ShardInfo;
use std::{future::Future, time::Duration};
use tokio::task::JoinHandle;

pub const BALANCE_INTERVAL: Duration = Duration::from_secs(10);
pub const CPU_OVERLOAD_THRESHOLD: f64 = 0.80;
pub const CPU_CANDIDATE_THRESHOLD: f64 = 0.60;
pub const LATENCY_OVERLOAD_MS: u64 = 500;

/// A worker is overloaded if it owns more than one shard and either its CPU
/// usage exceeds 80% or any of its shards' latency exceeds 500ms.
pub fn is_overloaded(cpu_usage: f64, shard_latencies_ms: &[Option<u64>], shard_count: usize) -> bool {
    if shard_count <= 1 {
        return false;
    }

    let latency_exceeded = shard_latencies_ms.iter().any(|latency| latency.is_some_and(|ms| ms > LATENCY_OVERLOAD_MS));
    cpu_usage > CPU_OVERLOAD_THRESHOLD || latency_exceeded
}

/// Per-worker shard cap, scaling with fleet size.
pub fn shard_cap(total_workers: usize) -> Option<u32> {
    match total_workers {
        0 | 1 => None,
        2 => Some(8),
        3 | 4 => Some(6),
        5..=8 => Some(4),
        _ => Some(2),
    }
}

/// A migration target candidate: healthy, under 60% CPU, and with room
/// under the scaled cap.
pub fn is_candidate(cpu_usage: f64, assigned: usize, total_workers: usize) -> bool {
    let under_cap = match shard_cap(total_workers) {
        Some(cap) => (assigned as u32) < cap,
        None => true,
    };
    cpu_usage < CPU_CANDIDATE_THRESHOLD && under_cap
}

/// The shard with the highest reported latency, preferred migration
/// candidate for an overloaded worker.
pub fn worst_shard(shards: &[ShardInfo]) -> Option<u32> {
    shards.iter().max_by_key(|shard| shard.latency_ms.unwrap_or(0)).map(|shard| shard.id)
}

pub fn spawn<F, Fut>(mut on_tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(BALANCE_INTERVAL);
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
    fn a_single_shard_worker_is_never_overloaded() {
        assert!(!is_overloaded(0.95, &[Some(1000)], 1));
    }

    #[test]
    fn high_cpu_with_multiple_shards_is_overloaded() {
        assert!(is_overloaded(0.81, &[Some(10)], 2));
    }

    #[test]
    fn high_latency_with_multiple_shards_is_overloaded() {
        assert!(is_overloaded(0.1, &[Some(501)], 2));
    }

    #[test]
    fn caps_scale_with_fleet_size() {
        assert_eq!(shard_cap(1), None);
        assert_eq!(shard_cap(2), Some(8));
        assert_eq!(shard_cap(4), Some(6));
        assert_eq!(shard_cap(8), Some(4));
        assert_eq!(shard_cap(20), Some(2));
    }

    #[test]
    fn candidate_requires_low_cpu_and_room_under_cap() {
        assert!(is_candidate(0.3, 1, 3));
        assert!(!is_candidate(0.3, 6, 3));
        assert!(!is_candidate(0.7, 1, 3));
    }

    #[test]
    fn worst_shard_picks_highest_latency() {
        let shards = vec![
            ShardInfo { id: 0, status: shardline_model::ShardStatus::Ready, latency_ms: Some(50), events_per_sec: 0.0, commands_per_sec: 0.0, guild_count: 0 },
            ShardInfo { id: 1, status: shardline_model::ShardStatus::Ready, latency_ms: Some(900), events_per_sec: 0.0, commands_per_sec: 0.0, guild_count: 0 },
        ];
        assert_eq!(worst_shard(&shards), Some(1));
    }
}
