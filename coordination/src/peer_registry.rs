//! The coordinator's process-wide table of remote workers (§3 PeerNode).
//!
//! The map itself is a [`DashMap`] keyed by `process_id`; each entry's
//! mutable fields are behind their own short-held mutex, so one worker's
//! metrics update never blocks a lookup of another.

use shardline_model::{PeerSnapshot, WorkerMetrics};
use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};

/// How long a worker may go without a heartbeat before it's considered dead.
pub const PEER_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug)]
struct PeerNode {
    url: String,
    assigned_shards: Vec<u32>,
    max_shards: Option<u32>,
    last_heartbeat: u64,
    metrics: Option<WorkerMetrics>,
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: dashmap::DashMap<String, Mutex<PeerNode>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, process_id: String, url: String, max_shards: Option<u32>, now: u64) {
        self.peers.insert(
            process_id,
            Mutex::new(PeerNode { url, assigned_shards: Vec::new(), max_shards, last_heartbeat: now, metrics: None }),
        );
    }

    /// Removes a peer, returning the shard ids it had been assigned.
    pub fn remove(&self, process_id: &str) -> Option<Vec<u32>> {
        self.peers
            .remove(process_id)
            .map(|(_, node)| node.into_inner().unwrap_or_else(PoisonError::into_inner).assigned_shards)
    }

    pub fn contains(&self, process_id: &str) -> bool {
        self.peers.contains_key(process_id)
    }

    pub fn record_metrics(&self, metrics: WorkerMetrics, now: u64) -> Result<()> {
        let entry = self.peers.get(&metrics.process_id).ok_or_else(|| Error::unknown_peer(metrics.process_id.clone()))?;
        let mut node = entry.lock().unwrap_or_else(PoisonError::into_inner);
        node.last_heartbeat = now;
        node.metrics = Some(metrics);
        Ok(())
    }

    pub fn assign(&self, process_id: &str, shard_id: u32) -> Result<()> {
        let entry = self.peers.get(process_id).ok_or_else(|| Error::unknown_peer(process_id))?;
        let mut node = entry.lock().unwrap_or_else(PoisonError::into_inner);
        if !node.assigned_shards.contains(&shard_id) {
            node.assigned_shards.push(shard_id);
        }
        Ok(())
    }

    pub fn unassign(&self, process_id: &str, shard_id: u32) -> Result<()> {
        let entry = self.peers.get(process_id).ok_or_else(|| Error::unknown_peer(process_id))?;
        entry.lock().unwrap_or_else(PoisonError::into_inner).assigned_shards.retain(|&id| id != shard_id);
        Ok(())
    }

    pub fn url_of(&self, process_id: &str) -> Option<String> {
        self.peers.get(process_id).map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).url.clone())
    }

    pub fn assigned_shards_of(&self, process_id: &str) -> Vec<u32> {
        self.peers
            .get(process_id)
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).assigned_shards.clone())
            .unwrap_or_default()
    }

    pub fn all_assigned_shards(&self) -> Vec<u32> {
        self.peers
            .iter()
            .flat_map(|entry| entry.value().lock().unwrap_or_else(PoisonError::into_inner).assigned_shards.clone())
            .collect()
    }

    /// The busiest worker by assigned-shard count, excluding `except`. Used
    /// by the "steal a shard for the new worker" assignment rule (§4.5.1).
    pub fn worker_with_most_shards_excluding(&self, except: &str) -> Option<String> {
        self.peers
            .iter()
            .filter(|entry| entry.key() != except)
            .max_by_key(|entry| entry.value().lock().unwrap_or_else(PoisonError::into_inner).assigned_shards.len())
            .map(|entry| entry.key().clone())
    }

    pub fn process_ids(&self) -> Vec<String> {
        self.peers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Process ids whose last heartbeat is older than [`PEER_TIMEOUT_MS`].
    pub fn dead_peers(&self, now: u64) -> Vec<String> {
        self.peers
            .iter()
            .filter(|entry| now.saturating_sub(entry.value().lock().unwrap_or_else(PoisonError::into_inner).last_heartbeat) > PEER_TIMEOUT_MS)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        self.peers
            .iter()
            .map(|entry| {
                let node = entry.value().lock().unwrap_or_else(PoisonError::into_inner);
                PeerSnapshot {
                    process_id: entry.key().clone(),
                    url: node.url.clone(),
                    assigned_shards: node.assigned_shards.clone(),
                    max_shards: node.max_shards,
                    last_heartbeat: node.last_heartbeat,
                    metrics: node.metrics.clone(),
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_peer_has_no_shards_and_is_healthy() {
        let registry = PeerRegistry::new();
        registry.upsert("w1".into(), "http://a".into(), None, 1_000);
        assert!(registry.assigned_shards_of("w1").is_empty());
        assert!(registry.dead_peers(1_000).is_empty());
    }

    #[test]
    fn dead_peers_are_those_past_the_timeout() {
        let registry = PeerRegistry::new();
        registry.upsert("w1".into(), "http://a".into(), None, 0);
        registry.upsert("w2".into(), "http://b".into(), None, 10_000);
        let dead = registry.dead_peers(20_000);
        assert_eq!(dead, vec!["w1".to_owned()]);
    }

    #[test]
    fn assign_and_unassign_round_trip() {
        let registry = PeerRegistry::new();
        registry.upsert("w1".into(), "http://a".into(), None, 0);
        registry.assign("w1", 3).unwrap();
        registry.assign("w1", 3).unwrap();
        assert_eq!(registry.assigned_shards_of("w1"), vec![3]);
        registry.unassign("w1", 3).unwrap();
        assert!(registry.assigned_shards_of("w1").is_empty());
    }

    #[test]
    fn assigning_to_an_unknown_peer_fails() {
        let registry = PeerRegistry::new();
        assert!(registry.assign("ghost", 0).is_err());
    }

    #[test]
    fn remove_returns_the_peers_former_shards() {
        let registry = PeerRegistry::new();
        registry.upsert("w1".into(), "http://a".into(), None, 0);
        registry.assign("w1", 1).unwrap();
        registry.assign("w1", 2).unwrap();
        let mut shards = registry.remove("w1").unwrap();
        shards.sort_unstable();
        assert_eq!(shards, vec![1, 2]);
        assert!(!registry.contains("w1"));
    }

    #[test]
    fn steals_from_the_busiest_worker() {
        let registry = PeerRegistry::new();
        registry.upsert("w1".into(), "http://a".into(), None, 0);
        registry.upsert("w2".into(), "http://b".into(), None, 0);
        registry.assign("w1", 0).unwrap();
        registry.assign("w1", 1).unwrap();
        registry.assign("w2", 2).unwrap();
        registry.upsert("w3".into(), "http://c".into(), None, 0);
        assert_eq!(registry.worker_with_most_shards_excluding("w3"), Some("w1".to_owned()));
    }
}
