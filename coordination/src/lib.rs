//! The distributed coordination protocol (§6): peer registry, succession
//! list, health and load-balancing sweeps, the coordinator and worker
//! roles, and the HTTP surface that ties them together.

mod client;
mod coordinator;
mod error;
mod health_monitor;
mod load_balancer;
mod peer_registry;
mod server;
mod succession;
mod worker;

pub use client::CoordinationClient;
pub use coordinator::Coordinator;
pub use error::{Error, ErrorType, Result};
pub use health_monitor::HEALTH_CHECK_INTERVAL;
pub use load_balancer::BALANCE_INTERVAL;
pub use peer_registry::{PeerRegistry, PEER_TIMEOUT_MS};
pub use server::router;
pub use succession::{SuccessionEntry, SuccessionList};
pub use worker::{DefaultResourceSampler, ResourceSampler, Worker, HEALTH_PROBE_INTERVAL, METRICS_PUSH_INTERVAL, PROMOTION_FAILURE_THRESHOLD};

#[cfg(test)]
mod static_assertions_tests {
    use super::{CoordinationClient, Coordinator, PeerRegistry, SuccessionList, Worker};
    use static_assertions::assert_impl_all;

    assert_impl_all!(CoordinationClient: Clone, Send, Sync, std::fmt::Debug);
    assert_impl_all!(PeerRegistry: Send, Sync, std::fmt::Debug);
    assert_impl_all!(SuccessionList: Send, Sync, std::fmt::Debug);
    assert_impl_all!(Coordinator: Send, Sync, std::fmt::Debug);
    assert_impl_all!(Worker: Send, Sync, std::fmt::Debug);
}
