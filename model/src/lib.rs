//! Wire and domain types shared across the shardline crates.
//!
//! Nothing in this crate talks to a socket or a clock; it only describes the
//! shapes that cross those boundaries, so every type here derives
//! `Serialize`/`Deserialize` and round-trips through JSON unchanged.

pub mod coordination;
pub mod gateway;
pub mod shard;

pub use coordination::*;
pub use gateway::*;
pub use shard::*;
