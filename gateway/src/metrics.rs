use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, PoisonError,
    },
    time::{Duration, Instant},
};

/// Heartbeat round-trip latency over the lifetime of a session.
#[derive(Clone, Debug)]
pub struct Latency {
    heartbeats: u32,
    received: Option<Instant>,
    recent: [u64; Self::RECENT_LEN],
    sent: Option<Instant>,
    total_time: u64,
}

impl Latency {
    const RECENT_LEN: usize = 5;

    pub const fn new() -> Self {
        Self { heartbeats: 0, received: None, recent: [0; Self::RECENT_LEN], sent: None, total_time: 0 }
    }

    /// Average round-trip time across every heartbeat this session has
    /// sent, or `None` if none has been acknowledged yet.
    pub fn average(&self) -> Option<Duration> {
        Duration::from_millis(self.total_time).checked_div(self.heartbeats)
    }

    pub const fn heartbeats(&self) -> u32 {
        self.heartbeats
    }

    /// Most recent acknowledged round-trip time, if any.
    pub fn most_recent(&self) -> Option<Duration> {
        (self.heartbeats > 0).then(|| Duration::from_millis(self.recent[0]))
    }

    pub(crate) fn track_sent(&mut self) {
        self.received = None;
        self.sent = Some(Instant::now());
    }

    pub(crate) fn track_received(&mut self) {
        self.received = Some(Instant::now());
        self.heartbeats += 1;

        if let Some(duration) = self.sent.map(|instant| instant.elapsed()) {
            let Ok(millis) = u64::try_from(duration.as_millis()) else {
                tracing::error!(?duration, "heartbeat round trip overflowed u64 millis");
                return;
            };

            self.total_time += millis;
            self.recent.rotate_right(1);
            self.recent[0] = millis;
        }
    }
}

impl Default for Latency {
    fn default() -> Self {
        Self::new()
    }
}

/// Cumulative dispatch/command counters, used to derive events-per-second
/// and commands-per-second for a shard's reported [`ShardInfo`].
///
/// [`ShardInfo`]: shardline_model::ShardInfo
#[derive(Debug, Default)]
pub struct EventCounters {
    events: AtomicU64,
    commands: AtomicU64,
    started_at: once_started::StartedAt,
}

mod once_started {
    use std::time::Instant;

    /// Lazily-initialized start time, set on first use so a counter that is
    /// never touched doesn't report a bogus near-zero elapsed time.
    #[derive(Debug)]
    pub struct StartedAt(std::sync::OnceLock<Instant>);

    impl Default for StartedAt {
        fn default() -> Self {
            Self(std::sync::OnceLock::new())
        }
    }

    impl StartedAt {
        pub fn get_or_init(&self) -> Instant {
            *self.0.get_or_init(Instant::now)
        }
    }
}

impl EventCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&self) {
        self.started_at.get_or_init();
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command(&self) {
        self.started_at.get_or_init();
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_per_sec(&self) -> f64 {
        rate(self.events.load(Ordering::Relaxed), self.started_at.get_or_init())
    }

    pub fn commands_per_sec(&self) -> f64 {
        rate(self.commands.load(Ordering::Relaxed), self.started_at.get_or_init())
    }
}

fn rate(count: u64, started_at: Instant) -> f64 {
    let elapsed = started_at.elapsed().as_secs_f64();
    if elapsed < 1.0 {
        count as f64
    } else {
        count as f64 / elapsed
    }
}

/// The full set of counters a single shard reports in its [`ShardInfo`].
///
/// [`ShardInfo`]: shardline_model::ShardInfo
#[derive(Debug, Default)]
pub struct ShardMetrics {
    pub events: EventCounters,
    guilds: Mutex<HashSet<u64>>,
}

impl ShardMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_guild_create(&self, guild_id: u64) {
        self.guilds.lock().unwrap_or_else(PoisonError::into_inner).insert(guild_id);
    }

    pub fn record_guild_delete(&self, guild_id: u64) {
        self.guilds.lock().unwrap_or_else(PoisonError::into_inner).remove(&guild_id);
    }

    /// Whether `guild_id` is currently counted as hosted on this shard.
    pub fn has_guild(&self, guild_id: u64) -> bool {
        self.guilds.lock().unwrap_or_else(PoisonError::into_inner).contains(&guild_id)
    }

    pub fn guild_count(&self) -> u64 {
        self.guilds.lock().unwrap_or_else(PoisonError::into_inner).len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_has_no_average_until_first_ack() {
        let latency = Latency::new();
        assert!(latency.average().is_none());
    }

    #[test]
    fn latency_tracks_round_trip() {
        let mut latency = Latency::new();
        latency.track_sent();
        std::thread::sleep(Duration::from_millis(5));
        latency.track_received();

        assert_eq!(latency.heartbeats(), 1);
        assert!(latency.average().unwrap() >= Duration::from_millis(1));
    }

    #[test]
    fn event_counters_start_at_zero() {
        let counters = EventCounters::new();
        assert_eq!(counters.events_per_sec(), 0.0);
        assert_eq!(counters.commands_per_sec(), 0.0);
    }

    #[test]
    fn shard_metrics_tracks_guild_membership_not_just_a_count() {
        let metrics = ShardMetrics::new();
        metrics.record_guild_create(1);
        metrics.record_guild_create(2);
        assert_eq!(metrics.guild_count(), 2);
        assert!(metrics.has_guild(1));

        metrics.record_guild_delete(1);
        assert_eq!(metrics.guild_count(), 1);
        assert!(!metrics.has_guild(1));
        assert!(metrics.has_guild(2));
    }

    #[test]
    fn deleting_an_unknown_guild_is_a_no_op() {
        let metrics = ShardMetrics::new();
        metrics.record_guild_delete(999);
        assert_eq!(metrics.guild_count(), 0);
    }
}
