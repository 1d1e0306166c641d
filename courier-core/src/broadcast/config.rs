use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Period of the liveness sweep. A subscriber that misses the probe sent
    /// on one sweep is evicted on the next.
    pub heartbeat_interval: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}
