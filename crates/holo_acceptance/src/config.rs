//! Tunables for a replication check.

use std::time::Duration;

use crate::factor::DESIRED_REPLICATION_FACTOR;

/// Configuration for a single replication check.
#[derive(Clone, Debug)]
pub struct CheckConfig {
    /// Replication factor requested by deployment policy (capped by cluster size).
    pub desired_replicas: usize,
    /// Number of ticks to poll before giving up.
    pub max_attempts: usize,
    /// Wait between checks.
    pub tick_interval: Duration,
    /// Meta2 rows fetched per scan.
    pub scan_row_limit: usize,
    /// Capacity of the cluster event channel.
    pub event_buffer: usize,
    /// Index of the node the client connects to.
    pub node_index: usize,
    pub scheme: String,
    pub principal: String,
    /// Print per-attempt replica counts for operators.
    pub show_progress: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            desired_replicas: DESIRED_REPLICATION_FACTOR,
            max_attempts: 20,
            tick_interval: Duration::from_secs(1),
            scan_row_limit: 10,
            event_buffer: 10,
            node_index: 0,
            scheme: "https".to_string(),
            principal: "root".to_string(),
            show_progress: true,
        }
    }
}

impl CheckConfig {
    /// Clamp values where zero would make the check meaningless.
    pub fn normalized(mut self) -> Self {
        self.desired_replicas = self.desired_replicas.max(1);
        self.max_attempts = self.max_attempts.max(1);
        self.tick_interval = self.tick_interval.max(Duration::from_millis(1));
        self.scan_row_limit = self.scan_row_limit.max(1);
        self.event_buffer = self.event_buffer.max(1);
        self
    }

    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick_interval = tick;
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }
}
