//! SFU configuration

use serde::{Deserialize, Serialize};

/// Worker selection policy used when binding a new room's router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerSelection {
    RoundRobin,
    Random,
}

/// SFU configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuConfig {
    /// Number of media workers to spawn
    pub workers: usize,
    /// How new rooms are assigned to workers
    pub worker_selection: WorkerSelection,
    /// Maximum participants per room (0 = unlimited)
    pub max_participants_per_room: usize,
    /// Interval between worker health checks, in seconds
    pub health_check_interval_secs: u64,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            worker_selection: WorkerSelection::RoundRobin,
            max_participants_per_room: 0,
            health_check_interval_secs: 5,
        }
    }
}
