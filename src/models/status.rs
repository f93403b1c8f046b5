use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state a worker reports about itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Waiting,
    Processing,
    Verifying,
    Cooling,
    Error,
    Finished,
}

impl WorkerState {
    pub fn is_alive(self) -> bool {
        !matches!(self, Self::Error | Self::Finished)
    }
}

/// Last known state of one worker. Overwritten in place, never accumulated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerStatus {
    pub worker_id: usize,
    pub state: WorkerState,
    pub current_job_id: Option<String>,
    pub progress: usize,
}

/// Everything a worker publishes on the status channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Worker(WorkerStatus),
    /// A key was retired (invalid or failed a usage cycle).
    KeyRetired,
    /// The provider answered with a rate-limit error.
    RateLimited,
}
