//! Events broadcast to queue subscribers.

use serde::{Deserialize, Serialize};

use crate::queue::job::Job;

/// Snapshot of the whole queue, suitable for rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueState {
    /// All tracked jobs in presentation order.
    pub jobs: Vec<Job>,
    /// Id of the job currently owned by an attempt, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_job_id: Option<String>,
    /// Whether the dispatch loop is armed.
    pub is_running: bool,
}

/// One observable queue occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// Numeric progress for the active job.
    Progress {
        job_id: String,
        percent: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        speed: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        eta_seconds: Option<f64>,
    },
    /// A job reached completed or failed.
    JobComplete {
        job_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Any other change to the tracked set or queue flags.
    StateChange { state: QueueState },
}
