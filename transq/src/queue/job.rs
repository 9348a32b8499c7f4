//! Job records tracked by the queue.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for the dispatch loop to pick it up.
    Queued,
    /// Owned by the currently executing attempt.
    Running,
    /// Process exited successfully.
    Completed,
    /// Process failed and no retry is owed.
    Failed,
    /// Canceled by request before or during execution.
    Canceled,
}

impl JobStatus {
    /// True for states the dispatch loop will never pick up again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Sort rank for presentation: running first, queued next, then settled.
    pub(crate) fn display_rank(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Queued => 1,
            Self::Completed => 2,
            Self::Failed => 3,
            Self::Canceled => 4,
        }
    }
}

/// Everything needed to enqueue one transcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Source media file.
    pub input_path: PathBuf,
    /// Destination file the process writes.
    pub output_path: PathBuf,
    /// Full argument vector passed to the transcoder binary.
    pub argv: Vec<String>,
    /// Media duration in seconds, when known up front.
    pub expected_duration_seconds: Option<f64>,
}

impl JobSpec {
    /// Create a spec with no known duration.
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        argv: Vec<String>,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            argv,
            expected_duration_seconds: None,
        }
    }

    /// Attach the expected media duration in seconds.
    pub fn with_expected_duration(mut self, seconds: f64) -> Self {
        self.expected_duration_seconds = Some(seconds);
        self
    }
}

/// A tracked transcode job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier assigned at enqueue time.
    pub id: String,
    /// Source media file.
    pub input_path: PathBuf,
    /// Destination file the process writes.
    pub output_path: PathBuf,
    /// Argument vector passed to the transcoder binary.
    pub argv: Vec<String>,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Completion percentage, 0 to 100. Stays 0 when the duration is unknown.
    pub progress_percent: f64,
    /// Most recent speed token reported by the process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_label: Option<String>,
    /// Projected seconds until completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    /// When the most recent attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
    /// Failure description for failed jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Media duration in seconds, when known.
    pub expected_duration_seconds: Option<f64>,
    /// When the job was added to the queue.
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn from_spec(spec: JobSpec) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            input_path: spec.input_path,
            output_path: spec.output_path,
            argv: spec.argv,
            status: JobStatus::Queued,
            progress_percent: 0.0,
            speed_label: None,
            eta_seconds: None,
            started_at: None,
            ended_at: None,
            error_message: None,
            expected_duration_seconds: spec.expected_duration_seconds,
            created_at: Utc::now(),
        }
    }

    /// Return the job to the queued state with execution fields wiped.
    pub(crate) fn reset_for_retry(&mut self) {
        self.status = JobStatus::Queued;
        self.progress_percent = 0.0;
        self.speed_label = None;
        self.eta_seconds = None;
        self.started_at = None;
        self.ended_at = None;
        self.error_message = None;
    }
}
