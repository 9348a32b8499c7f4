//! Serialized transcode-job queue driving an external ffmpeg-compatible
//! binary.
//!
//! Jobs run strictly one at a time. Subscribers follow progress and state
//! through a broadcast event stream.

pub mod config;
pub mod error;
pub mod logging;
pub mod progress;
pub mod queue;
pub mod runner;

pub use config::{QueueConfig, RetryPolicy, RunnerConfig, StartOptions};
pub use error::{Error, Result};
pub use queue::TranscodeQueue;
pub use queue::events::{QueueEvent, QueueState};
pub use queue::job::{Job, JobSpec, JobStatus};
pub use runner::{FfmpegRunner, ProcessRunner, RunOutcome};
