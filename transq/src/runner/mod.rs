//! Process execution seam.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub mod ffmpeg;

pub use ffmpeg::FfmpegRunner;

/// Result of one finished process run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Exit code, absent when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Trailing diagnostic output, kept only for unsuccessful runs.
    pub error_output: Option<String>,
}

/// Executes one external transcode process per call.
///
/// `Err` means the process could not be launched at all. A launched process
/// always resolves to `Ok`, including after cancellation: cancelling the
/// token must terminate the process, and the call still returns once the
/// process is gone.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        argv: &[String],
        chunks: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome>;
}
