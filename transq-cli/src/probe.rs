//! Media duration probing via ffprobe.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

/// Duration of the input in seconds, read with `ffprobe`.
///
/// Any probing problem reports `None`; the queue then runs the job with
/// duration-free progress.
pub async fn duration_seconds(ffprobe: &str, input: &Path) -> Option<f64> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .stdin(Stdio::null())
        .output()
        .await;

    let output = match output {
        Ok(output) => output,
        Err(e) => {
            warn!("Failed to launch {}: {}", ffprobe, e);
            return None;
        }
    };
    if !output.status.success() {
        warn!("{} failed for {}", ffprobe, input.display());
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let duration = parse_duration_output(&stdout);
    if let Some(seconds) = duration {
        debug!("{} runs {:.2}s", input.display(), seconds);
    }
    duration
}

fn parse_duration_output(stdout: &str) -> Option<f64> {
    stdout.trim().parse::<f64>().ok().filter(|d| *d > 0.0)
}
