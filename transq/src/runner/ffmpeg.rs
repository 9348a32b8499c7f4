//! ffmpeg-backed process runner.
//!
//! Spawns the configured binary with piped stdio, forwards stderr chunks to
//! the queue as they arrive, and keeps a bounded tail of diagnostic lines
//! for failure reporting.

use std::collections::VecDeque;
use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RunnerConfig;
use crate::error::{Error, Result};
use crate::runner::{ProcessRunner, RunOutcome};

/// Runs an ffmpeg-compatible binary, one process per call.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner {
    config: RunnerConfig,
}

impl FfmpegRunner {
    /// Runner with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner with a specific configuration.
    pub fn with_config(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// First line of `<binary> -version` output, if the binary responds.
    pub async fn probe_version(&self) -> Option<String> {
        let output = Command::new(&self.config.binary_path)
            .arg("-version")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout.lines().next().map(|line| line.trim().to_string())
    }
}

#[async_trait]
impl ProcessRunner for FfmpegRunner {
    async fn run(
        &self,
        argv: &[String],
        chunks: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        debug!("Launching {} {}", self.config.binary_path, argv.join(" "));

        let mut child = Command::new(&self.config.binary_path)
            .args(argv)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::launch(&self.config.binary_path, e.to_string()))?;

        // ffmpeg stays quiet on stdout but the pipe must still be drained.
        let drain = child.stdout.take().map(|stdout| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(_)) = lines.next_line().await {}
            })
        });

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Other("Failed to capture transcoder stderr".to_string()))?;
        let mut reader = BufReader::new(stderr);
        let mut partial = Vec::new();

        let mut tail: VecDeque<String> = VecDeque::with_capacity(self.config.tail_lines);
        let mut killed = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Stop reading right away: descendants of the killed
                    // child can inherit the pipe and hold it open past the
                    // kill, so EOF may never come.
                    killed = true;
                    let _ = child.start_kill();
                    break;
                }
                line = next_diagnostic_line(&mut reader, &mut partial) => match line {
                    Ok(Some(line)) => {
                        if !line.is_empty() {
                            if self.config.tail_lines > 0 {
                                if tail.len() == self.config.tail_lines {
                                    tail.pop_front();
                                }
                                tail.push_back(line.clone());
                            }
                            let _ = chunks.send(line);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Error reading transcoder output: {}", e);
                        break;
                    }
                },
            }
        }

        // Reaping must not depend on stderr reaching EOF. Cancellation
        // arriving after EOF must still terminate the process rather than
        // wait out a stuck exit.
        let status = if killed {
            child.wait().await?
        } else {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    child.wait().await?
                }
                status = child.wait() => status?,
            }
        };

        if let Some(handle) = drain {
            // The drain task can outlive the child while an orphaned
            // descendant holds stdout open.
            handle.abort();
        }

        let success = status.success();
        let error_output = if success || tail.is_empty() {
            None
        } else {
            Some(tail.iter().cloned().collect::<Vec<_>>().join("\n"))
        };

        debug!(
            "{} exited with {:?} (success: {})",
            self.config.binary_path,
            status.code(),
            success
        );

        Ok(RunOutcome {
            exit_code: status.code(),
            success,
            error_output,
        })
    }
}

/// Read one diagnostic line, treating `\r` and `\n` both as terminators.
///
/// ffmpeg rewrites its status line in place, ending it with a bare carriage
/// return; splitting on `\n` alone would batch every status update until the
/// next newline or EOF.
async fn next_diagnostic_line<R>(reader: &mut R, partial: &mut Vec<u8>) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if partial.is_empty() {
                return Ok(None);
            }
            let line = String::from_utf8_lossy(partial).into_owned();
            partial.clear();
            return Ok(Some(line));
        }
        match available.iter().position(|&b| b == b'\n' || b == b'\r') {
            Some(pos) => {
                partial.extend_from_slice(&available[..pos]);
                reader.consume(pos + 1);
                let line = String::from_utf8_lossy(partial).into_owned();
                partial.clear();
                return Ok(Some(line));
            }
            None => {
                let len = available.len();
                partial.extend_from_slice(available);
                reader.consume(len);
            }
        }
    }
}
