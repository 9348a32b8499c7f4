//! Progress extraction from the transcoder's diagnostic stream.
//!
//! ffmpeg reports progress on stderr as status lines of the form:
//!
//! ```text
//! frame=  157 fps= 52 q=28.0 size=     512KiB time=00:00:06.57 bitrate= 638.1kbits/s speed=13.1x
//! ```
//!
//! The scanner picks out the last `time=HH:MM:SS[.ss]` field and the last
//! `<number>x` speed token in a chunk. Chunks arrive on pipe-buffer
//! boundaries, so one chunk may carry several status lines or a partial one.

use std::sync::LazyLock;

use regex::Regex;

static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid timestamp pattern")
});

static SPEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?x\b").expect("valid speed pattern"));

/// Fields recovered from one diagnostic chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    /// Completion percentage, present only when the expected duration is known.
    pub percent: Option<f64>,
    /// Media time processed so far, in seconds.
    pub elapsed_seconds: Option<f64>,
    /// Verbatim speed token such as `13.1x`.
    pub speed: Option<String>,
}

impl ProgressUpdate {
    /// True when the chunk carried no usable progress information.
    pub fn is_empty(&self) -> bool {
        self.elapsed_seconds.is_none()
    }
}

/// Scan a diagnostic chunk for progress fields.
///
/// A chunk without a `time=` field yields an empty update even when a speed
/// token is present: speed alone says nothing about position.
pub fn extract(chunk: &str, expected_duration_seconds: Option<f64>) -> ProgressUpdate {
    let Some(elapsed) = last_timestamp_seconds(chunk) else {
        return ProgressUpdate::default();
    };

    let percent = expected_duration_seconds
        .filter(|duration| *duration > 0.0)
        .map(|duration| (elapsed / duration * 100.0).clamp(0.0, 100.0));

    ProgressUpdate {
        percent,
        elapsed_seconds: Some(elapsed),
        speed: last_speed_token(chunk),
    }
}

/// Seconds represented by the last `time=HH:MM:SS[.ss]` field in the chunk.
///
/// Only `time=` fields count: the input metadata banner repeats the full
/// duration as a bare `Duration: 00:02:00.00` timestamp, which must not
/// read as elapsed time. Field values are not range checked:
/// `time=00:00:60.00` reads as sixty seconds.
fn last_timestamp_seconds(chunk: &str) -> Option<f64> {
    let caps = TIMESTAMP_RE.captures_iter(chunk).last()?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn last_speed_token(chunk: &str) -> Option<String> {
    SPEED_RE
        .find_iter(chunk)
        .last()
        .map(|m| m.as_str().to_string())
}

/// Project the remaining wall-clock seconds from processing rate so far.
///
/// Returns `None` until the duration is known and at least some media time
/// has been processed over a measurable wall interval. A job that has run
/// past its expected duration reports zero rather than a negative estimate.
pub fn estimate_eta_seconds(
    expected_duration_seconds: Option<f64>,
    elapsed_media_seconds: f64,
    wall_seconds: f64,
) -> Option<f64> {
    let duration = expected_duration_seconds.filter(|d| *d > 0.0)?;
    if wall_seconds <= 0.0 || elapsed_media_seconds <= 0.0 {
        return None;
    }
    let rate = elapsed_media_seconds / wall_seconds;
    Some(((duration - elapsed_media_seconds) / rate).max(0.0))
}
