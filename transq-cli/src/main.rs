mod probe;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::broadcast;
use tracing::{info, warn};
use transq::{
    FfmpegRunner, JobSpec, JobStatus, QueueEvent, QueueState, RetryPolicy, RunnerConfig,
    StartOptions, TranscodeQueue,
    logging::{self, LoggingOptions},
};

/// Queue media files through an ffmpeg-compatible binary, one at a time.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input media files, transcoded in the order given
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory for transcoded output
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Container extension for output files
    #[arg(short, long, default_value = "mp4")]
    format: String,

    /// Extra argument inserted between input and output (repeatable)
    #[arg(long = "ffmpeg-arg")]
    ffmpeg_args: Vec<String>,

    /// Transcoder binary to invoke
    #[arg(long, env = "TRANSQ_FFMPEG", default_value = "ffmpeg")]
    ffmpeg: String,

    /// Probe binary used to read media durations
    #[arg(long, env = "TRANSQ_FFPROBE", default_value = "ffprobe")]
    ffprobe: String,

    /// Automatically retry failed jobs
    #[arg(long)]
    retry: bool,

    /// Failure ceiling per job when --retry is set
    #[arg(long, default_value_t = 2)]
    max_retries: u32,

    /// Expected duration in seconds, applied to every input (skips probing)
    #[arg(long)]
    duration: Option<f64>,

    /// Emit queue events as JSON lines instead of progress bars
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory for daily-rotated log files
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let fallback = if args.json {
        "transq=error"
    } else if args.verbose {
        "transq=debug"
    } else {
        "transq=warn"
    };
    let _guard = logging::init(&LoggingOptions {
        filter: Some(fallback.to_string()),
        log_dir: args.log_dir.clone(),
    })
    .context("failed to initialize logging")?;

    let runner = FfmpegRunner::with_config(RunnerConfig::default().with_binary_path(&args.ffmpeg));
    match runner.probe_version().await {
        Some(version) => info!("Using {}", version),
        None => warn!("Could not probe {} -version; continuing anyway", args.ffmpeg),
    }

    std::fs::create_dir_all(&args.output_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            args.output_dir.display()
        )
    })?;

    let queue = TranscodeQueue::new(Arc::new(runner));
    let mut events = queue.subscribe();

    for input in &args.inputs {
        let duration = match args.duration {
            Some(seconds) => Some(seconds),
            None => probe::duration_seconds(&args.ffprobe, input).await,
        };
        let output = output_path_for(input, &args.output_dir, &args.format);
        let argv = build_argv(input, &output, &args.ffmpeg_args);
        let mut spec = JobSpec::new(input.clone(), output, argv);
        if let Some(seconds) = duration {
            spec = spec.with_expected_duration(seconds);
        }
        queue.add_job(spec);
    }

    let retry = if args.retry {
        RetryPolicy::enabled(args.max_retries)
    } else {
        RetryPolicy::default()
    };
    queue.start(StartOptions::with_retry(retry));

    let failed = if args.json {
        stream_json(&mut events).await?
    } else {
        render_bars(&queue, &mut events).await?
    };

    if failed > 0 {
        bail!("{failed} job(s) failed");
    }
    Ok(())
}

fn output_path_for(input: &Path, output_dir: &Path, format: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output_dir.join(format!("{stem}.{format}"))
}

fn build_argv(input: &Path, output: &Path, extra: &[String]) -> Vec<String> {
    let mut argv = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
    ];
    if extra.is_empty() {
        // Without explicit codec arguments, remux into the target container.
        argv.push("-c".to_string());
        argv.push("copy".to_string());
    } else {
        argv.extend(extra.iter().cloned());
    }
    argv.push(output.to_string_lossy().into_owned());
    argv
}

fn queue_settled(state: &QueueState) -> bool {
    !state.is_running && state.jobs.iter().all(|job| job.status.is_terminal())
}

fn failed_jobs(state: &QueueState) -> usize {
    state
        .jobs
        .iter()
        .filter(|job| job.status == JobStatus::Failed)
        .count()
}

/// Print every queue event as one JSON line until the queue settles.
async fn stream_json(events: &mut broadcast::Receiver<QueueEvent>) -> anyhow::Result<usize> {
    loop {
        match events.recv().await {
            Ok(event) => {
                println!("{}", serde_json::to_string(&event)?);
                if let QueueEvent::StateChange { state } = &event {
                    if queue_settled(state) {
                        return Ok(failed_jobs(state));
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Dropped {} events; receiver lagged", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                bail!("event stream closed unexpectedly")
            }
        }
    }
}

/// Drive one progress bar per job until the queue settles.
async fn render_bars(
    queue: &TranscodeQueue,
    events: &mut broadcast::Receiver<QueueEvent>,
) -> anyhow::Result<usize> {
    let multi = MultiProgress::new();
    let style = ProgressStyle::with_template("{prefix:.bold} [{bar:30}] {pos:>3}% {msg}")
        .context("invalid progress template")?;

    let mut bars: HashMap<String, ProgressBar> = HashMap::new();
    for job in queue.get_state().jobs {
        let bar = multi.add(ProgressBar::new(100));
        bar.set_style(style.clone());
        bar.set_prefix(
            job.input_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| job.input_path.display().to_string()),
        );
        bars.insert(job.id.clone(), bar);
    }

    loop {
        match events.recv().await {
            Ok(QueueEvent::Progress {
                job_id,
                percent,
                speed,
                eta_seconds,
            }) => {
                if let Some(bar) = bars.get(&job_id) {
                    bar.set_position(percent.round() as u64);
                    let mut message = speed.unwrap_or_default();
                    if let Some(eta) = eta_seconds {
                        message = format!("{message} eta {eta:.0}s");
                    }
                    bar.set_message(message);
                }
            }
            Ok(QueueEvent::JobComplete {
                job_id,
                success,
                error,
            }) => {
                if let Some(bar) = bars.get(&job_id) {
                    if success {
                        bar.set_position(100);
                        bar.finish_with_message("done");
                    } else {
                        bar.abandon_with_message(error.unwrap_or_else(|| "failed".to_string()));
                    }
                }
            }
            Ok(QueueEvent::StateChange { state }) => {
                for job in &state.jobs {
                    if job.status == JobStatus::Canceled {
                        if let Some(bar) = bars.get(&job.id) {
                            if !bar.is_finished() {
                                bar.abandon_with_message("canceled");
                            }
                        }
                    }
                }
                if queue_settled(&state) {
                    return Ok(failed_jobs(&state));
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Dropped {} events; receiver lagged", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                bail!("event stream closed unexpectedly")
            }
        }
    }
}
