//! Runner behavior against real processes, with `sh` standing in for the
//! transcoder binary.

#![cfg(unix)]

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use transq::{Error, FfmpegRunner, ProcessRunner, RunnerConfig};

fn sh_runner(tail_lines: usize) -> FfmpegRunner {
    FfmpegRunner::with_config(RunnerConfig {
        binary_path: "sh".to_string(),
        tail_lines,
    })
}

fn argv(script: &str) -> Vec<String> {
    vec!["-c".to_string(), script.to_string()]
}

#[tokio::test]
async fn successful_run_forwards_stderr_chunks() {
    let runner = sh_runner(12);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = runner
        .run(
            &argv("echo 'time=00:00:01.00 speed=2x' 1>&2; exit 0"),
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.exit_code, Some(0));
    assert!(outcome.error_output.is_none());

    let mut chunks = Vec::new();
    while let Ok(chunk) = rx.try_recv() {
        chunks.push(chunk);
    }
    assert_eq!(chunks, vec!["time=00:00:01.00 speed=2x".to_string()]);
}

#[tokio::test]
async fn carriage_return_statuses_arrive_as_separate_chunks() {
    // ffmpeg rewrites its status line in place with bare carriage returns;
    // each rewrite must reach the queue as its own chunk.
    let runner = sh_runner(12);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = runner
        .run(
            &argv("printf 'time=00:00:01.00 speed=1x\\rtime=00:00:02.00 speed=1x\\r' 1>&2; exit 0"),
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.success);
    let mut chunks = Vec::new();
    while let Ok(chunk) = rx.try_recv() {
        chunks.push(chunk);
    }
    assert_eq!(
        chunks,
        vec![
            "time=00:00:01.00 speed=1x".to_string(),
            "time=00:00:02.00 speed=1x".to_string(),
        ]
    );
}

#[tokio::test]
async fn failure_reports_a_bounded_stderr_tail() {
    let runner = sh_runner(1);
    let (tx, _rx) = mpsc::unbounded_channel();

    let outcome = runner
        .run(
            &argv("echo 'boom line A' 1>&2; echo 'boom line B' 1>&2; exit 3"),
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.exit_code, Some(3));
    assert_eq!(outcome.error_output.as_deref(), Some("boom line B"));
}

#[tokio::test]
async fn quiet_failure_has_no_error_output() {
    let runner = sh_runner(12);
    let (tx, _rx) = mpsc::unbounded_channel();

    let outcome = runner
        .run(&argv("exit 5"), tx, CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.exit_code, Some(5));
    assert!(outcome.error_output.is_none());
}

#[tokio::test]
async fn missing_binary_is_a_launch_error() {
    let runner = FfmpegRunner::with_config(
        RunnerConfig::default().with_binary_path("definitely-not-a-real-binary-7c2f"),
    );
    let (tx, _rx) = mpsc::unbounded_channel();

    let error = runner
        .run(&argv("exit 0"), tx, CancellationToken::new())
        .await
        .unwrap_err();

    match error {
        Error::Launch { binary, .. } => {
            assert!(binary.contains("definitely-not-a-real-binary"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn cancellation_kills_a_running_process() {
    let runner = sh_runner(4);
    let (tx, _rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = timeout(
        Duration::from_secs(5),
        runner.run(&argv("sleep 30"), tx, cancel),
    )
    .await
    .expect("kill did not complete in time")
    .unwrap();

    assert!(!outcome.success);
}

#[tokio::test]
async fn cancel_mid_stream_terminates_promptly() {
    let runner = sh_runner(4);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            // Wait for proof the process is alive, then cancel.
            let _ = rx.recv().await;
            cancel.cancel();
        })
    };

    let outcome = timeout(
        Duration::from_secs(5),
        runner.run(&argv("echo 'rolling' 1>&2; sleep 30"), tx, cancel),
    )
    .await
    .expect("kill did not complete in time")
    .unwrap();

    let _ = canceller.await;
    assert!(!outcome.success);
    assert!(outcome.exit_code.is_none());
}

#[tokio::test]
async fn probing_a_missing_binary_yields_nothing() {
    let runner = FfmpegRunner::with_config(
        RunnerConfig::default().with_binary_path("definitely-not-a-real-binary-7c2f"),
    );
    assert!(runner.probe_version().await.is_none());
}
