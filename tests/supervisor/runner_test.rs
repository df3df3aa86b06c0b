//! Supervisor tests driving `sh` scripts as stand-in workers.
//!
//! Scripts receive the job as positional parameters: `$1` url, `$2`
//! quality, `$3` destination.

use std::time::Duration;

use clipfetch::config::{ClipfetchConfig, WorkerConfig};
use clipfetch::notify::{ChannelNotifier, UiCommand, UiEvent};
use clipfetch::progress::Phase;
use clipfetch::supervisor::{
    JobOutcome, Quality, SessionStatus, StartRequest, Supervisor, SupervisorError,
};
use clipfetch::worker::{StreamKind, WorkerEvent, WorkerMessage};
use tempfile::TempDir;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_test::{assert_err, assert_ok};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Worker that answers control tokens the way the real worker does.
const INTERACTIVE_WORKER: &str = r#"
echo "[download] Destination: $3/clip.mp4"
echo "[download]  10.0% of 4.00MiB at 1.00MiB/s ETA 00:03"
while read cmd; do
  case "$cmd" in
    pause) echo "⏸ Download paused" ;;
    resume) echo "▶ Download resumed" ;;
    cancel) exit 0 ;;
  esac
done
"#;

fn config_for(script: &str) -> ClipfetchConfig {
    let mut config = ClipfetchConfig::default();
    config.worker = WorkerConfig {
        program: "sh".to_string(),
        script: None,
        extra_args: vec!["-c".to_string(), script.to_string(), "worker".to_string()],
    };
    config.timing.cancel_grace_ms = 200;
    config.timing.terminate_timeout_ms = 500;
    config.timing.stream_drain_ms = 200;
    config
}

fn supervisor_for(script: &str) -> (Supervisor<ChannelNotifier>, UnboundedReceiver<UiEvent>) {
    let (notifier, rx) = ChannelNotifier::channel();
    (Supervisor::new(config_for(script), notifier), rx)
}

fn request(dir: &TempDir) -> StartRequest {
    StartRequest::new("https://example.com/watch?v=abc", Quality::High, dir.path())
}

fn drain(rx: &mut UnboundedReceiver<UiEvent>) -> Vec<UiEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn run_until_released(supervisor: &mut Supervisor<ChannelNotifier>) {
    tokio::time::timeout(TIMEOUT, async {
        while supervisor.has_worker() {
            supervisor.step().await;
        }
    })
    .await
    .expect("worker was not released in time");
}

/// Step the supervisor until `wanted` has been emitted.
async fn step_until(
    supervisor: &mut Supervisor<ChannelNotifier>,
    rx: &mut UnboundedReceiver<UiEvent>,
    wanted: &UiEvent,
) -> Vec<UiEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(TIMEOUT, async {
        loop {
            seen.extend(drain(rx));
            if seen.contains(wanted) {
                return;
            }
            supervisor.step().await;
        }
    })
    .await
    .expect("event not emitted in time");
    seen
}

/// Step the supervisor until a `completed` event has been emitted.
async fn step_until_completed(
    supervisor: &mut Supervisor<ChannelNotifier>,
    rx: &mut UnboundedReceiver<UiEvent>,
) -> Vec<UiEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(TIMEOUT, async {
        loop {
            seen.extend(drain(rx));
            if seen.iter().any(|event| matches!(event, UiEvent::Completed { .. })) {
                return;
            }
            supervisor.step().await;
        }
    })
    .await
    .expect("job did not complete in time");
    seen
}

#[tokio::test]
async fn completed_job_returns_to_idle() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) = supervisor_for(
        r#"
echo "[download] Destination: $3/clip.mp4"
echo "[download]  50.0% of 10.00MiB at 1.00MiB/s ETA 00:05"
echo ""
echo "[download] 100% of 10.00MiB at 2.00MiB/s ETA 00:00"
"#,
    );

    let id = assert_ok!(supervisor.start(request(&dir)));
    assert_eq!(supervisor.status(), SessionStatus::Running);
    assert_eq!(supervisor.session().map(|s| s.id), Some(id));

    run_until_released(&mut supervisor).await;
    assert_eq!(supervisor.status(), SessionStatus::Idle);
    assert!(supervisor.session().is_none());
    assert_eq!(supervisor.last_outcome(), Some(&JobOutcome::Completed));
    assert!((supervisor.snapshot().percent - 100.0).abs() < f64::EPSILON);

    let events = drain(&mut rx);
    assert!(matches!(
        events.first(),
        Some(UiEvent::JobStarted { session_id, quality: Quality::High, .. }) if *session_id == id
    ));
    assert_eq!(
        events.last(),
        Some(&UiEvent::Completed {
            filename: "clip.mp4".to_string()
        })
    );

    let outputs = events
        .iter()
        .filter(|event| matches!(event, UiEvent::Output { .. }))
        .count();
    assert_eq!(outputs, 3, "blank lines are not forwarded");
    assert!(events
        .iter()
        .any(|event| matches!(event, UiEvent::Progress { snapshot } if snapshot.speed == "1.00MiB/s")));
}

#[tokio::test]
async fn completion_is_reported_once() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) = supervisor_for(
        r#"
echo "[Merger] Merging formats into \"$3/clip.mp4\""
echo "Deleting original file $3/clip.f1.mp4 (pass -k to keep)"
echo "Deleting original file $3/clip.f2.m4a (pass -k to keep)"
"#,
    );

    supervisor.start(request(&dir)).unwrap();
    run_until_released(&mut supervisor).await;

    let events = drain(&mut rx);
    let completed = events
        .iter()
        .filter(|event| matches!(event, UiEvent::Completed { .. }))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(supervisor.snapshot().phase, Phase::Finished);
}

#[tokio::test]
async fn finished_job_ignores_pause_and_stays_completed() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) = supervisor_for(
        r#"
echo "Deleting original file $3/clip.f1.mp4 (pass -k to keep)"
sleep 1
exit 0
"#,
    );

    supervisor.start(request(&dir)).unwrap();
    step_until_completed(&mut supervisor, &mut rx).await;
    assert!(supervisor.has_worker());
    assert_eq!(supervisor.status(), SessionStatus::Idle);
    assert_eq!(supervisor.snapshot().phase, Phase::Finished);

    assert!(!supervisor.pause());
    assert!(!supervisor.resume());

    run_until_released(&mut supervisor).await;
    assert_eq!(supervisor.status(), SessionStatus::Idle);
    assert_eq!(supervisor.last_outcome(), Some(&JobOutcome::Completed));
    let events = drain(&mut rx);
    assert!(!events.contains(&UiEvent::PausedImmediate));
    assert!(!events
        .iter()
        .any(|event| matches!(event, UiEvent::Cancelled | UiEvent::Error { .. })));
}

#[tokio::test]
async fn cancel_after_finish_keeps_completed_outcome() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) = supervisor_for(
        r#"
echo "Deleting original file $3/clip.f1.mp4 (pass -k to keep)"
exec sleep 30
"#,
    );

    supervisor.start(request(&dir)).unwrap();
    step_until_completed(&mut supervisor, &mut rx).await;

    assert!(supervisor.cancel());
    assert!(!supervisor.has_worker());
    assert_eq!(supervisor.last_outcome(), Some(&JobOutcome::Completed));
    assert!(!drain(&mut rx).contains(&UiEvent::Cancelled));
    supervisor.wait_released().await;
}

#[tokio::test]
async fn exit_while_paused_returns_to_idle_without_error() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) = supervisor_for(
        r#"
echo "[download]  10.0% of 4.00MiB at 1.00MiB/s ETA 00:03"
while read cmd; do
  case "$cmd" in
    pause) echo "⏸ Download paused"; exit 0 ;;
  esac
done
"#,
    );

    supervisor.start(request(&dir)).unwrap();
    assert!(supervisor.pause());
    run_until_released(&mut supervisor).await;

    assert_eq!(supervisor.status(), SessionStatus::Idle);
    assert_eq!(supervisor.last_outcome(), Some(&JobOutcome::Cancelled));
    assert!(supervisor.session().is_none());
    assert!(!drain(&mut rx)
        .iter()
        .any(|event| matches!(event, UiEvent::Error { .. } | UiEvent::Completed { .. })));
}

#[cfg(unix)]
#[tokio::test]
async fn signal_exit_while_running_is_an_error() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) = supervisor_for("kill -9 $$");

    supervisor.start(request(&dir)).unwrap();
    run_until_released(&mut supervisor).await;

    assert_eq!(supervisor.status(), SessionStatus::Error);
    assert_eq!(supervisor.snapshot().phase, Phase::Error);
    assert_eq!(
        drain(&mut rx).last(),
        Some(&UiEvent::Error {
            message: "Process terminated by signal 9".to_string()
        })
    );
}

#[tokio::test]
async fn stream_failure_enters_error() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) = supervisor_for("exec sleep 30");

    supervisor.start(request(&dir)).unwrap();
    drain(&mut rx);
    supervisor.handle_message(WorkerMessage {
        generation: 1,
        event: WorkerEvent::StreamFailed {
            stream: StreamKind::Stdout,
            error: "broken pipe".to_string(),
        },
    });

    assert_eq!(supervisor.status(), SessionStatus::Error);
    assert!(!supervisor.has_worker());
    assert_eq!(
        drain(&mut rx),
        [UiEvent::Error {
            message: "Failed to read worker stdout: broken pipe".to_string()
        }]
    );
    assert_eq!(supervisor.wait_released().await, 1);
}

#[tokio::test]
async fn nonzero_exit_is_an_error_until_reset() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) = supervisor_for("echo '[download]  10.0%'; exit 3");

    supervisor.start(request(&dir)).unwrap();
    run_until_released(&mut supervisor).await;

    assert_eq!(supervisor.status(), SessionStatus::Error);
    assert!(!supervisor.has_worker());
    assert_eq!(supervisor.snapshot().phase, Phase::Error);
    assert_eq!(
        drain(&mut rx).last(),
        Some(&UiEvent::Error {
            message: "Process exited with code 3".to_string()
        })
    );

    assert!(!supervisor.pause());
    assert!(supervisor.reset());
    assert_eq!(supervisor.status(), SessionStatus::Idle);
    assert_eq!(supervisor.snapshot().phase, Phase::Waiting);
}

#[tokio::test]
async fn start_after_error_resets_implicitly() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, _rx) = supervisor_for("exit 1");

    supervisor.start(request(&dir)).unwrap();
    run_until_released(&mut supervisor).await;
    assert_eq!(supervisor.status(), SessionStatus::Error);

    supervisor.start(request(&dir)).unwrap();
    assert_eq!(supervisor.status(), SessionStatus::Running);
    run_until_released(&mut supervisor).await;
}

#[tokio::test]
async fn error_output_is_fatal() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) =
        supervisor_for("echo 'ERROR: Unsupported URL' >&2; exec sleep 30");

    supervisor.start(request(&dir)).unwrap();
    run_until_released(&mut supervisor).await;

    assert_eq!(supervisor.status(), SessionStatus::Error);
    assert_eq!(
        drain(&mut rx).last(),
        Some(&UiEvent::Error {
            message: "ERROR: Unsupported URL".to_string()
        })
    );

    let forced = tokio::time::timeout(TIMEOUT, supervisor.wait_released())
        .await
        .unwrap();
    assert_eq!(forced, 1);
}

#[tokio::test]
async fn error_output_can_be_non_fatal() {
    let dir = TempDir::new().unwrap();
    let mut config = config_for("echo 'WARNING: slow network' >&2; echo '[download] 100%'");
    config.errors.stderr_is_fatal = false;
    let (notifier, _rx) = ChannelNotifier::channel();
    let mut supervisor = Supervisor::new(config, notifier);

    supervisor.start(request(&dir)).unwrap();
    run_until_released(&mut supervisor).await;

    assert_eq!(supervisor.status(), SessionStatus::Idle);
    assert_eq!(supervisor.last_outcome(), Some(&JobOutcome::Completed));
}

#[tokio::test]
async fn second_start_is_rejected_without_side_effects() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) = supervisor_for("exec sleep 30");

    supervisor.start(request(&dir)).unwrap();
    let pid = supervisor.worker_pid();
    let session = supervisor.session().map(|s| s.id);
    drain(&mut rx);

    let err = assert_err!(supervisor.start(request(&dir)));
    assert!(matches!(err, SupervisorError::AlreadyRunning));
    assert_eq!(supervisor.worker_pid(), pid);
    assert_eq!(supervisor.session().map(|s| s.id), session);
    assert_eq!(supervisor.status(), SessionStatus::Running);
    assert!(drain(&mut rx).is_empty());

    supervisor.cancel();
    supervisor.wait_released().await;
}

#[tokio::test]
async fn pause_and_resume_are_optimistic_then_confirmed() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) = supervisor_for(INTERACTIVE_WORKER);
    supervisor.start(request(&dir)).unwrap();

    assert!(supervisor.pause());
    assert_eq!(supervisor.status(), SessionStatus::Paused);
    assert!(!supervisor.pause());

    let events = step_until(&mut supervisor, &mut rx, &UiEvent::Paused).await;
    assert!(events.contains(&UiEvent::PausedImmediate));
    assert_eq!(supervisor.status(), SessionStatus::Paused);
    assert_eq!(supervisor.snapshot().phase, Phase::Paused);

    assert!(supervisor.resume());
    assert_eq!(supervisor.status(), SessionStatus::Running);

    let events = step_until(&mut supervisor, &mut rx, &UiEvent::Resumed).await;
    assert!(events.contains(&UiEvent::ResumedImmediate));
    assert_eq!(supervisor.status(), SessionStatus::Running);
    assert_eq!(supervisor.snapshot().phase, Phase::Downloading);

    supervisor.cancel();
    supervisor.wait_released().await;
}

#[tokio::test]
async fn pause_resume_round_trip_without_output() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) = supervisor_for("exec sleep 30");
    supervisor.start(request(&dir)).unwrap();
    drain(&mut rx);

    assert!(supervisor.pause());
    assert!(supervisor.resume());
    assert_eq!(supervisor.status(), SessionStatus::Running);
    assert_eq!(
        drain(&mut rx),
        [UiEvent::PausedImmediate, UiEvent::ResumedImmediate]
    );

    supervisor.cancel();
    supervisor.wait_released().await;
}

#[tokio::test]
async fn cooperative_cancel_is_not_forced() {
    let dir = TempDir::new().unwrap();
    let mut config = config_for(INTERACTIVE_WORKER);
    config.timing.cancel_grace_ms = 5000;
    let (notifier, mut rx) = ChannelNotifier::channel();
    let mut supervisor = Supervisor::new(config, notifier);

    supervisor.start(request(&dir)).unwrap();
    assert!(supervisor.cancel());
    assert_eq!(supervisor.status(), SessionStatus::Idle);
    assert!(!supervisor.has_worker());
    assert_eq!(drain(&mut rx).last(), Some(&UiEvent::Cancelled));

    let forced = tokio::time::timeout(TIMEOUT, supervisor.wait_released())
        .await
        .unwrap();
    assert_eq!(forced, 0);
}

#[cfg(unix)]
#[tokio::test]
async fn cancel_forces_termination_of_unresponsive_worker() {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) = supervisor_for("exec sleep 30");
    supervisor.start(request(&dir)).unwrap();
    let pid = supervisor.worker_pid().unwrap();

    let started = std::time::Instant::now();
    assert!(supervisor.cancel());
    assert_eq!(supervisor.status(), SessionStatus::Idle);
    assert!(!supervisor.has_worker());
    assert_eq!(supervisor.last_outcome(), Some(&JobOutcome::Cancelled));
    assert!(!supervisor.cancel(), "second cancel is a no-op");

    let forced = supervisor.wait_released().await;
    assert_eq!(forced, 1);
    assert!(started.elapsed() < Duration::from_millis(1500));

    let raw = i32::try_from(pid).unwrap();
    assert!(kill(Pid::from_raw(raw), None).is_err());

    let events = drain(&mut rx);
    assert_eq!(
        events
            .iter()
            .filter(|event| **event == UiEvent::Cancelled)
            .count(),
        1
    );
    assert!(!events
        .iter()
        .any(|event| matches!(event, UiEvent::Error { .. })));
}

#[tokio::test]
async fn spawn_failure_enters_error() {
    let dir = TempDir::new().unwrap();
    let mut config = ClipfetchConfig::default();
    config.worker.program = "/nonexistent/clipfetch-worker".to_string();
    let (notifier, mut rx) = ChannelNotifier::channel();
    let mut supervisor = Supervisor::new(config, notifier);

    let err = assert_err!(supervisor.start(request(&dir)));
    assert!(matches!(err, SupervisorError::Spawn(_)));
    assert_eq!(supervisor.status(), SessionStatus::Error);
    assert!(!supervisor.has_worker());
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [UiEvent::Error { message }] if message.contains("not found")
    ));
}

#[tokio::test]
async fn destination_is_created() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("videos").join("2024");
    let (mut supervisor, _rx) = supervisor_for("exit 0");

    supervisor
        .start(StartRequest::new("https://example.com/v", Quality::Low, &nested))
        .unwrap();
    assert!(nested.is_dir());
    run_until_released(&mut supervisor).await;
}

#[tokio::test]
async fn invalid_url_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) = supervisor_for("exit 0");

    let err = supervisor
        .start(StartRequest::new("ftp://example.com/v", Quality::Low, dir.path()))
        .unwrap_err();
    assert!(matches!(err, SupervisorError::InvalidRequest(_)));
    assert_eq!(supervisor.status(), SessionStatus::Idle);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn output_from_released_worker_is_ignored() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) = supervisor_for("exec sleep 30");

    supervisor.start(request(&dir)).unwrap();
    supervisor.cancel();
    drain(&mut rx);

    supervisor.handle_message(WorkerMessage {
        generation: 1,
        event: WorkerEvent::Line {
            stream: StreamKind::Stderr,
            line: "late failure".to_string(),
        },
    });
    assert_eq!(supervisor.status(), SessionStatus::Idle);

    supervisor.start(request(&dir)).unwrap();
    drain(&mut rx);
    supervisor.handle_message(WorkerMessage {
        generation: 1,
        event: WorkerEvent::Line {
            stream: StreamKind::Stdout,
            line: "[download]  99.0%".to_string(),
        },
    });
    assert_eq!(supervisor.status(), SessionStatus::Running);
    assert!(drain(&mut rx).is_empty());
    assert!(supervisor.snapshot().percent.abs() < f64::EPSILON);

    supervisor.cancel();
    supervisor.wait_released().await;
}

#[tokio::test]
async fn run_job_returns_cancelled_outcome() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, _rx) = supervisor_for("exec sleep 30");
    let (tx, mut commands) = mpsc::unbounded_channel();
    tx.send(UiCommand::Cancel).unwrap();

    let outcome = tokio::time::timeout(TIMEOUT, supervisor.run_job(request(&dir), &mut commands))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, JobOutcome::Cancelled);
    supervisor.wait_released().await;
}

#[tokio::test]
async fn run_job_reports_failure() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, _rx) = supervisor_for("exit 2");
    let (_tx, mut commands) = mpsc::unbounded_channel();

    let outcome = tokio::time::timeout(TIMEOUT, supervisor.run_job(request(&dir), &mut commands))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Failed {
            message: "Process exited with code 2".to_string()
        }
    );
}

#[tokio::test]
async fn run_loop_serves_commands_until_shutdown() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut events) = supervisor_for("echo '[download] 100%'");
    let (tx, commands) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        supervisor.run(commands).await;
        supervisor
    });

    tx.send(UiCommand::Start(request(&dir))).unwrap();
    tx.send(UiCommand::Start(request(&dir))).unwrap();

    let mut seen = Vec::new();
    tokio::time::timeout(TIMEOUT, async {
        while let Some(event) = events.recv().await {
            let done = matches!(event, UiEvent::Completed { .. });
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .unwrap();
    assert!(seen
        .iter()
        .any(|event| matches!(event, UiEvent::Rejected { reason } if reason == "Download already in progress")));

    tx.send(UiCommand::Shutdown).unwrap();
    let supervisor = tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
    assert!(!supervisor.has_worker());
}
