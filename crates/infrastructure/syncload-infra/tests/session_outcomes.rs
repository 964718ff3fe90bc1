#![cfg(unix)]

use std::time::{Duration, Instant};

use syncload_core::{
    Endpoint, OutcomeStatus, PathTraversalError, ResourceRequest, SessionConfig, StagingDirectory,
};
use syncload_infra::{ProcessSession, SessionError, SessionRunner};
use tempfile::tempdir;

/// `sh -c <script> sh <address> <target>`: the script sees address as $1, target as $2.
fn sh_config(script: &str, timeout: Duration) -> SessionConfig {
    SessionConfig::new(Endpoint::parse("example.org").unwrap())
        .with_binary("/bin/sh")
        .with_flags(vec!["-c".into(), script.into(), "sh".into()])
        .with_timeout(timeout)
}

fn staging() -> (tempfile::TempDir, StagingDirectory) {
    let dir = tempdir().unwrap();
    let root = camino::Utf8PathBuf::from_path_buf(dir.path().join("staging")).unwrap();
    let staging = StagingDirectory::at(&root).unwrap();
    (dir, staging)
}

#[tokio::test]
async fn success_reports_output_size_and_timing() {
    let (_dir, staging) = staging();
    let config = sh_config("sleep 0.08; printf '%0120d' 0", Duration::from_secs(5));

    let outcome = ProcessSession::new()
        .run(&config, &staging, &ResourceRequest::new("ta/cert.cer"))
        .await
        .unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(outcome.output.len(), 120);
    assert!(outcome.elapsed >= Duration::from_millis(80), "{:?}", outcome.elapsed);
    assert!(staging.root().join("ta").is_dir());
}

#[tokio::test]
async fn binary_receives_address_then_target() {
    let (_dir, staging) = staging();
    let config = sh_config("printf '%s|%s' \"$1\" \"$2\"", Duration::from_secs(5));

    let outcome = ProcessSession::new()
        .run(&config, &staging, &ResourceRequest::new("ta/cert.cer"))
        .await
        .unwrap();

    let expected = format!(
        "rsync://example.org/ta/cert.cer|{}",
        staging.root().join("ta").join("cert.cer")
    );
    assert_eq!(outcome.output_lossy(), expected);
}

#[tokio::test]
async fn non_zero_exit_is_an_outcome_with_combined_output() {
    let (_dir, staging) = staging();
    let config = sh_config("echo '@ERROR: Unknown module' >&2; exit 5", Duration::from_secs(5));

    let outcome = ProcessSession::new()
        .run(&config, &staging, &ResourceRequest::new("nomodule"))
        .await
        .unwrap();

    assert_eq!(outcome.status, OutcomeStatus::NonZeroExit(5));
    assert!(outcome.output_lossy().contains("Unknown module"));
    assert_eq!(
        outcome.error_message().unwrap(),
        "process exited with 5: @ERROR: Unknown module"
    );
}

#[tokio::test]
async fn missing_binary_is_launch_failed() {
    let (_dir, staging) = staging();
    let config = SessionConfig::new(Endpoint::parse("example.org").unwrap())
        .with_binary("/nonexistent/bin/rsync");

    let outcome = ProcessSession::new()
        .run(&config, &staging, &ResourceRequest::new("repository"))
        .await
        .unwrap();

    assert_eq!(outcome.status, OutcomeStatus::LaunchFailed);
    assert!(!outcome.output.is_empty());
}

#[tokio::test]
async fn timeout_kills_process_within_bound() {
    let (_dir, staging) = staging();
    let config = sh_config(
        "echo $$ > \"$2.pid\"; printf started; exec sleep 30",
        Duration::from_millis(300),
    );

    let started = Instant::now();
    let outcome = ProcessSession::new()
        .run(&config, &staging, &ResourceRequest::new("ta/slow.cer"))
        .await
        .unwrap();
    let took = started.elapsed();

    assert_eq!(outcome.status, OutcomeStatus::TimedOut);
    assert_eq!(outcome.error_message().as_deref(), Some("timed out"));
    assert!(took < Duration::from_secs(2), "took {took:?}");
    assert_eq!(outcome.output_lossy(), "started");

    let pid_file = staging.root().join("ta").join("slow.cer.pid");
    let pid: i32 = std::fs::read_to_string(pid_file).unwrap().trim().parse().unwrap();
    let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None);
    assert_eq!(alive, Err(nix::errno::Errno::ESRCH), "process {pid} survived the timeout");
}

#[tokio::test]
async fn traversal_is_a_hard_error_and_nothing_runs() {
    let (_dir, staging) = staging();
    let config = sh_config("touch \"$2.ran\"", Duration::from_secs(5));

    let err = ProcessSession::new()
        .run(&config, &staging, &ResourceRequest::new("../../etc/passwd"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::Traversal(PathTraversalError::ParentComponent(_))
    ));
    assert_eq!(std::fs::read_dir(staging.root()).unwrap().count(), 0);
}

/// Killed and reaped, or killed and left as a zombie under a non-reaping init.
fn is_gone(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if kill(Pid::from_raw(pid), None) == Err(Errno::ESRCH) {
        return true;
    }
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
        })
        .unwrap_or(false)
}

#[tokio::test]
async fn timeout_kills_background_children_too() {
    let (_dir, staging) = staging();
    let config = sh_config("sleep 30 & echo $! > \"$2.pid\"; wait", Duration::from_millis(200));

    let started = Instant::now();
    let outcome = ProcessSession::new()
        .run(&config, &staging, &ResourceRequest::new("repository"))
        .await
        .unwrap();

    assert_eq!(outcome.status, OutcomeStatus::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());

    let pid_file = staging.root().join("repository.pid");
    let pid: i32 = std::fs::read_to_string(pid_file).unwrap().trim().parse().unwrap();
    let deadline = Instant::now() + Duration::from_secs(1);
    while !is_gone(pid) {
        assert!(Instant::now() < deadline, "background sleep {pid} survived the timeout");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[tokio::test]
async fn drain_grace_bounds_wait_on_inherited_pipes() {
    let (_dir, staging) = staging();
    // The shell exits at once; the subshell keeps stdout open a little longer.
    let config = sh_config("(sleep 0.3; printf late) & printf early", Duration::from_secs(5));
    let request = ResourceRequest::new("repository");

    let started = Instant::now();
    let short = ProcessSession::new()
        .with_drain_grace(Duration::from_millis(20))
        .run(&config, &staging, &request)
        .await
        .unwrap();
    assert_eq!(short.status, OutcomeStatus::Success);
    assert_eq!(short.output_lossy(), "early");
    assert!(started.elapsed() < Duration::from_millis(300), "{:?}", started.elapsed());

    let long = ProcessSession::new()
        .with_drain_grace(Duration::from_secs(3))
        .run(&config, &staging, &request)
        .await
        .unwrap();
    assert_eq!(long.status, OutcomeStatus::Success);
    assert_eq!(long.output_lossy(), "earlylate");
}

#[tokio::test]
async fn unpreparable_target_is_launch_failed_and_nothing_runs() {
    let (_dir, staging) = staging();
    // A plain file where the parent directory should go.
    std::fs::write(staging.root().join("ta"), b"not a dir").unwrap();
    let config = sh_config("touch \"$2.ran\"", Duration::from_secs(5));

    let outcome = ProcessSession::new()
        .run(&config, &staging, &ResourceRequest::new("ta/cert.cer"))
        .await
        .unwrap();

    assert_eq!(outcome.status, OutcomeStatus::LaunchFailed);
    assert!(outcome.error_message().unwrap().starts_with("launch failed"));
    assert!(outcome.elapsed < Duration::from_secs(1));
    assert_eq!(std::fs::read_dir(staging.root()).unwrap().count(), 1);
}
