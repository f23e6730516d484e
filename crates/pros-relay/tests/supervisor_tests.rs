#![cfg(unix)]

use std::fs::File;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use pros_relay::{OutputSink, ProcessSupervisor, RelayConfig};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_file(true)
        .with_thread_ids(false)
        .with_target(false)
        .with_line_number(true)
        .try_init();
}

/// Write an executable shell script standing in for the CLI executable.
/// The script receives the `terminal` subcommand as its first argument.
fn fixture_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-cli");
    {
        // Writer must be closed before exec or the spawn hits ETXTBSY.
        let mut file = File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{body}").unwrap();
    }
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn config_for(program: PathBuf, dir: &Path) -> RelayConfig {
    RelayConfig::builder()
        .program(program)
        .working_dir(dir.to_path_buf())
        .build()
        .unwrap()
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl OutputSink for ChannelSink {
    async fn send_line(&self, line: &str) -> anyhow::Result<()> {
        self.tx.send(line.to_string())?;
        Ok(())
    }
}

#[tokio::test]
async fn test_start_stop_lifecycle() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let script = fixture_script(dir.path(), "sleep 30");
    let supervisor = ProcessSupervisor::new(config_for(script, dir.path()));

    let reply = supervisor.start().await;
    assert!(reply.ok, "start failed: {}", reply.status);
    assert_eq!(reply.status, "started");
    assert!(reply.pid.is_some());
    assert!(reply.mode.is_some());

    let status = supervisor.status().await;
    assert!(status.running);
    assert_eq!(status.pid, reply.pid);

    let reply = supervisor.stop().await;
    assert!(reply.ok, "stop failed: {}", reply.status);
    assert_eq!(reply.status, "stopped");

    let status = supervisor.status().await;
    assert!(!status.running);
    assert_eq!(status.pid, None);
}

#[cfg(target_os = "linux")]
fn open_fd_count() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_repeated_cycles_do_not_leak_descriptors() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let script = fixture_script(dir.path(), "sleep 30");
    let supervisor = ProcessSupervisor::new(config_for(script, dir.path()));

    // Warm-up cycle, so descriptors the runtime opens lazily on first use
    // are already part of the baseline.
    assert_eq!(supervisor.start().await.status, "started");
    assert_eq!(supervisor.stop().await.status, "stopped");
    let baseline = open_fd_count();

    for _ in 0..5 {
        assert_eq!(supervisor.start().await.status, "started");
        assert!(supervisor.status().await.running);
        assert_eq!(supervisor.stop().await.status, "stopped");
    }

    let after = open_fd_count();
    assert!(
        after <= baseline,
        "descriptors leaked across cycles: {baseline} before, {after} after"
    );
}

#[tokio::test]
async fn test_start_is_idempotent_while_running() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let script = fixture_script(dir.path(), "sleep 30");
    let supervisor = ProcessSupervisor::new(config_for(script, dir.path()));

    let first = supervisor.start().await;
    assert_eq!(first.status, "started");

    let second = supervisor.start().await;
    assert!(second.ok);
    assert_eq!(second.status, "already running");
    assert_eq!(second.pid, first.pid);

    supervisor.kill().await;
}

#[tokio::test]
async fn test_stop_and_kill_when_idle() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let script = fixture_script(dir.path(), "sleep 30");
    let supervisor = ProcessSupervisor::new(config_for(script, dir.path()));

    let reply = supervisor.stop().await;
    assert!(reply.ok);
    assert_eq!(reply.status, "not running");

    let reply = supervisor.kill().await;
    assert!(reply.ok);
    assert_eq!(reply.status, "not running");
}

#[tokio::test]
async fn test_kill_reports_killed() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let script = fixture_script(dir.path(), "sleep 30");
    let supervisor = ProcessSupervisor::new(config_for(script, dir.path()));

    assert_eq!(supervisor.start().await.status, "started");

    let reply = supervisor.kill().await;
    assert!(reply.ok, "kill failed: {}", reply.status);
    assert_eq!(reply.status, "killed");
    assert!(!supervisor.status().await.running);
}

#[tokio::test]
async fn test_stop_after_natural_exit_reports_cleaned() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let script = fixture_script(dir.path(), "exit 0");
    let supervisor = ProcessSupervisor::new(config_for(script, dir.path()));

    assert_eq!(supervisor.start().await.status, "started");

    // Give the child time to exit on its own.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!supervisor.status().await.running);

    let reply = supervisor.stop().await;
    assert!(reply.ok);
    assert_eq!(reply.status, "cleaned");
}

#[tokio::test]
async fn test_restart_after_natural_exit() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let script = fixture_script(dir.path(), "exit 0");
    let supervisor = ProcessSupervisor::new(config_for(script, dir.path()));

    assert_eq!(supervisor.start().await.status, "started");
    tokio::time::sleep(Duration::from_millis(300)).await;

    // The stale slot is cleaned up inline and a fresh child spawned.
    let reply = supervisor.start().await;
    assert!(reply.ok, "restart failed: {}", reply.status);
    assert_eq!(reply.status, "started");

    supervisor.kill().await;
}

#[tokio::test]
async fn test_start_failure_reports_error() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let supervisor = ProcessSupervisor::new(config_for(
        dir.path().join("no-such-binary"),
        dir.path(),
    ));

    let reply = supervisor.start().await;
    assert!(!reply.ok);
    assert!(reply.status.starts_with("start failed"), "{}", reply.status);
    assert_eq!(reply.pid, None);
    assert!(!supervisor.status().await.running);
}

#[tokio::test]
async fn test_output_reaches_subscribers_filtered() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    // Colored output, a suppressed progress line, a rewritten diagnostic,
    // then a plain line. The relay should deliver three lines.
    let script = fixture_script(
        dir.path(),
        concat!(
            "printf '\\033[1;32mBuild done\\033[0m\\n'\n",
            "echo 'Press Ctrl+C to exit'\n",
            "echo 'resolve_v5_port - No v5 ports were found'\n",
            "echo 'plain line'\n",
            "sleep 30",
        ),
    );
    let supervisor = ProcessSupervisor::new(config_for(script, dir.path()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    supervisor
        .broadcaster()
        .subscribe(std::sync::Arc::new(ChannelSink { tx }));

    assert_eq!(supervisor.start().await.status, "started");

    let mut lines = Vec::new();
    for _ in 0..3 {
        let line = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for output")
            .expect("channel closed early");
        lines.push(line);
    }

    assert_eq!(lines[0], "Build done");
    assert_eq!(lines[1], "No v5 devices were found.");
    assert_eq!(lines[2], "plain line");

    supervisor.kill().await;
}

#[tokio::test]
async fn test_output_stops_after_kill() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let script = fixture_script(
        dir.path(),
        "while true; do echo tick; sleep 0.1; done",
    );
    let supervisor = ProcessSupervisor::new(config_for(script, dir.path()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    supervisor
        .broadcaster()
        .subscribe(std::sync::Arc::new(ChannelSink { tx }));

    assert_eq!(supervisor.start().await.status, "started");
    let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert_eq!(first.as_deref(), Some("tick"));

    assert_eq!(supervisor.kill().await.status, "killed");

    // Drain anything already in flight, then expect silence.
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(line) = rx.try_recv() {
        assert_eq!(line, "tick");
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(rx.try_recv().is_err(), "output kept flowing after kill");
}

#[tokio::test]
async fn test_concurrent_starts_yield_one_child() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let script = fixture_script(dir.path(), "sleep 30");
    let supervisor =
        std::sync::Arc::new(ProcessSupervisor::new(config_for(script, dir.path())));

    let a = tokio::spawn({
        let s = supervisor.clone();
        async move { s.start().await }
    });
    let b = tokio::spawn({
        let s = supervisor.clone();
        async move { s.start().await }
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    // One caller spawns, the other observes the running child; either way
    // both succeed and agree on the pid.
    assert!(a.ok, "{}", a.status);
    assert!(b.ok, "{}", b.status);
    assert_eq!(a.pid, b.pid);
    assert!(
        [&a.status, &b.status].contains(&&"started".to_string()),
        "neither caller reported the spawn"
    );

    supervisor.kill().await;
}

#[tokio::test]
async fn test_shared_config_updates_apply_on_next_start() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let script = fixture_script(dir.path(), "sleep 30");
    let supervisor = ProcessSupervisor::new(config_for(
        dir.path().join("no-such-binary"),
        dir.path(),
    ));

    assert!(!supervisor.start().await.ok);

    supervisor.config().write().await.program = script;

    let reply = supervisor.start().await;
    assert!(reply.ok, "start failed: {}", reply.status);
    supervisor.kill().await;
}
