//! The process supervisor: one child slot, serialized lifecycle, bounded
//! waits on every exit path.

use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pros_relay_core::{
    ControlReply, LaunchSpec, RelayConfig, RelayError, StatusReply, SupervisorState,
    TerminationConfig, Transport, TransportMode, TransportSession,
};

use crate::broadcast::Broadcaster;
use crate::filter::{Filtered, LineFilter};
use crate::pipe::PipeTransport;

/// Outer guard on a stop or kill. The termination protocol's own waits
/// stay well inside this; tripping it means the teardown wedged.
const LIFECYCLE_OP_BOUND: Duration = Duration::from_secs(10);

/// Bound on waiting for a cancelled reader/pump task to settle.
const TASK_SETTLE_TIMEOUT: Duration = Duration::from_millis(500);

/// One live session: the transport's resources plus the pump that drives
/// lines through the filter into the broadcaster.
struct ActiveSession {
    mode: TransportMode,
    pid: u32,
    child: Child,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    pump: JoinHandle<()>,
}

impl ActiveSession {
    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// The single child slot. Guarded by the operation lock; `state` is the
/// supervisor's view, `session` holds the resources backing it.
struct Slot {
    state: SupervisorState,
    session: Option<ActiveSession>,
}

/// Supervises a single `pros terminal` child process.
///
/// All lifecycle operations are serialized by one operation lock, so
/// concurrent callers observe linearized effects: a second `start()`
/// issued while one is in flight waits for the first, then observes the
/// now-running child and returns the idempotent result.
pub struct ProcessSupervisor {
    config: Arc<RwLock<RelayConfig>>,
    broadcaster: Broadcaster,
    slot: Mutex<Slot>,
}

impl ProcessSupervisor {
    pub fn new(config: RelayConfig) -> Self {
        Self::with_shared_config(Arc::new(RwLock::new(config)), Broadcaster::new())
    }

    /// Build around a host-shared config handle, so the host can update
    /// the project directory or executable between lifecycle calls.
    pub fn with_shared_config(config: Arc<RwLock<RelayConfig>>, broadcaster: Broadcaster) -> Self {
        Self {
            config,
            broadcaster,
            slot: Mutex::new(Slot {
                state: SupervisorState::Idle,
                session: None,
            }),
        }
    }

    /// Shared configuration handle; updates take effect on the next start.
    pub fn config(&self) -> Arc<RwLock<RelayConfig>> {
        Arc::clone(&self.config)
    }

    /// The broadcaster viewers subscribe to.
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Start the child, preferring the PTY transport and falling back to
    /// pipes, each attempt bounded. Idempotent while running.
    pub async fn start(&self) -> ControlReply {
        let mut slot = self.slot.lock().await;

        if slot.state == SupervisorState::Running {
            if let Some(session) = slot.session.as_mut() {
                if session.is_running() {
                    debug!(pid = session.pid, "start requested while already running");
                    return ControlReply::success("already running")
                        .with_pid(session.pid)
                        .with_mode(session.mode);
                }
            }
        }

        // A previous session ended without cleanup (child exited on its
        // own, or an earlier teardown was interrupted): clear the stale
        // transport state before spawning anew.
        if let Some(stale) = slot.session.take() {
            discard_stale(stale).await;
        }
        slot.state = SupervisorState::Idle;

        let config = self.config.read().await.clone();
        if let Err(e) = config.validate() {
            return ControlReply::failure(format!("start failed: {e}"));
        }
        let launch = LaunchSpec::from_config(&config);

        match try_transports(&launch, config.termination.start_timeout()).await {
            Ok(session) => {
                info!(pid = session.pid, mode = %session.mode, "child started");
                let reply = ControlReply::success("started")
                    .with_pid(session.pid)
                    .with_mode(session.mode);
                slot.session = Some(self.install(session));
                slot.state = SupervisorState::Running;
                reply
            }
            Err(e) => {
                warn!(error = %e, "start failed on every transport");
                slot.state = SupervisorState::Idle;
                ControlReply::failure(format!("start failed: {e}"))
            }
        }
    }

    /// Graceful termination; no-op success when nothing is running.
    pub async fn stop(&self) -> ControlReply {
        self.terminate_op(true).await
    }

    /// Forceful termination; no-op success when nothing is running.
    pub async fn kill(&self) -> ControlReply {
        self.terminate_op(false).await
    }

    /// Read-only snapshot of the lifecycle state.
    pub async fn status(&self) -> StatusReply {
        let mut slot = self.slot.lock().await;
        let state = slot.state;
        if let Some(session) = slot.session.as_mut() {
            if state == SupervisorState::Running && session.is_running() {
                return StatusReply {
                    running: true,
                    pid: Some(session.pid),
                };
            }
        }
        StatusReply {
            running: false,
            pid: None,
        }
    }

    /// Best-effort stop for host shutdown paths.
    pub async fn shutdown(&self) {
        let reply = self.stop().await;
        if !reply.ok {
            warn!(status = %reply.status, "shutdown-time stop failed");
        }
    }

    async fn terminate_op(&self, graceful: bool) -> ControlReply {
        let mut slot = self.slot.lock().await;

        let Some(mut session) = slot.session.take() else {
            slot.state = SupervisorState::Idle;
            return ControlReply::success("not running");
        };

        if !session.is_running() {
            // The child already exited; clean the leftover transport state
            // without signaling anything.
            discard_stale(session).await;
            slot.state = SupervisorState::Idle;
            let status = if graceful { "cleaned" } else { "not running" };
            return ControlReply::success(status);
        }

        slot.state = SupervisorState::Stopping;
        let termination = self.config.read().await.termination.clone();
        let pid = session.pid;

        let result = timeout(LIFECYCLE_OP_BOUND, terminate(session, &termination, graceful)).await;
        slot.state = SupervisorState::Idle;

        match result {
            Ok(()) => ControlReply::success(if graceful { "stopped" } else { "killed" }),
            Err(_) => {
                // The dropped teardown future takes the child handle with
                // it; kill-on-drop is the last line of defense.
                warn!(pid, "termination exceeded its bound");
                let verb = if graceful { "stop" } else { "kill" };
                ControlReply::failure(format!("{verb} failed: timed out"))
            }
        }
    }

    /// Wire a fresh transport session into the output pipeline.
    fn install(&self, session: TransportSession) -> ActiveSession {
        let TransportSession {
            mode,
            pid,
            child,
            mut lines,
            cancel,
            reader,
        } = session;

        let broadcaster = self.broadcaster.clone();
        let pump_cancel = cancel.clone();
        let pump = tokio::spawn(async move {
            loop {
                let line = tokio::select! {
                    _ = pump_cancel.cancelled() => return,
                    line = lines.recv() => match line {
                        Some(line) => line,
                        None => return, // transport finished
                    },
                };
                match LineFilter::apply(&line) {
                    Filtered::Line(text) => broadcaster.publish(&text).await,
                    Filtered::Suppress => {}
                }
            }
        });

        ActiveSession {
            mode,
            pid,
            child,
            cancel,
            reader,
            pump,
        }
    }
}

/// Attempt the preferred transport, then the fallback, each attempt
/// bounded by the configured start timeout.
async fn try_transports(
    launch: &LaunchSpec,
    start_timeout: Duration,
) -> Result<TransportSession, RelayError> {
    #[cfg(unix)]
    {
        use pros_relay_unix::PtyTransport;

        match timeout(start_timeout, PtyTransport.open(launch)).await {
            Ok(Ok(session)) => return Ok(session),
            Ok(Err(e)) if e.is_fallback_candidate() => {
                warn!(error = %e, "pty transport failed, falling back to pipes");
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!("pty transport start timed out, falling back to pipes");
            }
        }
    }

    match timeout(start_timeout, PipeTransport.open(launch)).await {
        Ok(result) => result,
        Err(_) => Err(RelayError::timeout("pipe transport start exceeded its bound")),
    }
}

/// The shared termination protocol: stop reading, release the transport,
/// signal the group, wait, escalate, swallow what remains.
async fn terminate(session: ActiveSession, termination: &TerminationConfig, graceful: bool) {
    // Stop the reader first so it cannot race descriptor closure; its exit
    // drops the transport descriptor and accumulation buffers.
    session.cancel.cancel();
    settle(session.reader).await;
    settle(session.pump).await;

    let pid = session.pid;
    let mut child = session.child;

    signal_child(&mut child, pid, graceful);

    let wait = if graceful {
        termination.graceful_wait()
    } else {
        termination.forceful_wait()
    };
    match timeout(wait, child.wait()).await {
        Ok(Ok(status)) => {
            info!(pid, %status, "child exited");
            return;
        }
        Ok(Err(e)) => warn!(pid, error = %e, "waiting for child failed"),
        Err(_) => debug!(pid, ?wait, "child still alive, escalating"),
    }

    // Escalate to an immediate kill; best-effort past this point. If the
    // child still does not confirm death we clear the bookkeeping anyway
    // and the next start's stale cleanup is the recovery path.
    signal_child(&mut child, pid, false);
    match timeout(termination.escalation_wait(), child.wait()).await {
        Ok(Ok(status)) => info!(pid, %status, "child exited after escalation"),
        _ => warn!(pid, "child did not confirm exit; clearing state anyway"),
    }
}

/// Tear down a session whose child is already gone: no signaling, just
/// reader cancellation, descriptor release, and reaping.
async fn discard_stale(mut stale: ActiveSession) {
    debug!(pid = stale.pid, "clearing stale session state");
    stale.cancel.cancel();
    settle(stale.reader).await;
    settle(stale.pump).await;
    // Reap the exit status so the dead child does not linger as a zombie.
    let _ = timeout(TASK_SETTLE_TIMEOUT, stale.child.wait()).await;
}

/// Terminate signal to the child's whole process group where supported,
/// with the single-process kill as the fallback.
fn signal_child(child: &mut Child, pid: u32, graceful: bool) {
    #[cfg(unix)]
    {
        use pros_relay_unix::{TerminateSignal, signal_group};

        let which = if graceful {
            TerminateSignal::Graceful
        } else {
            TerminateSignal::Forceful
        };
        if signal_group(pid, which).is_ok() {
            return;
        }
    }

    if let Err(e) = child.start_kill() {
        debug!(pid, error = %e, "kill fallback failed");
    }
}

/// Await a cancelled task, aborting it if it refuses to settle in time.
async fn settle(mut task: JoinHandle<()>) {
    if timeout(TASK_SETTLE_TIMEOUT, &mut task).await.is_err() {
        task.abort();
        let _ = task.await;
    }
}
