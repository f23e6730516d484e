//! PTY-backed capture transport.
//!
//! Allocates a master/slave pseudo-terminal pair, launches the child with
//! stdin/stdout/stderr all attached to the slave side in a fresh session,
//! and reads the master through an event-driven `AsyncFd` loop. The parent
//! keeps no copy of the slave once the child is spawned.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::process::Stdio;

use async_trait::async_trait;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::libc;
use nix::pty::openpty;
use tokio::io::unix::AsyncFd;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pros_relay_core::{
    LINE_CHANNEL_CAPACITY, LaunchSpec, RelayError, Transport, TransportMode, TransportSession,
    decode_line,
};

/// Bytes read from the master per readiness wakeup.
const READ_CHUNK: usize = 4096;

/// Capture strategy backed by a pseudo-terminal.
///
/// Preferred over pipes because the PROS CLI flushes line-by-line when it
/// believes it is attached to an interactive terminal.
pub struct PtyTransport;

#[async_trait]
impl Transport for PtyTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Pty
    }

    async fn open(&self, launch: &LaunchSpec) -> Result<TransportSession, RelayError> {
        let pty = openpty(None, None).map_err(|e| RelayError::PtyAllocation(e.to_string()))?;
        let master = pty.master;
        let slave = pty.slave;

        let mut cmd = Command::new(&launch.program);
        cmd.arg(&launch.subcommand)
            .current_dir(&launch.working_dir)
            .stdin(clone_stdio(&slave)?)
            .stdout(clone_stdio(&slave)?)
            .stderr(Stdio::from(slave))
            .kill_on_drop(true);
        // New session: the child leads its own process group so the whole
        // group can be signaled as a unit later.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_| ())
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
            });
        }

        let child = cmd
            .spawn()
            .map_err(|e| RelayError::SpawnFailed(e.to_string()))?;
        // Command consumed the last slave handle above, so spawn leaves the
        // parent holding only the master.
        let pid = child
            .id()
            .ok_or_else(|| RelayError::spawn_failed("child exited before a pid was observed"))?;
        info!(pid, program = %launch.program.display(), "spawned child on pty");

        set_nonblocking(master.as_fd())?;
        let async_fd = AsyncFd::new(master)?;

        let (tx, lines) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let reader = tokio::spawn(read_master(async_fd, tx, cancel.clone()));

        Ok(TransportSession {
            mode: TransportMode::Pty,
            pid,
            child,
            lines,
            cancel,
            reader,
        })
    }
}

/// Event-driven read loop over the PTY master.
///
/// Accumulates raw bytes, splits off complete lines, decodes them and
/// forwards non-empty ones. A zero-byte read (or EIO, which Linux reports
/// once the slave side is gone) ends the session; dropping the `AsyncFd`
/// closes the master and discards any partial-line bytes.
async fn read_master(
    async_fd: AsyncFd<OwnedFd>,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    let mut acc: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let mut guard = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("pty reader cancelled");
                return;
            }
            readable = async_fd.readable() => match readable {
                Ok(guard) => guard,
                Err(e) => {
                    warn!(error = %e, "pty master poll failed");
                    return;
                }
            },
        };

        match guard.try_io(|inner| read_fd(inner.get_ref().as_fd(), &mut chunk)) {
            Ok(Ok(0)) => {
                debug!("pty master reached EOF");
                return;
            }
            Ok(Ok(n)) => {
                acc.extend_from_slice(&chunk[..n]);
                while let Some(pos) = acc.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = acc.drain(..=pos).collect();
                    let line = decode_line(&raw);
                    if !line.is_empty() && tx.send(line).await.is_err() {
                        // Receiver dropped; the session is being torn down.
                        return;
                    }
                }
            }
            Ok(Err(e)) => {
                if e.raw_os_error() != Some(libc::EIO) {
                    warn!(error = %e, "pty master read failed");
                }
                return;
            }
            Err(_would_block) => continue,
        }
    }
}

fn read_fd(fd: BorrowedFd<'_>, buf: &mut [u8]) -> std::io::Result<usize> {
    // The fd is non-blocking, so this never parks the task.
    let n = unsafe {
        libc::read(
            fd.as_raw_fd(),
            buf.as_mut_ptr().cast::<libc::c_void>(),
            buf.len(),
        )
    };
    if n < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn clone_stdio(fd: &OwnedFd) -> Result<Stdio, RelayError> {
    let dup = fd.try_clone()?;
    Ok(Stdio::from(dup))
}

/// Required for registering the master with `AsyncFd`.
fn set_nonblocking(fd: BorrowedFd<'_>) -> Result<(), RelayError> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    let new_flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(new_flags))
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    Ok(())
}
