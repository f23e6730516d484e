use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use tracing::{info, warn};

/// Which flavor of termination to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateSignal {
    /// Cooperative shutdown request (SIGTERM)
    Graceful,
    /// Immediate termination (SIGKILL)
    Forceful,
}

impl TerminateSignal {
    fn as_signal(self) -> Signal {
        match self {
            TerminateSignal::Graceful => Signal::SIGTERM,
            TerminateSignal::Forceful => Signal::SIGKILL,
        }
    }
}

/// Signal the child's whole process group, falling back to the single
/// process when group signaling is unavailable.
///
/// The child is spawned as the leader of its own group, so the group id
/// equals its pid. A process that is already gone (ESRCH) counts as
/// success: the goal is "not running", not "we delivered a signal".
pub fn signal_group(pid: u32, which: TerminateSignal) -> Result<(), std::io::Error> {
    let nix_pid = NixPid::from_raw(pid as i32);
    let sig = which.as_signal();

    match signal::killpg(nix_pid, sig) {
        Ok(()) => {
            info!(pid, signal = %sig, "signaled process group");
            return Ok(());
        }
        Err(Errno::ESRCH) => {
            info!(pid, "process group not found (already terminated)");
            return Ok(());
        }
        Err(e) => {
            warn!(pid, signal = %sig, error = %e, "group signal failed, falling back to process");
        }
    }

    match signal::kill(nix_pid, sig) {
        Ok(()) => {
            info!(pid, signal = %sig, "signaled process");
            Ok(())
        }
        Err(Errno::ESRCH) => {
            info!(pid, "process not found (already terminated)");
            Ok(())
        }
        Err(e) => Err(std::io::Error::from_raw_os_error(e as i32)),
    }
}
