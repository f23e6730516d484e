//! Unix-specific capture and signaling for pros-relay.
//!
//! Provides the PTY-backed transport (master/slave pair read through an
//! event-driven `AsyncFd` loop) and process-group signaling helpers.

#[cfg(unix)]
mod pty;
#[cfg(unix)]
mod signal;

#[cfg(unix)]
pub use pty::PtyTransport;
#[cfg(unix)]
pub use signal::{signal_group, TerminateSignal};
