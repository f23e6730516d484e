//! Supervises a single `pros terminal` child process and relays its
//! output lines, in real time, to any number of connected viewers.
//!
//! The host embeds a [`ProcessSupervisor`] and wires viewer connections in
//! as [`OutputSink`]s on its [`Broadcaster`]:
//!
//! ```text
//! start() ──► Transport (pty, falling back to pipe)
//!                 │ decoded lines
//!                 ▼
//!             LineFilter ──► Broadcaster ──► sinks (one per viewer)
//! ```
//!
//! Lifecycle calls (`start`/`stop`/`kill`/`status`) are serialized and
//! bounded in time, with at most one child alive at any moment. Delivery
//! to viewers never blocks the lifecycle path.

mod broadcast;
mod filter;
mod pipe;
mod supervisor;

pub use broadcast::Broadcaster;
pub use filter::{Filtered, LineFilter, strip_ansi};
pub use pipe::PipeTransport;
pub use supervisor::ProcessSupervisor;

#[cfg(unix)]
pub use pros_relay_unix::PtyTransport;

// Re-export core functionality
pub use pros_relay_core::*;
