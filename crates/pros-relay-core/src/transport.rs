use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{RelayConfig, RelayError, TERMINAL_SUBCOMMAND, TransportMode};

/// Capacity of the per-session decoded-line channel.
pub const LINE_CHANNEL_CAPACITY: usize = 256;

/// Everything a transport needs to launch one session of the child.
///
/// Snapshotted from the shared [`RelayConfig`] at the top of each start, so
/// a concurrent config update cannot change a launch mid-flight.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub subcommand: String,
    pub working_dir: PathBuf,
}

impl LaunchSpec {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            program: config.program.clone(),
            subcommand: TERMINAL_SUBCOMMAND.to_string(),
            working_dir: config.working_dir.clone(),
        }
    }
}

/// A live capture session: the spawned child plus the reader task that
/// turns its raw output into decoded lines.
///
/// The session owns every OS resource its transport created. Cancelling
/// `cancel` and awaiting `reader` releases the transport's descriptors;
/// the child handle stays valid for signaling and reaping afterwards.
pub struct TransportSession {
    pub mode: TransportMode,
    pub pid: u32,
    pub child: Child,
    pub lines: mpsc::Receiver<String>,
    pub cancel: CancellationToken,
    pub reader: JoinHandle<()>,
}

/// A capture strategy: spawns the child and yields its output as a lazy,
/// per-session sequence of decoded text lines.
///
/// Two implementations exist: the PTY adapter (event-driven master reads)
/// and the pipe adapter (blocking line reads on a dedicated task). The
/// supervisor is agnostic to which one it holds.
#[async_trait]
pub trait Transport: Send + Sync {
    fn mode(&self) -> TransportMode;

    /// Spawn the child and start reading its output.
    async fn open(&self, launch: &LaunchSpec) -> Result<TransportSession, RelayError>;
}

/// Decode one raw output line: lossy UTF-8 (invalid sequences become the
/// replacement character, never an error), trailing newline/carriage
/// return and surrounding whitespace trimmed.
pub fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\n', '\r'])
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_trims_line_endings() {
        assert_eq!(decode_line(b"hello\r\n"), "hello");
        assert_eq!(decode_line(b"  spaced  \r"), "spaced");
        assert_eq!(decode_line(b"\r\n"), "");
    }

    #[test]
    fn test_decode_replaces_invalid_utf8() {
        let decoded = decode_line(b"ok \xff\xfe bytes\n");
        assert!(decoded.starts_with("ok "));
        assert!(decoded.contains('\u{FFFD}'));
        assert!(decoded.ends_with("bytes"));
    }

    #[test]
    fn test_launch_spec_carries_fixed_subcommand() {
        let config = RelayConfig::builder()
            .program("/usr/bin/pros")
            .working_dir("/tmp/project")
            .build()
            .unwrap();
        let launch = LaunchSpec::from_config(&config);
        assert_eq!(launch.subcommand, "terminal");
        assert_eq!(launch.program, config.program);
    }
}
