//! Pipe-backed capture transport.
//!
//! The fallback used when pseudo-terminal allocation is unsupported or
//! fails, and the only variant on platforms without native PTY support.
//! Standard output and error are read line-by-line on a dedicated task and
//! merged into the session's one line channel; standard input is discarded.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pros_relay_core::{
    LINE_CHANNEL_CAPACITY, LaunchSpec, RelayError, Transport, TransportMode, TransportSession,
};

pub struct PipeTransport;

#[async_trait]
impl Transport for PipeTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Pipe
    }

    async fn open(&self, launch: &LaunchSpec) -> Result<TransportSession, RelayError> {
        let mut cmd = Command::new(&launch.program);
        cmd.arg(&launch.subcommand)
            .current_dir(&launch.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so termination can signal the group as a unit.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| RelayError::SpawnFailed(e.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| RelayError::spawn_failed("child exited before a pid was observed"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RelayError::transport_error("child stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RelayError::transport_error("child stderr was not piped"))?;
        info!(pid, program = %launch.program.display(), "spawned child on pipes");

        let (tx, lines) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let reader = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                // Both streams feed the same channel: one merged line stream.
                tokio::join!(
                    read_stream(stdout, tx.clone(), cancel.clone()),
                    read_stream(stderr, tx, cancel),
                );
            }
        });

        Ok(TransportSession {
            mode: TransportMode::Pipe,
            pid,
            child,
            lines,
            cancel,
            reader,
        })
    }
}

/// Line-read loop over one child stream until end-of-stream.
///
/// `read_until` keeps the raw bytes so invalid UTF-8 can be decoded
/// lossily instead of erroring the stream.
async fn read_stream<R: AsyncRead + Unpin>(
    stream: R,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    let mut reader = BufReader::new(stream);
    let mut raw = Vec::new();

    loop {
        raw.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = reader.read_until(b'\n', &mut raw) => read,
        };

        match read {
            Ok(0) => return, // end-of-stream
            Ok(_) => {
                let line = pros_relay_core::decode_line(&raw);
                if !line.is_empty() && tx.send(line).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(error = %e, "pipe read failed");
                return;
            }
        }
    }
}
