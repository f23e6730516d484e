use async_trait::async_trait;

/// Identity of a subscribed sink, assigned by the broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(pub u64);

impl std::fmt::Display for SinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

/// An opaque destination for broadcast lines, one per connected viewer.
///
/// Implemented by the host's connection layer (typically a WebSocket
/// writer). A failed `send_line` marks the sink dead; the broadcaster
/// prunes it and keeps delivering to the others.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Deliver one UTF-8 text line to the viewer.
    async fn send_line(&self, line: &str) -> anyhow::Result<()>;
}
