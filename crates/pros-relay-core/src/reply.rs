use serde::{Deserialize, Serialize};

/// Which capture strategy a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Pty,
    Pipe,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Pty => "pty",
            TransportMode::Pipe => "pipe",
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of the supervisor.
///
/// Transitions happen only while the operation lock is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupervisorState {
    #[default]
    Idle,
    Running,
    Stopping,
}

/// Structured result of a lifecycle operation (start/stop/kill), shaped for
/// direct serialization by the host's transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReply {
    pub ok: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<TransportMode>,
}

impl ControlReply {
    pub fn success(status: impl Into<String>) -> Self {
        Self {
            ok: true,
            status: status.into(),
            pid: None,
            mode: None,
        }
    }

    pub fn failure(status: impl Into<String>) -> Self {
        Self {
            ok: false,
            status: status.into(),
            pid: None,
            mode: None,
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_mode(mut self, mode: TransportMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Read-only status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub running: bool,
    pub pid: Option<u32>,
}
