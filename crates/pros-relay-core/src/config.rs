use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// The single fixed subcommand the child is always launched with.
pub const TERMINAL_SUBCOMMAND: &str = "terminal";

/// Timeout knobs for the lifecycle protocol.
///
/// The defaults implement the bounded-wait ladder: a start attempt gets
/// 3 s per transport, a graceful stop waits 2 s for the child to exit, a
/// forceful kill waits 0.5 s, and the SIGKILL escalation waits another 1 s
/// before the supervisor gives up and clears its bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TerminationConfig {
    /// Upper bound on one transport start attempt (in milliseconds)
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,

    /// Wait after a graceful terminate signal (in milliseconds)
    #[serde(default = "default_graceful_wait_ms")]
    pub graceful_wait_ms: u64,

    /// Wait after a forceful kill signal (in milliseconds)
    #[serde(default = "default_forceful_wait_ms")]
    pub forceful_wait_ms: u64,

    /// Additional wait after escalating to SIGKILL (in milliseconds)
    #[serde(default = "default_escalation_wait_ms")]
    pub escalation_wait_ms: u64,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: default_start_timeout_ms(),
            graceful_wait_ms: default_graceful_wait_ms(),
            forceful_wait_ms: default_forceful_wait_ms(),
            escalation_wait_ms: default_escalation_wait_ms(),
        }
    }
}

impl TerminationConfig {
    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.start_timeout_ms == 0 {
            return Err(anyhow::anyhow!("start_timeout_ms must be non-zero"));
        }

        if self.graceful_wait_ms == 0 || self.forceful_wait_ms == 0 {
            return Err(anyhow::anyhow!(
                "graceful_wait_ms and forceful_wait_ms must be non-zero"
            ));
        }

        if self.start_timeout_ms > 60_000 {
            return Err(anyhow::anyhow!(
                "start_timeout_ms should not exceed 60 seconds"
            ));
        }

        Ok(())
    }

    /// Get the start attempt bound as Duration
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    /// Get the graceful exit wait as Duration
    pub fn graceful_wait(&self) -> Duration {
        Duration::from_millis(self.graceful_wait_ms)
    }

    /// Get the forceful exit wait as Duration
    pub fn forceful_wait(&self) -> Duration {
        Duration::from_millis(self.forceful_wait_ms)
    }

    /// Get the post-escalation wait as Duration
    pub fn escalation_wait(&self) -> Duration {
        Duration::from_millis(self.escalation_wait_ms)
    }
}

/// Main relay configuration
///
/// Both paths are host-updatable between lifecycle calls; the supervisor
/// snapshots the current values at the top of each `start()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into, strip_option))]
pub struct RelayConfig {
    /// Path to the PROS CLI executable
    pub program: PathBuf,

    /// Directory the child is launched in (the PROS project directory)
    pub working_dir: PathBuf,

    #[serde(default)]
    #[builder(default)]
    pub termination: TerminationConfig,
}

impl RelayConfig {
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.program.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("program must not be empty"));
        }

        if self.working_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("working_dir must not be empty"));
        }

        self.termination.validate()
    }
}

// Default value functions for serde
fn default_start_timeout_ms() -> u64 {
    3_000
}
fn default_graceful_wait_ms() -> u64 {
    2_000
}
fn default_forceful_wait_ms() -> u64 {
    500
}
fn default_escalation_wait_ms() -> u64 {
    1_000
}
