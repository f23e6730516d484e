//! Line filtering: ANSI escape stripping plus rewrites of known PROS CLI
//! diagnostics into user-facing messages.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches common ANSI escape sequences:
/// - CSI: ESC [ ... command
/// - OSC: ESC ] ... BEL or ST (ESC \)
/// - 2-char escapes: ESC <char>
static ANSI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\x1B",
        r"(?:",
        r"\[[0-?]*[ -/]*[@-~]",        // CSI ... cmd
        r"|\][^\x07]*(?:\x07|\x1B\\)", // OSC ... BEL or ST
        r"|[@-Z\\-_]",                 // 2-char sequences
        r")",
    ))
    .expect("ANSI pattern compiles")
});

/// Remove all terminal escape sequences from a line.
pub fn strip_ansi(s: &str) -> String {
    ANSI_RE.replace_all(s, "").into_owned()
}

/// Result of filtering one raw line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filtered {
    /// Deliver this (possibly rewritten) line.
    Line(String),
    /// Drop the line entirely.
    Suppress,
}

/// Stateless transform from raw child output to viewer-facing lines.
pub struct LineFilter;

impl LineFilter {
    /// Apply escape stripping, diagnostic rewrites, and noise suppression.
    pub fn apply(raw: &str) -> Filtered {
        let line = strip_ansi(raw);

        if line.contains("resolve_v5_port - No v5 ports were found") {
            return Filtered::Line("No v5 devices were found.".to_string());
        }
        if line.contains("You must be in a PROS project directory") {
            return Filtered::Line(
                "The PROS Path selected is not inside of a PROS Project.".to_string(),
            );
        }
        if line.contains("Couldn't find the response header in the device response after") {
            return Filtered::Line("Connected device disconnected.".to_string());
        }
        if line.contains("Press Ctrl")
            || line.contains("Sentry is attempting to send")
            || line.contains("Waiting up to")
        {
            return Filtered::Suppress;
        }

        Filtered::Line(line)
    }
}
