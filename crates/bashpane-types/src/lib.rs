//! Wire-level types shared between the bashpane session driver and its
//! callers.
//!
//! A caller hands the driver a [`CommandRequest`] and gets back an
//! [`Observation`]. Both are plain serde types so they can cross any
//! transport (tool-call JSON, an event log, a socket) without the caller
//! knowing anything about terminals.

use serde::{Deserialize, Serialize};

/// Guidance appended to every timeout observation: the three ways a caller
/// can make progress on a command that is still running.
pub const TIMEOUT_GUIDANCE: &str = "You may wait longer to see additional output by sending empty command '', \
     send other commands to interact with the current process, \
     or send keys (\"C-c\", \"C-z\", \"C-d\") to interrupt/kill the previous command before sending your new command.";

fn default_exit_code() -> i32 {
    -1
}

/// A single command (or keystroke batch) for the session to run.
///
/// `is_input` means "type these keys into the already-running foreground
/// process" rather than "start a new command". `blocking` disables the
/// no-change timeout for commands that are expected to run silently for a
/// long time. `timeout` is the hard wall-clock limit in seconds; it applies
/// regardless of `blocking`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub is_input: bool,
    #[serde(default)]
    pub blocking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f32>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, seconds: f32) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Mark this request as keystrokes for the running foreground process.
    pub fn as_input(mut self) -> Self {
        self.is_input = true;
        self
    }
}

/// Metadata attached to a command observation.
///
/// `exit_code`, `working_dir` and `truncated` are decoded from the prompt
/// marker; `prefix` and `suffix` are annotations added by the driver (a
/// "previous output continues" banner, the exit-code trailer, timeout
/// guidance) and are never part of the wire format. An exit code of `-1`
/// means "unknown" - no fresh marker was available to decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmdOutputMetadata {
    #[serde(default = "default_exit_code")]
    pub exit_code: i32,
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
}

impl Default for CmdOutputMetadata {
    fn default() -> Self {
        Self {
            exit_code: -1,
            working_dir: String::new(),
            truncated: false,
            prefix: String::new(),
            suffix: String::new(),
        }
    }
}

/// How the last `execute` call on a session ended. Persists on the session
/// between calls so the next call knows whether a command is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Continue,
    Completed,
    NoChangeTimeout,
    HardTimeout,
}

/// What the driver hands back to the caller.
///
/// `CommandOutput` covers every non-fatal outcome, including timeouts and
/// the "previous command still running" refusal - those carry their state
/// in `metadata.suffix` rather than being errors. `Error` is reserved for
/// rejected input, e.g. a multi-statement command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "observation", rename_all = "snake_case")]
pub enum Observation {
    CommandOutput {
        content: String,
        command: String,
        metadata: CmdOutputMetadata,
    },
    Error {
        content: String,
    },
}

impl Observation {
    pub fn content(&self) -> &str {
        match self {
            Observation::CommandOutput { content, .. } => content,
            Observation::Error { content } => content,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Observation::Error { .. })
    }

    /// The full text a consumer (e.g. an agent event history) should see:
    /// driver prefix, command output, driver suffix.
    pub fn message(&self) -> String {
        match self {
            Observation::CommandOutput {
                content, metadata, ..
            } => format!("{}{}{}", metadata.prefix, content, metadata.suffix),
            Observation::Error { content } => content.clone(),
        }
    }
}
