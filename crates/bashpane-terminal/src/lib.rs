// Stateful bash session driver.
//
// This crate runs shell commands against a long-lived terminal surface
// (tmux by default) and infers command completion, exit status and working
// directory by scanning the scrollback for a marker the driver installs as
// the shell prompt. The terminal gives no native "command finished" signal,
// so the marker is the only completion channel.

mod escaper;
mod prompt;
mod scanner;
mod session;
mod splitter;
pub mod surface;
mod tmux;

// Re-export public API
pub use escaper::escape_special_chars;
pub use prompt::{Marker, PromptCodec, PROMPT_BEGIN, PROMPT_END};
pub use scanner::ParseError;
pub use session::BashSession;
pub use splitter::split_commands;
pub use surface::{SurfaceSpec, TerminalSurface};
pub use tmux::TmuxSurface;

// Constants
/// How long the poll loop sleeps between pane captures.
pub const POLL_INTERVAL_MS: u64 = 500;
/// Scrollback limit installed on the session pane.
pub const HISTORY_LIMIT: usize = 10_000;
/// Default seconds of output silence before a non-blocking command is
/// handed back to the caller.
pub const DEFAULT_NO_CHANGE_TIMEOUT_SECS: u64 = 30;
/// Pane dimensions. Wide enough that marker lines never wrap.
pub const PANE_WIDTH: u16 = 1000;
pub const PANE_HEIGHT: u16 = 1000;
