//! Terminal surface abstraction.
//!
//! The session driver's sole OS-facing dependency. The default
//! implementation shells out to tmux, but anything that can type keys and
//! capture a scrollback - a local PTY, a container exec stream, a remote
//! shell - can stand in without the driver changing.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

/// Everything the surface needs to bring up its shell.
///
/// The scrollback limit is part of creation, not a later call: on tmux a
/// pane's history limit binds when the pane is created, which is also why
/// the tmux implementation rotates to a fresh window after raising it.
#[derive(Debug, Clone)]
pub struct SurfaceSpec {
    pub work_dir: PathBuf,
    pub shell_command: String,
    pub width: u16,
    pub height: u16,
    pub history_limit: usize,
}

/// One terminal surface owned by one session. Not a multiplexer: each
/// session gets its own surface and they share no state.
#[async_trait]
pub trait TerminalSurface: Send + Sync {
    /// Bring up the surface with its shell running in `spec.work_dir`.
    async fn create(&mut self, spec: &SurfaceSpec) -> Result<()>;

    /// Type keys into the surface. `enter` appends a carriage return;
    /// interrupt sequences like "C-c" are sent without one. Key-name
    /// interpretation (C-x, Enter) is the surface's business.
    async fn send_keys(&mut self, keys: &str, enter: bool) -> Result<()>;

    /// Full scrollback plus visible content as ordered lines, with wrapped
    /// lines joined back together.
    async fn capture_pane(&self) -> Result<Vec<String>>;

    /// Drop accumulated scrollback, keeping the visible screen.
    async fn clear_history(&mut self) -> Result<()>;

    /// Tear the surface down. Idempotent.
    async fn kill(&mut self) -> Result<()>;

    /// Identifier for logging.
    fn name(&self) -> &str;
}
