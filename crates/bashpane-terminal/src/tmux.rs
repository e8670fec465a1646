//! tmux-backed terminal surface.

use std::process::Command;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::surface::{SurfaceSpec, TerminalSurface};

/// Terminal surface running inside a dedicated tmux session.
pub struct TmuxSurface {
    /// tmux session name, format: bashpane-{user}-{uuid}
    session_name: String,
    /// Target pane, set once the session window is up.
    pane: Option<String>,
    killed: bool,
}

impl TmuxSurface {
    /// Create a handle. Verifies tmux is runnable; the actual session is
    /// brought up by [`TerminalSurface::create`].
    pub fn new(username: Option<&str>) -> Result<Self> {
        let output = Command::new("tmux").arg("-V").output()?;
        if !output.status.success() {
            bail!("tmux command failed - ensure tmux is installed and working");
        }
        Ok(Self {
            session_name: format!(
                "bashpane-{}-{}",
                username.unwrap_or("default"),
                Uuid::new_v4()
            ),
            pane: None,
            killed: false,
        })
    }

    /// Run a tmux command and return stdout.
    fn run_tmux(args: &[&str]) -> Result<String> {
        let output = Command::new("tmux").args(args).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux command failed: {}", stderr);
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn pane_target(&self) -> Result<&str> {
        self.pane
            .as_deref()
            .ok_or_else(|| anyhow!("tmux surface not created yet"))
    }
}

#[async_trait]
impl TerminalSurface for TmuxSurface {
    async fn create(&mut self, spec: &SurfaceSpec) -> Result<()> {
        let work_dir = spec.work_dir.to_string_lossy();
        Self::run_tmux(&[
            "new-session",
            "-d",
            "-s",
            &self.session_name,
            "-x",
            &spec.width.to_string(),
            "-y",
            &spec.height.to_string(),
            "-c",
            &work_dir,
        ])?;

        // Raise the history limit globally, then move to a fresh window:
        // the initial window's pane was created under the default limit and
        // keeps it forever.
        Self::run_tmux(&[
            "set-option",
            "-t",
            &self.session_name,
            "-g",
            "history-limit",
            &spec.history_limit.to_string(),
        ])?;
        let initial_window =
            Self::run_tmux(&["display-message", "-t", &self.session_name, "-p", "#{window_id}"])?
                .trim()
                .to_string();
        Self::run_tmux(&[
            "new-window",
            "-t",
            &self.session_name,
            "-c",
            &work_dir,
            &spec.shell_command,
        ])?;
        Self::run_tmux(&["kill-window", "-t", &initial_window])?;

        let pane =
            Self::run_tmux(&["display-message", "-t", &self.session_name, "-p", "#{pane_id}"])?
                .trim()
                .to_string();
        debug!(session = %self.session_name, %pane, "tmux surface created");
        self.pane = Some(pane);
        Ok(())
    }

    async fn send_keys(&mut self, keys: &str, enter: bool) -> Result<()> {
        let pane = self.pane_target()?;
        Self::run_tmux(&["send-keys", "-t", pane, "--", keys])?;
        if enter {
            Self::run_tmux(&["send-keys", "-t", pane, "Enter"])?;
        }
        Ok(())
    }

    async fn capture_pane(&self) -> Result<Vec<String>> {
        let pane = self.pane_target()?;
        // -J joins wrapped lines, -S - starts at the top of the scrollback
        let output = Self::run_tmux(&["capture-pane", "-t", pane, "-J", "-p", "-S", "-"])?;
        Ok(output.lines().map(|line| line.to_string()).collect())
    }

    async fn clear_history(&mut self) -> Result<()> {
        let pane = self.pane_target()?;
        Self::run_tmux(&["clear-history", "-t", pane])?;
        Ok(())
    }

    async fn kill(&mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }
        Self::run_tmux(&["kill-session", "-t", &self.session_name])?;
        self.killed = true;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.session_name
    }
}

impl Drop for TmuxSurface {
    fn drop(&mut self) {
        if !self.killed && self.pane.is_some() {
            let _ = Command::new("tmux")
                .args(["kill-session", "-t", &self.session_name])
                .output();
        }
    }
}
