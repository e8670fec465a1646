//! The execute/poll/timeout state machine over one terminal surface.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bashpane_types::{
    CmdOutputMetadata, CommandRequest, Observation, SessionStatus, TIMEOUT_GUIDANCE,
};

use crate::escaper::escape_special_chars;
use crate::prompt::{Marker, PromptCodec, PROMPT_END};
use crate::splitter::split_commands;
use crate::surface::{SurfaceSpec, TerminalSurface};
use crate::{
    DEFAULT_NO_CHANGE_TIMEOUT_SECS, HISTORY_LIMIT, PANE_HEIGHT, PANE_WIDTH, POLL_INTERVAL_MS,
};

const CONTINUE_PREFIX: &str = "[Below is the output of the previous command.]\n";

/// A long-lived, stateful bash session.
///
/// One owner at a time: `execute` takes `&mut self` and callers must
/// serialize their calls. The session keeps the working directory and the
/// previous command's status/output between calls so a command can keep
/// running across them.
pub struct BashSession {
    surface: Box<dyn TerminalSurface>,
    codec: PromptCodec,
    cancel: CancellationToken,
    work_dir: PathBuf,
    username: Option<String>,
    no_change_timeout: Duration,
    poll_interval: Duration,
    initialized: bool,
    closed: bool,
    cwd: PathBuf,
    prev_status: Option<SessionStatus>,
    prev_output: String,
}

impl BashSession {
    pub fn new(
        surface: Box<dyn TerminalSurface>,
        work_dir: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        let work_dir = work_dir.into();
        Self {
            surface,
            codec: PromptCodec::new(),
            cancel,
            cwd: work_dir.clone(),
            work_dir,
            username: None,
            no_change_timeout: Duration::from_secs(DEFAULT_NO_CHANGE_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            initialized: false,
            closed: false,
            prev_status: None,
            prev_output: String::new(),
        }
    }

    /// Run the shell as this user (`su <user> -`).
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_no_change_timeout(mut self, timeout: Duration) -> Self {
        self.no_change_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Last working directory reported by a prompt marker.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Bring up the surface and install the marker prompt. Must be called
    /// before `execute`. Idempotent.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let shell_command = match &self.username {
            Some(user) => format!("su {} -", user),
            None => "/bin/bash".to_string(),
        };
        debug!(shell = %shell_command, work_dir = %self.work_dir.display(), "initializing bash session");
        self.surface
            .create(&SurfaceSpec {
                work_dir: self.work_dir.clone(),
                shell_command,
                width: PANE_WIDTH,
                height: PANE_HEIGHT,
                history_limit: HISTORY_LIMIT,
            })
            .await?;

        // PROMPT_COMMAND re-exports PS1 before every prompt, so $? and
        // $(pwd) in the template are expanded fresh each time. PS2 is
        // silenced so continuation lines add no noise.
        let install = format!(
            "export PROMPT_COMMAND='export PS1=\"{}\"'; export PS2=\"\"",
            PromptCodec::template()
        );
        self.surface.send_keys(&install, true).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.clear_screen().await?;

        self.cwd = std::path::absolute(&self.work_dir).unwrap_or_else(|_| self.work_dir.clone());
        self.initialized = true;
        debug!(surface = %self.surface.name(), "bash session initialized");
        Ok(())
    }

    /// Idempotent teardown.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.surface.kill().await?;
        self.closed = true;
        Ok(())
    }

    /// Run one command (or keystroke batch) to a structured result.
    ///
    /// Fatal errors are usage errors (not initialized) and observed
    /// shutdown; everything else - rejections, conflicts, timeouts - comes
    /// back as an [`Observation`].
    pub async fn execute(&mut self, request: &CommandRequest) -> Result<Observation> {
        if !self.initialized {
            bail!("bash session is not initialized");
        }

        let mut command = request.command.trim().to_string();
        let is_input = request.is_input;
        debug!(command = %command, is_input, blocking = request.blocking, "received command request");

        // Without a running previous command there is nothing to poll or
        // interact with.
        let prev_unfinished = matches!(
            self.prev_status,
            Some(
                SessionStatus::Continue
                    | SessionStatus::NoChangeTimeout
                    | SessionStatus::HardTimeout
            )
        );
        if !prev_unfinished {
            if command.is_empty() {
                return Ok(Observation::CommandOutput {
                    content: "ERROR: No previous running command to retrieve logs from."
                        .to_string(),
                    command: String::new(),
                    metadata: CmdOutputMetadata::default(),
                });
            }
            if is_input {
                return Ok(Observation::CommandOutput {
                    content: "ERROR: No previous running command to interact with.".to_string(),
                    command: String::new(),
                    metadata: CmdOutputMetadata::default(),
                });
            }
        }

        let statements = split_commands(&command);
        if statements.len() > 1 {
            let listing = statements
                .iter()
                .enumerate()
                .map(|(i, statement)| format!("({}) {}", i + 1, statement))
                .collect::<Vec<_>>()
                .join("\n");
            return Ok(Observation::Error {
                content: format!(
                    "ERROR: Cannot execute multiple commands at once.\n\
                     Please run each command separately OR chain them into a single command via && or ;\n\
                     Provided commands:\n{listing}"
                ),
            });
        }

        // Snapshot before sending anything: markers already on screen are
        // the completion baseline.
        let initial_content = self.pane_content().await?;
        let initial_marker_count = self.codec.find_markers(&initial_content).len();
        debug!(initial_marker_count, "completion baseline");

        let start = Instant::now();
        let mut last_change = start;
        let mut last_content = initial_content;

        // A genuinely new command while the previous one is unterminated is
        // refused; the caller gets the interim output plus its options.
        if matches!(
            self.prev_status,
            Some(SessionStatus::NoChangeTimeout | SessionStatus::HardTimeout)
        ) && !last_content.trim_end().ends_with(PROMPT_END)
            && !is_input
            && !command.is_empty()
        {
            let markers = self.codec.find_markers(&last_content);
            let raw = combine_outputs_between_matches(&last_content, &markers, false);
            let mut metadata = CmdOutputMetadata::default();
            metadata.suffix = format!(
                "\n[Your command \"{command}\" is NOT executed. \
                 The previous command is still running - You CANNOT send new commands until the previous command is completed. \
                 By setting `is_input` to `true`, you can interact with the current process: \
                 You may wait longer to see additional output of the previous command by sending empty command '', \
                 send other commands to interact with the current process, \
                 or send keys (\"C-c\", \"C-z\", \"C-d\") to interrupt/kill the previous command before sending your new command.]"
            );
            let content = self.command_output_delta(&command, &raw, &mut metadata, CONTINUE_PREFIX);
            return Ok(Observation::CommandOutput {
                content,
                command,
                metadata,
            });
        }

        if !command.is_empty() {
            let is_special = is_special_key(&command);
            if is_input {
                debug!(keys = %command, "sending input to running process");
                self.surface.send_keys(&command, !is_special).await?;
            } else {
                command = escape_special_chars(&command);
                debug!(keys = %command, "sending command");
                self.surface.send_keys(&command, !is_special).await?;
            }
        }

        loop {
            // Cancellation is advisory, checked once per iteration, and
            // fatal: no partial success on shutdown.
            if self.cancel.is_cancelled() {
                bail!("bash session was interrupted by shutdown");
            }

            let content = self.pane_content().await?;
            let markers = self.codec.find_markers(&content);
            if content != last_content {
                last_change = Instant::now();
                debug!("pane content changed");
                last_content = content.clone();
            }

            // Completed: a fresh marker appeared, or the tail is a marker
            // even though earlier ones scrolled out of history.
            if markers.len() > initial_marker_count
                || content.trim_end().ends_with(PROMPT_END)
            {
                return self.handle_completed(&command, &content, &markers).await;
            }

            // No-change timeout, skipped for blocking commands.
            if !request.blocking && last_change.elapsed() >= self.no_change_timeout {
                return Ok(self.handle_no_change_timeout(&command, &content, &markers));
            }

            // Hard timeout, independent of output activity.
            if let Some(timeout) = request.timeout {
                if start.elapsed().as_secs_f32() >= timeout {
                    return Ok(self.handle_hard_timeout(&command, &content, &markers, timeout));
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn handle_completed(
        &mut self,
        command: &str,
        content: &str,
        markers: &[Marker<'_>],
    ) -> Result<Observation> {
        let Some(last_marker) = markers.last() else {
            bail!(
                "expected at least one prompt marker in completed output\n---\n{}\n---",
                content
            );
        };
        let mut metadata = self.codec.decode(last_marker);

        // With a single visible marker, earlier history was evicted; infer
        // the output as everything before it. Documented heuristic: output
        // of an even earlier command may be misattributed if the scrollback
        // limit is too short.
        let before_last_match = markers.len() == 1;

        if !metadata.working_dir.is_empty() && Path::new(&metadata.working_dir) != self.cwd {
            self.cwd = PathBuf::from(&metadata.working_dir);
        }

        let raw = combine_outputs_between_matches(content, markers, before_last_match);
        if before_last_match {
            let num_lines = raw.lines().count();
            metadata.truncated = true;
            metadata.prefix = format!(
                "[Previous command outputs are truncated. Showing the last {num_lines} lines of the output below.]\n"
            );
        }
        metadata.suffix = if is_special_key(command) {
            let key = command
                .trim()
                .chars()
                .last()
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or('?');
            format!(
                "\n[The command completed with exit code {}. CTRL+{} was sent.]",
                metadata.exit_code, key
            )
        } else {
            format!(
                "\n[The command completed with exit code {}.]",
                metadata.exit_code
            )
        };
        let output = self.command_output_delta(command, &raw, &mut metadata, "");
        self.prev_status = Some(SessionStatus::Completed);
        self.prev_output.clear();
        // Fresh screen and history so the next command starts from a
        // one-marker baseline.
        self.clear_screen().await?;
        Ok(Observation::CommandOutput {
            content: output,
            command: command.to_string(),
            metadata,
        })
    }

    fn handle_no_change_timeout(
        &mut self,
        command: &str,
        content: &str,
        markers: &[Marker<'_>],
    ) -> Observation {
        self.prev_status = Some(SessionStatus::NoChangeTimeout);
        if markers.len() != 1 {
            warn!(
                count = markers.len(),
                "expected exactly one prompt marker before command execution"
            );
        }
        let raw = combine_outputs_between_matches(content, markers, false);
        let mut metadata = CmdOutputMetadata::default();
        metadata.suffix = format!(
            "\n[The command has no new output after {} seconds. {}]",
            self.no_change_timeout.as_secs_f32(),
            TIMEOUT_GUIDANCE
        );
        let output = self.command_output_delta(command, &raw, &mut metadata, CONTINUE_PREFIX);
        Observation::CommandOutput {
            content: output,
            command: command.to_string(),
            metadata,
        }
    }

    fn handle_hard_timeout(
        &mut self,
        command: &str,
        content: &str,
        markers: &[Marker<'_>],
        timeout: f32,
    ) -> Observation {
        self.prev_status = Some(SessionStatus::HardTimeout);
        if markers.len() != 1 {
            warn!(
                count = markers.len(),
                "expected exactly one prompt marker before command execution"
            );
        }
        let raw = combine_outputs_between_matches(content, markers, false);
        let mut metadata = CmdOutputMetadata::default();
        metadata.suffix = format!(
            "\n[The command timed out after {timeout} seconds. {TIMEOUT_GUIDANCE}]"
        );
        let output = self.command_output_delta(command, &raw, &mut metadata, CONTINUE_PREFIX);
        Observation::CommandOutput {
            content: output,
            command: command.to_string(),
            metadata,
        }
    }

    /// Strip what the caller already saw (the previous poll's output) and
    /// the echoed command, remembering the raw output for the next delta.
    fn command_output_delta(
        &mut self,
        command: &str,
        raw_output: &str,
        metadata: &mut CmdOutputMetadata,
        continue_prefix: &str,
    ) -> String {
        let output = if !self.prev_output.is_empty() {
            let stripped = raw_output
                .strip_prefix(self.prev_output.as_str())
                .unwrap_or(raw_output);
            metadata.prefix = continue_prefix.to_string();
            stripped.to_string()
        } else {
            raw_output.to_string()
        };
        self.prev_output = raw_output.to_string();
        remove_command_prefix(&output, command).trim_end().to_string()
    }

    /// Pane snapshot with per-line right-trim to avoid phantom trailing
    /// whitespace in diffs.
    async fn pane_content(&self) -> Result<String> {
        let lines = self.surface.capture_pane().await?;
        Ok(lines
            .iter()
            .map(|line| line.trim_end())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn clear_screen(&mut self) -> Result<()> {
        self.surface.send_keys("C-l", false).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.surface.clear_history().await
    }
}

/// Two-character control sequences like "C-c" are typed raw, no Enter.
fn is_special_key(command: &str) -> bool {
    let command = command.trim();
    command.starts_with("C-") && command.len() == 3
}

fn remove_command_prefix(output: &str, command: &str) -> String {
    let output = output.trim_start();
    let output = output
        .strip_prefix(command.trim_start())
        .unwrap_or(output);
    output.trim_start().to_string()
}

/// Pure extraction of command output from a snapshot given its marker set,
/// so boundary logic is testable against literal transcripts.
///
/// With two or more markers the output is everything strictly between
/// consecutive markers plus the tail after the last one. With exactly one
/// marker it is the text after it - or, when `before_last_match` is set
/// (scrollback evicted the opening marker), the text before it. With no
/// markers the whole snapshot is returned.
fn combine_outputs_between_matches(
    content: &str,
    markers: &[Marker<'_>],
    before_last_match: bool,
) -> String {
    if markers.len() == 1 {
        if before_last_match {
            return content[..markers[0].start].to_string();
        }
        return content[skip_one_char(content, markers[0].end)..].to_string();
    }
    if markers.is_empty() {
        return content.to_string();
    }
    let mut combined = String::new();
    for pair in markers.windows(2) {
        combined.push_str(&content[skip_one_char(content, pair[0].end)..pair[1].start]);
        combined.push('\n');
    }
    combined.push_str(&content[skip_one_char(content, markers[markers.len() - 1].end)..]);
    combined
}

/// Past the single separator character following a marker (the template
/// puts one space after the end token).
fn skip_one_char(s: &str, pos: usize) -> usize {
    s[pos..]
        .chars()
        .next()
        .map(|c| pos + c.len_utf8())
        .unwrap_or(pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{PromptCodec, PROMPT_BEGIN, PROMPT_END};

    fn marker_text(exit_code: i32, cwd: &str) -> String {
        format!("{PROMPT_BEGIN}exit_code={exit_code};working_dir={cwd};truncated=0{PROMPT_END}")
    }

    #[test]
    fn test_special_key_detection() {
        assert!(is_special_key("C-c"));
        assert!(is_special_key("  C-d "));
        assert!(!is_special_key("C-"));
        assert!(!is_special_key("C-cc"));
        assert!(!is_special_key("echo C-c"));
    }

    #[test]
    fn test_remove_command_prefix() {
        assert_eq!(remove_command_prefix("echo hi\nhi", "echo hi"), "hi");
        assert_eq!(remove_command_prefix("  echo hi\nhi", "echo hi"), "hi");
        assert_eq!(remove_command_prefix("unrelated", "echo hi"), "unrelated");
    }

    #[test]
    fn test_combine_between_two_markers() {
        let codec = PromptCodec::new();
        let content = format!(
            "{} echo hi\nhi\n{} ",
            marker_text(0, "/w"),
            marker_text(0, "/w")
        );
        let markers = codec.find_markers(&content);
        assert_eq!(markers.len(), 2);
        let raw = combine_outputs_between_matches(&content, &markers, false);
        // segment joining appends one newline per boundary
        assert_eq!(raw, "echo hi\nhi\n\n");
    }

    #[test]
    fn test_combine_single_marker_after() {
        let codec = PromptCodec::new();
        let content = format!("{} tail -f x\npartial", marker_text(0, "/w"));
        let markers = codec.find_markers(&content);
        let raw = combine_outputs_between_matches(&content, &markers, false);
        assert_eq!(raw, "tail -f x\npartial");
    }

    #[test]
    fn test_combine_single_marker_before_when_history_evicted() {
        let codec = PromptCodec::new();
        let content = format!("old output line\n{} ", marker_text(0, "/w"));
        let markers = codec.find_markers(&content);
        let raw = combine_outputs_between_matches(&content, &markers, true);
        assert_eq!(raw, "old output line\n");
    }

    #[test]
    fn test_combine_no_markers_returns_everything() {
        let raw = combine_outputs_between_matches("just text", &[], false);
        assert_eq!(raw, "just text");
    }

    #[test]
    fn test_combine_three_markers_joins_segments() {
        let codec = PromptCodec::new();
        let content = format!(
            "{} a\nout-a\n{} b\nout-b\n{} ",
            marker_text(0, "/w"),
            marker_text(0, "/w"),
            marker_text(0, "/w")
        );
        let markers = codec.find_markers(&content);
        assert_eq!(markers.len(), 3);
        let raw = combine_outputs_between_matches(&content, &markers, false);
        assert!(raw.contains("out-a"));
        assert!(raw.contains("out-b"));
    }
}
