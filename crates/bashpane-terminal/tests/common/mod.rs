//! Shared test fixture: a terminal surface driven by a script of pane
//! snapshots instead of a real terminal.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use bashpane_terminal::{SurfaceSpec, TerminalSurface};

/// Test-side handle onto a [`ScriptedSurface`]: records everything the
/// session sent and lets a test stage further snapshots between `execute`
/// calls.
#[derive(Debug, Clone, Default)]
pub struct SurfaceLog {
    pub sent: Arc<Mutex<Vec<(String, bool)>>>,
    pub kills: Arc<Mutex<usize>>,
    script: Arc<Mutex<VecDeque<String>>>,
}

impl SurfaceLog {
    pub fn sent_keys(&self) -> Vec<(String, bool)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn kill_count(&self) -> usize {
        *self.kills.lock().unwrap()
    }

    /// Queue another snapshot for a later `capture_pane`.
    pub fn push_snapshot(&self, snapshot: impl Into<String>) {
        self.script.lock().unwrap().push_back(snapshot.into());
    }
}

/// Replays a scripted sequence of pane snapshots. Each `capture_pane` call
/// advances to the next scripted snapshot; once the script runs out, the
/// last snapshot repeats forever (a pane with no new output).
pub struct ScriptedSurface {
    current: Mutex<String>,
    log: SurfaceLog,
}

impl ScriptedSurface {
    pub fn new(snapshots: &[String]) -> (Self, SurfaceLog) {
        let log = SurfaceLog {
            script: Arc::new(Mutex::new(snapshots.iter().cloned().collect())),
            ..SurfaceLog::default()
        };
        let surface = Self {
            current: Mutex::new(String::new()),
            log: log.clone(),
        };
        (surface, log)
    }
}

#[async_trait]
impl TerminalSurface for ScriptedSurface {
    async fn create(&mut self, _spec: &SurfaceSpec) -> Result<()> {
        Ok(())
    }

    async fn send_keys(&mut self, keys: &str, enter: bool) -> Result<()> {
        self.log
            .sent
            .lock()
            .unwrap()
            .push((keys.to_string(), enter));
        Ok(())
    }

    async fn capture_pane(&self) -> Result<Vec<String>> {
        let mut current = self.current.lock().unwrap();
        if let Some(next) = self.log.script.lock().unwrap().pop_front() {
            *current = next;
        }
        Ok(current.lines().map(|line| line.to_string()).collect())
    }

    async fn clear_history(&mut self) -> Result<()> {
        Ok(())
    }

    async fn kill(&mut self) -> Result<()> {
        *self.log.kills.lock().unwrap() += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
