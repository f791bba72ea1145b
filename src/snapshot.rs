use serde::Serialize;

use crate::error::{Result, TerminalError};
use crate::history::CommandExecution;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotScope {
    Visible,
    Recent,
    Full,
}

impl SnapshotScope {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "visible" => Ok(SnapshotScope::Visible),
            "recent" => Ok(SnapshotScope::Recent),
            "full" => Ok(SnapshotScope::Full),
            other => Err(TerminalError::InvalidArgument(format!(
                "scope must be one of visible, recent, full (got {other})"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandSummary {
    pub command: String,
    pub cwd: String,
    pub exit_code: Option<i32>,
    pub output: String,
}

impl CommandSummary {
    pub fn from_execution(exec: &CommandExecution, output: String) -> Self {
        Self {
            command: exec.command.clone(),
            cwd: exec.cwd.clone(),
            exit_code: exec.exit_code,
            output,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SemanticSnapshot {
    pub cols: u16,
    pub rows: u16,
    pub alt_screen_active: bool,
    pub title: String,
    pub cwd: Option<String>,
    pub cursor_row: u16,
    pub cursor_col: u16,
    /// Monotonic milliseconds supplied by the host at call time; the core
    /// never reads the clock itself.
    pub timestamp: Option<u64>,
    pub total_commands: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<CommandSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_scrollback_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd_history: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_commands: Option<Vec<CommandSummary>>,
}

impl SemanticSnapshot {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("SemanticSnapshot serializes infallibly")
    }
}
