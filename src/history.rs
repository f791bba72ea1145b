/// A single recorded command execution, derived from zone transitions or
/// explicit `start_command_execution`/`end_command_execution` calls.
#[derive(Debug, Clone)]
pub struct CommandExecution {
    pub command: String,
    pub cwd: String,
    pub exit_code: Option<i32>,
    pub output_start_row_id: u64,
    pub output_end_row_id: Option<u64>,
    /// Monotonic milliseconds, populated only by the explicit start/end API
    /// (never read inside `process`, which must not touch the clock).
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
}

/// Indexable, newest-first command history.
#[derive(Default)]
pub struct CommandHistory {
    entries: Vec<CommandExecution>,
    open: Option<CommandExecution>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, command: String, cwd: String, output_start_row_id: u64, started_at: Option<u64>) {
        if let Some(prev) = self.open.take() {
            self.entries.insert(0, prev);
        }
        self.open = Some(CommandExecution {
            command,
            cwd,
            exit_code: None,
            output_start_row_id,
            output_end_row_id: None,
            started_at,
            finished_at: None,
        });
    }

    pub fn finish(&mut self, exit_code: Option<i32>, output_end_row_id: u64, finished_at: Option<u64>) {
        if let Some(mut entry) = self.open.take() {
            entry.exit_code = exit_code;
            entry.output_end_row_id = Some(output_end_row_id);
            entry.finished_at = finished_at;
            self.entries.insert(0, entry);
        }
    }

    /// Newest-first view, including the still-open entry (if any) first.
    pub fn history(&self) -> Vec<&CommandExecution> {
        let mut out = Vec::with_capacity(self.entries.len() + 1);
        if let Some(open) = &self.open {
            out.push(open);
        }
        out.extend(self.entries.iter());
        out
    }

    pub fn get(&self, index: usize) -> Option<&CommandExecution> {
        if let Some(open) = &self.open {
            if index == 0 {
                return Some(open);
            }
            return self.entries.get(index - 1);
        }
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len() + if self.open.is_some() { 1 } else { 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.open = None;
    }
}
