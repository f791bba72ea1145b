pub mod error;
pub mod events;
pub mod graphics;
pub mod history;
pub mod progress;
pub mod snapshot;
pub mod terminal;
pub mod transfer;
pub mod triggers;
pub mod uservars;
pub mod zones;

use error::{Result, TerminalError};
use events::{Event, EventKind};
use graphics::Graphic;
use progress::{NamedProgressBar, ProgressState};
use snapshot::{CommandSummary, SemanticSnapshot, SnapshotScope};
use terminal::{NormalizationForm, TerminalState};
use transfer::{CompletedTransfer, FileTransfer};
use triggers::{Trigger, TriggerAction, TriggerHighlight, TriggerMatch};
use zones::Zone;

/// Top-level handle to a terminal session: the byte-stream interpreter plus
/// every collaborator it feeds (zones, history, triggers, progress bars,
/// user variables, file transfers, graphics). Owns the reentrancy guard —
/// `process` returns `Busy` if called again while already running (spec §5:
/// the core is single-threaded and cooperative, and observer callbacks must
/// not be able to re-enter it).
pub struct Terminal {
    state: TerminalState,
    processing: bool,
}

impl Terminal {
    pub fn new(cols: u16, rows: u16, scrollback_limit: usize) -> Self {
        let mut state = TerminalState::new(rows, cols);
        state.grid.scrollback_limit = scrollback_limit;
        Self {
            state,
            processing: false,
        }
    }

    /// Feed a chunk of PTY output through the parser. Does only
    /// allocation-bounded work proportional to the input and the number of
    /// subscribed observers — no I/O, no syscalls (spec §5).
    pub fn process(&mut self, bytes: &[u8]) -> Result<()> {
        if self.processing {
            return Err(TerminalError::Busy);
        }
        self.processing = true;
        let mut parser = vte::Parser::new();
        for &b in bytes {
            parser.advance(&mut self.state, b);
        }
        self.state.end_of_chunk();
        self.processing = false;
        Ok(())
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.state.resize(rows, cols);
    }

    pub fn cols(&self) -> u16 {
        self.state.cols()
    }

    pub fn rows(&self) -> u16 {
        self.state.rows()
    }

    /// Drain bytes the host should write back to the child process (DSR/DA
    /// responses, upload acknowledgements, bracketed paste framing, trigger
    /// `SendText`).
    pub fn drain_responses(&mut self) -> Vec<u8> {
        self.state.take_pending_responses()
    }

    // --- screen query -----------------------------------------------------

    pub fn get_char(&self, col: u16, row: u16) -> Option<char> {
        let grid = if self.state.using_alt {
            self.state.alt_grid.as_ref()?
        } else {
            &self.state.grid
        };
        if row >= grid.visible_rows || col >= grid.cols {
            return None;
        }
        Some(grid.visible_row(row).cells[col as usize].c)
    }

    pub fn alt_screen_active(&self) -> bool {
        self.state.using_alt
    }

    pub fn title(&self) -> &str {
        &self.state.title
    }

    // --- input feedback ----------------------------------------------------

    pub fn report_mouse(&mut self, kind: String, button: u8, row: u16, col: u16) {
        self.state.report_mouse(kind, button, row, col);
    }

    pub fn paste(&mut self, bytes: &[u8]) {
        self.state.paste(bytes);
    }

    pub fn set_clipboard_allowed(&mut self, allowed: bool) {
        self.state.clipboard_allowed = allowed;
    }

    // --- events --------------------------------------------------------

    pub fn poll_events(&mut self) -> Vec<Event> {
        self.state.events.poll_events()
    }

    pub fn set_event_subscription(&mut self, kinds: Vec<EventKind>) {
        self.state.events.set_event_subscription(kinds);
    }

    pub fn poll_subscribed_events(&mut self) -> Vec<Event> {
        self.state.events.poll_subscribed_events()
    }

    pub fn add_observer(
        &mut self,
        callback: impl FnMut(&Event) + Send + 'static,
        kinds: Option<Vec<EventKind>>,
    ) -> u64 {
        self.state.events.add_observer(callback, kinds)
    }

    pub fn add_async_observer(
        &mut self,
        kinds: Option<Vec<EventKind>>,
    ) -> (u64, crossbeam_channel::Receiver<Event>) {
        self.state.events.add_async_observer(kinds)
    }

    pub fn remove_observer(&mut self, id: u64) -> bool {
        self.state.events.remove_observer(id)
    }

    pub fn observer_count(&self) -> usize {
        self.state.events.observer_count()
    }

    // --- zones -----------------------------------------------------------

    pub fn get_zones(&self) -> &[Zone] {
        self.state.zones.zones()
    }

    pub fn get_zone_at(&self, abs_row: u64) -> Option<&Zone> {
        self.state.zones.zone_at(abs_row)
    }

    pub fn get_zone_text(&self, abs_row: u64) -> Option<String> {
        let zone = self.state.zones.zone_at(abs_row)?;
        Some(self.row_range_text(zone.abs_row_start, zone.abs_row_end))
    }

    // --- command history ---------------------------------------------------

    pub fn start_command_execution(&mut self, command: String) {
        self.state.zones.set_current_command(command.clone());
        let cwd = self.state.uservars.cwd.clone().unwrap_or_default();
        let abs_row = self.state.grid.visible_base_abs_id() + self.state.cursor.row as u64;
        self.state.history.start(command, cwd, abs_row, None);
    }

    pub fn end_command_execution(&mut self, exit_code: Option<i32>) {
        let abs_row = self.state.grid.visible_base_abs_id() + self.state.cursor.row as u64;
        self.state.history.finish(exit_code, abs_row, None);
    }

    pub fn get_command_history(&self) -> Vec<history::CommandExecution> {
        self.state.history.history().into_iter().cloned().collect()
    }

    fn row_range_text(&self, start: u64, end: Option<u64>) -> String {
        let grid = &self.state.grid;
        let end = end.unwrap_or_else(|| grid.visible_base_abs_id() + grid.visible_rows as u64 - 1);
        let mut lines = Vec::new();
        let mut id = start;
        while id <= end {
            if let Some(row) = grid.row_by_abs_id(id) {
                lines.push(row.text().trim_end().to_string());
            }
            id += 1;
        }
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }

    pub fn get_command_output(&self, index: usize) -> Option<String> {
        let exec = self.state.history.get(index)?;
        Some(self.row_range_text(exec.output_start_row_id, exec.output_end_row_id))
    }

    pub fn get_command_outputs(&self) -> Vec<String> {
        (0..self.state.history.len())
            .filter_map(|i| self.get_command_output(i))
            .collect()
    }

    // --- semantic snapshot --------------------------------------------------

    pub fn get_semantic_snapshot(&self, scope: SnapshotScope, max_commands: Option<usize>, timestamp: Option<u64>) -> SemanticSnapshot {
        let grid = &self.state.grid;
        let total_commands = self.state.history.len();
        let max = max_commands.unwrap_or(total_commands);

        let commands: Option<Vec<CommandSummary>> = if matches!(scope, SnapshotScope::Recent | SnapshotScope::Full) {
            let hist = self.state.history.history();
            Some(
                hist.iter()
                    .take(max)
                    .map(|exec| {
                        let output = self.row_range_text(exec.output_start_row_id, exec.output_end_row_id);
                        CommandSummary::from_execution(exec, output)
                    })
                    .collect(),
            )
        } else {
            None
        };

        let visible_text = if matches!(scope, SnapshotScope::Visible | SnapshotScope::Recent) {
            Some(self.state.get_text_range(0, grid.visible_rows))
        } else {
            None
        };

        let (full_scrollback_text, cwd_history, full_commands) = if scope == SnapshotScope::Full {
            let full_text = self.row_range_text(grid.oldest_retained_abs_id(), None);
            (Some(full_text), Some(self.state.cwd_history.clone()), commands.clone())
        } else {
            (None, None, None)
        };

        SemanticSnapshot {
            cols: self.state.cols(),
            rows: self.state.rows(),
            alt_screen_active: self.state.using_alt,
            title: self.state.title.clone(),
            cwd: self.state.uservars.cwd.clone(),
            cursor_row: self.state.cursor.row,
            cursor_col: self.state.cursor.col,
            timestamp,
            total_commands,
            visible_text,
            commands,
            full_scrollback_text,
            cwd_history,
            full_commands,
        }
    }

    pub fn get_semantic_snapshot_json(
        &self,
        scope: &str,
        max_commands: Option<usize>,
        timestamp: Option<u64>,
    ) -> Result<String> {
        let scope = SnapshotScope::parse(scope)?;
        Ok(self.get_semantic_snapshot(scope, max_commands, timestamp).to_json())
    }

    // --- triggers ----------------------------------------------------------

    pub fn add_trigger(&mut self, name: String, pattern: String, actions: Vec<TriggerAction>) -> Result<u64> {
        self.state.triggers.add_trigger(name, pattern, actions)
    }

    pub fn remove_trigger(&mut self, id: u64) -> bool {
        self.state.triggers.remove_trigger(id)
    }

    pub fn set_trigger_enabled(&mut self, id: u64, enabled: bool) -> bool {
        self.state.triggers.set_trigger_enabled(id, enabled)
    }

    pub fn get_trigger(&self, id: u64) -> Option<&Trigger> {
        self.state.triggers.get_trigger(id)
    }

    pub fn list_triggers(&self) -> &[Trigger] {
        self.state.triggers.list_triggers()
    }

    pub fn process_trigger_scans(&mut self) {
        self.state.scan_current_row();
    }

    pub fn poll_trigger_matches(&mut self) -> Vec<TriggerMatch> {
        self.state.triggers.poll_trigger_matches()
    }

    pub fn get_trigger_highlights(&self) -> &[TriggerHighlight] {
        self.state.triggers.get_trigger_highlights()
    }

    pub fn clear_trigger_highlights(&mut self) {
        self.state.triggers.clear_trigger_highlights();
    }

    pub fn sweep_expired_triggers(&mut self, now_ms: u64) {
        self.state.triggers.sweep_expired(now_ms);
    }

    // --- progress / user vars ------------------------------------------------

    pub fn set_named_progress_bar(&mut self, id: String, state: ProgressState, percent: Option<u8>, label: Option<String>) {
        self.state.progress.set(id, state, percent, label, &mut self.state.events);
    }

    pub fn remove_named_progress_bar(&mut self, id: &str) -> bool {
        self.state.progress.remove(id, &mut self.state.events)
    }

    pub fn named_progress_bars(&self) -> &[NamedProgressBar] {
        self.state.progress.all()
    }

    pub fn get_user_var(&self, key: &str) -> Option<&String> {
        self.state.uservars.get(key)
    }

    pub fn get_user_vars(&self) -> &std::collections::HashMap<String, String> {
        self.state.uservars.all()
    }

    pub fn get_badge_session_variables(&self) -> std::collections::HashMap<String, String> {
        self.state.uservars.badge_session_variables()
    }

    // --- file transfer -------------------------------------------------------

    pub fn get_max_transfer_size(&self) -> u64 {
        self.state.transfer.max_transfer_size()
    }

    pub fn set_max_transfer_size(&mut self, bytes: u64) {
        self.state.transfer.set_max_transfer_size(bytes);
    }

    pub fn get_active_transfers(&self) -> &[FileTransfer] {
        self.state.transfer.active_transfers()
    }

    pub fn get_completed_transfers(&self) -> &[CompletedTransfer] {
        self.state.transfer.completed_transfers()
    }

    pub fn take_completed_transfer(&mut self, id: &str) -> Option<CompletedTransfer> {
        self.state.transfer.take_completed_transfer(id)
    }

    pub fn cancel_file_transfer(&mut self, id: &str) -> bool {
        self.state.transfer.cancel_file_transfer(id, &mut self.state.events)
    }

    pub fn send_upload_data(&mut self, data: &[u8]) {
        self.state.transfer.send_upload_data(data);
    }

    pub fn cancel_upload(&mut self) {
        self.state.transfer.cancel_upload();
    }

    // --- graphics --------------------------------------------------------

    pub fn graphics_count(&self) -> usize {
        self.state.graphics.count()
    }

    pub fn graphics_at_row(&self, row: u64) -> Vec<&Graphic> {
        self.state.graphics.at_row(row)
    }

    pub fn export_graphics_json(&self) -> String {
        self.state.graphics.export_json()
    }

    pub fn import_graphics_json(&mut self, json: &str) -> Result<usize> {
        self.state.graphics.import_json(json)
    }

    // --- normalization -----------------------------------------------------

    pub fn set_normalization_form(&mut self, form: &str) -> Result<()> {
        let parsed = NormalizationForm::parse(form)
            .ok_or_else(|| TerminalError::InvalidArgument(format!("unknown normalization form: {form}")))?;
        self.state.normalization_form = parsed;
        Ok(())
    }

    pub fn normalization_form(&self) -> &'static str {
        self.state.normalization_form.as_str()
    }
}
