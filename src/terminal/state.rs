use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthChar;

use super::color::{indexed_to_rgb, Color};
use super::cursor::{CellAttrs, CursorShape, CursorState, UnderlineStyle};
use super::grid::{Cell, CellFlags, Grid};
use super::modes::TerminalModes;
use crate::events::{Event, EventBus};
use crate::graphics::{Dimension, GraphicsCatalog, Placement, Protocol};
use crate::history::CommandHistory;
use crate::progress::{ProgressBars, ProgressState};
use crate::transfer::TransferManager;
use crate::triggers::TriggerEngine;
use crate::uservars::SessionVariables;
use crate::zones::{ZoneKind, ZoneTracker};

/// Unicode normalization form applied to composed grapheme bases before they
/// are written into the grid (spec §6 `set_normalization_form`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(Default)]
pub enum NormalizationForm {
    None,
    #[default]
    Nfc,
    Nfd,
    Nfkc,
    Nfkd,
}


impl NormalizationForm {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" | "None" => Some(NormalizationForm::None),
            "nfc" | "NFC" => Some(NormalizationForm::Nfc),
            "nfd" | "NFD" => Some(NormalizationForm::Nfd),
            "nfkc" | "NFKC" => Some(NormalizationForm::Nfkc),
            "nfkd" | "NFKD" => Some(NormalizationForm::Nfkd),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizationForm::None => "none",
            NormalizationForm::Nfc => "nfc",
            NormalizationForm::Nfd => "nfd",
            NormalizationForm::Nfkc => "nfkc",
            NormalizationForm::Nfkd => "nfkd",
        }
    }
}

/// Full terminal state. Implements `vte::Perform` to process escape sequences.
pub struct TerminalState {
    pub grid: Grid,
    pub alt_grid: Option<Grid>,
    pub using_alt: bool,
    pub cursor: CursorState,
    pub modes: TerminalModes,
    pub scroll_top: u16,
    pub scroll_bottom: u16,
    /// DECSLRM left margin (only meaningful while `modes.left_right_margin_mode`).
    pub scroll_left: u16,
    /// DECSLRM right margin.
    pub scroll_right: u16,
    pub tab_stops: Vec<bool>,
    pub title: String,
    pub icon: String,
    /// OSC 8 hyperlink URIs, indexed by `Cell::hyperlink_id`/`CursorState::hyperlink_id`.
    pub hyperlinks: Vec<String>,
    pub zones: ZoneTracker,
    pub history: CommandHistory,
    pub events: EventBus,
    pub triggers: TriggerEngine,
    pub progress: ProgressBars,
    pub uservars: SessionVariables,
    pub transfer: TransferManager,
    pub graphics: GraphicsCatalog,
    /// Every cwd seen via OSC 7 / CurrentDir=, oldest first (for
    /// `semantic_snapshot(scope=full)`'s cwd history).
    pub cwd_history: Vec<String>,
    /// OSC 52 is deny-by-default (spec §9 open question 1); the host must
    /// opt in explicitly before non-query payloads surface as events.
    pub clipboard_allowed: bool,
    pub normalization_form: NormalizationForm,
    /// OSC 134 active shell-integration feature bitmap, stored verbatim.
    pub shell_integration_features: u32,
    /// Count of CSI/OSC/DCS sequences exceeding their payload cap (diagnostic).
    pub parser_overflow_count: u64,
    cols: u16,
    rows: u16,
    dcs_buffer: Vec<u8>,
    dcs_intermediates: Vec<u8>,
    dcs_action: Option<char>,
    dcs_overflowed: bool,
    /// Response bytes queued by CSI 6n (DSR), CSI c (DA), upload responses,
    /// bracketed paste, and trigger `SendText` — the return channel (spec §5/§6).
    pending_responses: Vec<Vec<u8>>,
    /// DEC Special Graphics charset active (ESC ( 0).
    charset_g0_drawing: bool,
    sixel_active: bool,
    sixel_buffer: Vec<u8>,
    /// Last character written by `print`/REP, used by CSI REP (`b`).
    last_printed_char: char,
    /// Codepoints accumulated since the last confirmed grapheme-cluster
    /// boundary (UAX #29, via `unicode-segmentation`), flushed before any
    /// non-print action and at the end of every `process` call.
    pending_grapheme: String,
}

impl TerminalState {
    pub fn new(rows: u16, cols: u16) -> Self {
        let mut tab_stops = vec![false; cols as usize];
        for i in (0..cols as usize).step_by(8) {
            tab_stops[i] = true;
        }

        Self {
            grid: Grid::new(rows, cols),
            alt_grid: None,
            using_alt: false,
            cursor: CursorState::new(),
            modes: TerminalModes::default(),
            scroll_top: 0,
            scroll_bottom: rows.saturating_sub(1),
            scroll_left: 0,
            scroll_right: cols.saturating_sub(1),
            tab_stops,
            title: String::new(),
            icon: String::new(),
            hyperlinks: Vec::new(),
            zones: ZoneTracker::new(),
            history: CommandHistory::new(),
            events: EventBus::new(),
            triggers: TriggerEngine::new(),
            progress: ProgressBars::new(),
            uservars: SessionVariables::new(),
            transfer: TransferManager::new(),
            graphics: GraphicsCatalog::new(),
            cwd_history: Vec::new(),
            clipboard_allowed: false,
            normalization_form: NormalizationForm::default(),
            shell_integration_features: 0,
            parser_overflow_count: 0,
            cols,
            rows,
            dcs_buffer: Vec::new(),
            dcs_intermediates: Vec::new(),
            dcs_action: None,
            dcs_overflowed: false,
            pending_responses: Vec::new(),
            charset_g0_drawing: false,
            sixel_active: false,
            sixel_buffer: Vec::new(),
            last_printed_char: ' ',
            pending_grapheme: String::new(),
        }
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    /// Drain any queued response bytes (DSR, DA, upload/paste/SendText
    /// framing) that the host should write back to the PTY.
    pub fn take_pending_responses(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in self.pending_responses.drain(..) {
            out.extend_from_slice(&chunk);
        }
        out.extend(self.transfer.drain_return_bytes());
        out.extend(self.triggers.take_send_text());
        out
    }

    /// Absolute row id of the row the cursor currently occupies on the
    /// primary screen (meaningless while `using_alt`, since zones are
    /// suspended there).
    fn current_abs_row(&self) -> u64 {
        self.grid.visible_base_abs_id() + self.cursor.row as u64
    }

    pub fn resize(&mut self, rows: u16, cols: u16) {
        self.flush_pending_print();
        self.grid.resize(rows, cols);
        if let Some(ref mut alt) = self.alt_grid {
            alt.resize_no_scrollback(rows, cols);
        }
        self.rows = rows;
        self.cols = cols;
        self.scroll_top = 0;
        self.scroll_bottom = rows.saturating_sub(1);
        self.scroll_left = 0;
        self.scroll_right = cols.saturating_sub(1);
        self.tab_stops = vec![false; cols as usize];
        for i in (0..cols as usize).step_by(8) {
            self.tab_stops[i] = true;
        }
        self.cursor.row = self.cursor.row.min(rows.saturating_sub(1));
        self.cursor.col = self.cursor.col.min(cols.saturating_sub(1));
    }

    /// Called once at the end of every top-level `process` call so a
    /// grapheme base with no further combining marks in this chunk still
    /// lands in the grid before the host can observe state.
    pub fn end_of_chunk(&mut self) {
        self.flush_pending_print();
    }

    /// Host-reported mouse event (spec §6 `report_mouse`). Emits the
    /// `mouse` event unconditionally, and additionally queues an SGR mouse
    /// report for the child process when tracking is enabled.
    pub fn report_mouse(&mut self, kind: String, button: u8, row: u16, col: u16) {
        self.events.emit(Event::Mouse {
            kind: kind.clone(),
            button,
            row,
            col,
        });
        let tracking = self.modes.mouse_tracking || self.modes.mouse_motion || self.modes.mouse_all_motion;
        if tracking && self.modes.sgr_mouse {
            let final_byte = if kind == "release" { 'm' } else { 'M' };
            let response = format!("\x1b[<{};{};{}{}", button, col + 1, row + 1, final_byte);
            self.pending_responses.push(response.into_bytes());
        }
    }

    /// Host-supplied pasted text (spec §6 `paste`). Emits the `paste` event
    /// and queues the bytes (bracketed, if the mode is active) for the
    /// child process.
    pub fn paste(&mut self, bytes: &[u8]) {
        self.events.emit(Event::Paste { bytes: bytes.len() });
        if self.modes.bracketed_paste {
            self.pending_responses.push(b"\x1b[200~".to_vec());
            self.pending_responses.push(bytes.to_vec());
            self.pending_responses.push(b"\x1b[201~".to_vec());
        } else {
            self.pending_responses.push(bytes.to_vec());
        }
    }

    fn active_grid_mut(&mut self) -> &mut Grid {
        if self.using_alt {
            self.alt_grid.as_mut().unwrap()
        } else {
            &mut self.grid
        }
    }

    fn h_right_margin(&self) -> u16 {
        if self.modes.left_right_margin_mode {
            self.scroll_right
        } else {
            self.cols.saturating_sub(1)
        }
    }

    fn erase_bg(&self) -> Color {
        if self.modes.bce_enabled {
            self.cursor.bg
        } else {
            Color::Default
        }
    }

    fn finalize_current_row(&mut self) {
        if self.using_alt {
            return;
        }
        let row = self.cursor.row;
        let text = self.grid.visible_row(row).text();
        self.triggers
            .scan_row(row, &text, None, &mut self.uservars, &mut self.events);
    }

    /// Flushes pending trigger scans for the row the cursor currently sits
    /// on, without moving the cursor — the explicit `process_trigger_scans`
    /// half of spec §4.6 (the other half is the automatic scan-on-finalize
    /// that happens inside `linefeed`).
    pub fn scan_current_row(&mut self) {
        self.finalize_current_row();
    }

    fn linefeed(&mut self) {
        self.finalize_current_row();
        if self.cursor.row == self.scroll_bottom {
            let top = self.scroll_top;
            let bottom = self.scroll_bottom;
            let using_alt = self.using_alt;
            if let Some(evicted) = self.active_grid_mut().scroll_up(top, bottom) {
                if !using_alt {
                    self.zones.prune_evicted(evicted + 1, &mut self.events);
                }
            }
        } else if self.cursor.row < self.rows.saturating_sub(1) {
            self.cursor.row += 1;
        }
    }

    fn reverse_index(&mut self) {
        if self.cursor.row == self.scroll_top {
            let top = self.scroll_top;
            let bottom = self.scroll_bottom;
            self.active_grid_mut().scroll_down(top, bottom);
        } else if self.cursor.row > 0 {
            self.cursor.row -= 1;
        }
    }

    fn carriage_return(&mut self) {
        self.cursor.col = 0;
    }

    fn backspace(&mut self) {
        if self.cursor.col > 0 {
            self.cursor.col -= 1;
        }
    }

    fn tab(&mut self) {
        let col = self.cursor.col as usize + 1;
        for i in col..self.cols as usize {
            if self.tab_stops.get(i).copied().unwrap_or(false) {
                self.cursor.col = i as u16;
                return;
            }
        }
        self.cursor.col = self.cols.saturating_sub(1);
    }

    fn cursor_up(&mut self, n: u16) {
        let min_row = if self.cursor.row >= self.scroll_top && self.cursor.row <= self.scroll_bottom {
            self.scroll_top
        } else {
            0
        };
        self.cursor.row = self.cursor.row.saturating_sub(n).max(min_row);
    }

    fn cursor_down(&mut self, n: u16) {
        let max_row = if self.cursor.row >= self.scroll_top && self.cursor.row <= self.scroll_bottom {
            self.scroll_bottom
        } else {
            self.rows.saturating_sub(1)
        };
        self.cursor.row = (self.cursor.row + n).min(max_row);
    }

    fn cursor_forward(&mut self, n: u16) {
        self.cursor.col = (self.cursor.col + n).min(self.cols.saturating_sub(1));
    }

    fn cursor_backward(&mut self, n: u16) {
        self.cursor.col = self.cursor.col.saturating_sub(n);
    }

    fn erase_display(&mut self, mode: u16, respect_protection: bool) {
        let crow = self.cursor.row;
        let ccol = self.cursor.col;
        let cols = self.cols;
        let rows = self.rows;
        let bg = self.erase_bg();
        let grid = self.active_grid_mut();
        match mode {
            0 => {
                grid.erase_cells(crow, ccol, cols, bg, respect_protection);
                for r in (crow + 1)..rows {
                    grid.visible_row_mut(r).erase_with_bg(bg, respect_protection);
                }
            }
            1 => {
                for r in 0..crow {
                    grid.visible_row_mut(r).erase_with_bg(bg, respect_protection);
                }
                grid.erase_cells(crow, 0, ccol + 1, bg, respect_protection);
            }
            2 => {
                for r in 0..rows {
                    grid.visible_row_mut(r).erase_with_bg(bg, respect_protection);
                }
            }
            3 => grid.clear_scrollback(),
            _ => {}
        }
    }

    fn erase_line(&mut self, mode: u16, respect_protection: bool) {
        let crow = self.cursor.row;
        let ccol = self.cursor.col;
        let cols = self.cols;
        let bg = self.erase_bg();
        let grid = self.active_grid_mut();
        match mode {
            0 => grid.erase_cells(crow, ccol, cols, bg, respect_protection),
            1 => grid.erase_cells(crow, 0, ccol + 1, bg, respect_protection),
            2 => grid.visible_row_mut(crow).erase_with_bg(bg, respect_protection),
            _ => {}
        }
    }

    fn insert_lines(&mut self, n: u16) {
        if self.cursor.row >= self.scroll_top && self.cursor.row <= self.scroll_bottom {
            let crow = self.cursor.row;
            let bottom = self.scroll_bottom;
            for _ in 0..n {
                self.active_grid_mut().scroll_down(crow, bottom);
            }
            self.cursor.col = 0;
        }
    }

    fn delete_lines(&mut self, n: u16) {
        if self.cursor.row >= self.scroll_top && self.cursor.row <= self.scroll_bottom {
            let crow = self.cursor.row;
            let bottom = self.scroll_bottom;
            let using_alt = self.using_alt;
            for _ in 0..n {
                if let Some(evicted) = self.active_grid_mut().scroll_up(crow, bottom) {
                    if !using_alt {
                        self.zones.prune_evicted(evicted + 1, &mut self.events);
                    }
                }
            }
            self.cursor.col = 0;
        }
    }

    fn erase_chars(&mut self, n: u16) {
        let end = (self.cursor.col + n).min(self.cols);
        let crow = self.cursor.row;
        let ccol = self.cursor.col;
        let bg = self.erase_bg();
        self.active_grid_mut().erase_cells(crow, ccol, end, bg, false);
    }

    fn insert_chars(&mut self, n: u16) {
        let crow = self.cursor.row;
        let ccol = self.cursor.col;
        let right = self.h_right_margin();
        self.active_grid_mut().insert_cells(crow, ccol, n, right);
    }

    fn delete_chars(&mut self, n: u16) {
        let crow = self.cursor.row;
        let ccol = self.cursor.col;
        let right = self.h_right_margin();
        self.active_grid_mut().delete_cells(crow, ccol, n, right);
    }

    fn scroll_up_n(&mut self, n: u16) {
        let top = self.scroll_top;
        let bottom = self.scroll_bottom;
        let using_alt = self.using_alt;
        for _ in 0..n {
            if let Some(evicted) = self.active_grid_mut().scroll_up(top, bottom) {
                if !using_alt {
                    self.zones.prune_evicted(evicted + 1, &mut self.events);
                }
            }
        }
    }

    fn scroll_down_n(&mut self, n: u16) {
        let top = self.scroll_top;
        let bottom = self.scroll_bottom;
        for _ in 0..n {
            self.active_grid_mut().scroll_down(top, bottom);
        }
    }

    fn save_cursor(&mut self) {
        self.cursor.save();
    }

    fn restore_cursor(&mut self) {
        self.cursor.restore();
    }

    fn enter_alt_screen(&mut self) {
        if !self.using_alt {
            self.alt_grid = Some(Grid::new(self.rows, self.cols));
            self.using_alt = true;
            self.modes.alt_screen = true;
            self.zones.suspend();
        }
    }

    fn exit_alt_screen(&mut self) {
        if self.using_alt {
            self.using_alt = false;
            self.modes.alt_screen = false;
            self.alt_grid = None;
            self.zones.resume();
        }
    }

    fn clear_screen(&mut self) {
        let rows = self.rows;
        let grid = self.active_grid_mut();
        for r in 0..rows {
            grid.visible_row_mut(r).clear();
        }
        self.cursor.row = 0;
        self.cursor.col = 0;
    }

    fn handle_sgr(&mut self, groups: &[Vec<u16>]) {
        let owned;
        let groups: &[Vec<u16>] = if groups.is_empty() {
            owned = vec![vec![0u16]];
            &owned
        } else {
            groups
        };

        let mut i = 0;
        while i < groups.len() {
            let code = groups[i].first().copied().unwrap_or(0);
            match code {
                0 => {
                    self.cursor.attrs = CellAttrs::empty();
                    self.cursor.fg = Color::Default;
                    self.cursor.bg = Color::Default;
                    self.cursor.underline_style = UnderlineStyle::None;
                    self.cursor.underline_color = Color::Default;
                }
                1 => self.cursor.attrs.insert(CellAttrs::BOLD),
                2 => self.cursor.attrs.insert(CellAttrs::DIM),
                3 => self.cursor.attrs.insert(CellAttrs::ITALIC),
                4 => {
                    if groups[i].len() > 1 {
                        let sub = groups[i][1];
                        self.cursor.underline_style = match sub {
                            0 => UnderlineStyle::None,
                            2 => UnderlineStyle::Double,
                            3 => UnderlineStyle::Curly,
                            4 => UnderlineStyle::Dotted,
                            5 => UnderlineStyle::Dashed,
                            _ => UnderlineStyle::Single,
                        };
                        self.cursor.attrs.set(CellAttrs::UNDERLINE, sub != 0);
                    } else {
                        self.cursor.attrs.insert(CellAttrs::UNDERLINE);
                        self.cursor.underline_style = UnderlineStyle::Single;
                    }
                }
                5 => self.cursor.attrs.insert(CellAttrs::BLINK),
                7 => self.cursor.attrs.insert(CellAttrs::REVERSE),
                8 => self.cursor.attrs.insert(CellAttrs::HIDDEN),
                9 => self.cursor.attrs.insert(CellAttrs::STRIKETHROUGH),
                22 => {
                    self.cursor.attrs.remove(CellAttrs::BOLD);
                    self.cursor.attrs.remove(CellAttrs::DIM);
                }
                23 => self.cursor.attrs.remove(CellAttrs::ITALIC),
                24 => {
                    self.cursor.attrs.remove(CellAttrs::UNDERLINE);
                    self.cursor.underline_style = UnderlineStyle::None;
                }
                25 => self.cursor.attrs.remove(CellAttrs::BLINK),
                27 => self.cursor.attrs.remove(CellAttrs::REVERSE),
                28 => self.cursor.attrs.remove(CellAttrs::HIDDEN),
                29 => self.cursor.attrs.remove(CellAttrs::STRIKETHROUGH),
                30..=37 => self.cursor.fg = Color::Indexed(code as u8 - 30),
                38 => {
                    if let Some(color) = parse_extended_color(groups, &mut i) {
                        self.cursor.fg = color;
                    }
                }
                39 => self.cursor.fg = Color::Default,
                40..=47 => self.cursor.bg = Color::Indexed(code as u8 - 40),
                48 => {
                    if let Some(color) = parse_extended_color(groups, &mut i) {
                        self.cursor.bg = color;
                    }
                }
                49 => self.cursor.bg = Color::Default,
                58 => {
                    if let Some(color) = parse_extended_color(groups, &mut i) {
                        self.cursor.underline_color = color;
                    }
                }
                59 => self.cursor.underline_color = Color::Default,
                90..=97 => self.cursor.fg = Color::Indexed(code as u8 - 90 + 8),
                100..=107 => self.cursor.bg = Color::Indexed(code as u8 - 100 + 8),
                _ => {}
            }
            i += 1;
        }
    }

    fn set_dec_mode(&mut self, params: &[u16], enable: bool) {
        for &p in params {
            match p {
                1 => self.modes.cursor_keys_application = enable,
                3 => {} // 132-col mode: ignored (open question resolved: no resize side effect)
                6 => {
                    self.modes.origin = enable;
                    self.cursor.row = if enable { self.scroll_top } else { 0 };
                    self.cursor.col = if enable { self.scroll_left } else { 0 };
                }
                7 => self.modes.autowrap = enable,
                12 => {}
                25 => self.modes.cursor_visible = enable,
                69 => {
                    self.modes.left_right_margin_mode = enable;
                    if !enable {
                        self.scroll_left = 0;
                        self.scroll_right = self.cols.saturating_sub(1);
                    }
                }
                47 => {
                    if enable {
                        self.enter_alt_screen();
                    } else {
                        self.exit_alt_screen();
                    }
                }
                1000 => self.modes.mouse_tracking = enable,
                1002 => self.modes.mouse_motion = enable,
                1003 => self.modes.mouse_all_motion = enable,
                1004 => self.modes.focus_events = enable,
                1005 => self.modes.utf8_mouse = enable,
                1006 => self.modes.sgr_mouse = enable,
                1007 => self.modes.alternate_scroll = enable,
                1047 => {
                    if enable {
                        self.enter_alt_screen();
                        self.clear_screen();
                    } else {
                        self.exit_alt_screen();
                    }
                }
                1048 => {
                    if enable {
                        self.save_cursor();
                    } else {
                        self.restore_cursor();
                    }
                }
                1049 => {
                    if enable {
                        self.save_cursor();
                        self.enter_alt_screen();
                        self.clear_screen();
                    } else {
                        self.exit_alt_screen();
                        self.restore_cursor();
                    }
                }
                2004 => self.modes.bracketed_paste = enable,
                2026 => self.modes.synchronized_output = enable,
                _ => {}
            }
        }
    }

    fn report_mode_state(&mut self, mode: u16, set: Option<bool>, dec_private: bool) {
        let pm = match set {
            Some(true) => 1,
            Some(false) => 2,
            None => 0,
        };
        let prefix = if dec_private { "?" } else { "" };
        let response = format!("\x1b[{}{};{}$y", prefix, mode, pm);
        self.pending_responses.push(response.into_bytes());
    }

    fn dec_mode_state(&self, mode: u16) -> Option<bool> {
        match mode {
            1 => Some(self.modes.cursor_keys_application),
            6 => Some(self.modes.origin),
            7 => Some(self.modes.autowrap),
            25 => Some(self.modes.cursor_visible),
            47 | 1047 | 1049 => Some(self.using_alt),
            69 => Some(self.modes.left_right_margin_mode),
            1000 => Some(self.modes.mouse_tracking),
            1002 => Some(self.modes.mouse_motion),
            1003 => Some(self.modes.mouse_all_motion),
            1004 => Some(self.modes.focus_events),
            1005 => Some(self.modes.utf8_mouse),
            1006 => Some(self.modes.sgr_mouse),
            1007 => Some(self.modes.alternate_scroll),
            2004 => Some(self.modes.bracketed_paste),
            2026 => Some(self.modes.synchronized_output),
            _ => None,
        }
    }

    fn ansi_mode_state(&self, mode: u16) -> Option<bool> {
        match mode {
            4 => Some(self.modes.insert),
            20 => Some(self.modes.linefeed_newline),
            _ => None,
        }
    }

    fn report_dec_modes(&mut self, params: &[u16]) {
        if params.is_empty() {
            self.report_mode_state(0, None, true);
            return;
        }
        for &mode in params {
            self.report_mode_state(mode, self.dec_mode_state(mode), true);
        }
    }

    fn report_ansi_modes(&mut self, params: &[u16]) {
        if params.is_empty() {
            self.report_mode_state(0, None, false);
            return;
        }
        for &mode in params {
            self.report_mode_state(mode, self.ansi_mode_state(mode), false);
        }
    }

    fn set_mode(&mut self, params: &[u16], enable: bool) {
        for &p in params {
            match p {
                4 => self.modes.insert = enable,
                20 => self.modes.linefeed_newline = enable,
                _ => {}
            }
        }
    }

    fn note_cwd(&mut self) {
        if let Some(cwd) = self.uservars.cwd.clone() {
            if self.cwd_history.last() != Some(&cwd) {
                self.cwd_history.push(cwd);
            }
        }
    }

    fn handle_osc(&mut self, params: &[&[u8]]) {
        if params.is_empty() {
            return;
        }
        let first = std::str::from_utf8(params[0]).unwrap_or("");

        match first {
            "0" | "1" | "2"
                if params.len() >= 2 => {
                    let text = String::from_utf8_lossy(params[1]).to_string();
                    if first != "1" {
                        self.title = text.clone();
                        self.events.emit(Event::TitleChanged { title: text.clone() });
                    }
                    if first != "2" {
                        self.icon = text.clone();
                        self.events.emit(Event::IconChanged { icon: text });
                    }
                }
            "7"
                if params.len() >= 2 => {
                    let uri = String::from_utf8_lossy(params[1]).to_string();
                    if let Some(rest) = uri.strip_prefix("file://") {
                        let (host, path) = match rest.find('/') {
                            Some(idx) => (&rest[..idx], rest[idx..].to_string()),
                            None => ("", rest.to_string()),
                        };
                        let host = if host.is_empty() { None } else { Some(host) };
                        self.uservars.set_cwd_from_osc7(host, path, &mut self.events);
                    } else {
                        self.uservars.set_cwd_from_osc7(None, uri, &mut self.events);
                    }
                    self.note_cwd();
                }
            "8" => {
                if params.len() >= 3 {
                    let uri = String::from_utf8_lossy(params[2]).to_string();
                    if uri.is_empty() {
                        self.cursor.hyperlink_id = None;
                        self.events.emit(Event::Hyperlink { id: None, uri: None });
                    } else {
                        let id = self.hyperlinks.len() as u32;
                        self.hyperlinks.push(uri.clone());
                        self.cursor.hyperlink_id = Some(id);
                        self.events.emit(Event::Hyperlink { id: Some(id), uri: Some(uri) });
                    }
                } else {
                    self.cursor.hyperlink_id = None;
                }
            }
            "9"
                if params.len() >= 2 && params[1] == b"4" => {
                    let state_code: u8 = params
                        .get(2)
                        .and_then(|p| std::str::from_utf8(p).ok())
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0);
                    let percent: Option<u8> = params
                        .get(3)
                        .and_then(|p| std::str::from_utf8(p).ok())
                        .and_then(|s| s.parse().ok());
                    match state_code {
                        0 => self.progress.clear_legacy(),
                        1 => self.progress.set_legacy(ProgressState::Normal, percent),
                        2 => self.progress.set_legacy(ProgressState::Error, percent),
                        3 => self.progress.set_legacy(ProgressState::Indeterminate, percent),
                        4 => self.progress.set_legacy(ProgressState::Warning, percent),
                        _ => {}
                    }
                }
            "4"
                if params.len() >= 3 && params[2] == b"?" => {
                    if let Ok(idx_str) = std::str::from_utf8(params[1]) {
                        if let Ok(index) = idx_str.parse::<u8>() {
                            let (r, g, b) = indexed_to_rgb(index);
                            let response = format!(
                                "\x1b]4;{};rgb:{:04x}/{:04x}/{:04x}\x1b\\",
                                index,
                                r as u16 * 0x0101,
                                g as u16 * 0x0101,
                                b as u16 * 0x0101
                            );
                            self.pending_responses.push(response.into_bytes());
                        }
                    }
                }
            "10" | "11" | "12"
                if params.len() >= 2 && params[1] == b"?" => {
                    let (r, g, b): (u8, u8, u8) = match first {
                        "10" => (0xd4, 0xd4, 0xd4),
                        "11" => (0x0e, 0x0e, 0x0e),
                        _ => (0xd4, 0xd4, 0xd4),
                    };
                    let response = format!(
                        "\x1b]{};rgb:{:04x}/{:04x}/{:04x}\x1b\\",
                        first,
                        r as u16 * 0x0101,
                        g as u16 * 0x0101,
                        b as u16 * 0x0101
                    );
                    self.pending_responses.push(response.into_bytes());
                }
            "52" => self.handle_osc_52(params),
            "133"
                if params.len() >= 2 => {
                    let marker = std::str::from_utf8(params[1]).unwrap_or("");
                    let abs_row = self.current_abs_row();
                    match marker {
                        "A" => self.zones.prompt_start(abs_row, &mut self.events),
                        "B" => self.zones.command_start(abs_row, &mut self.events),
                        "C" => {
                            self.zones.output_start(abs_row, &mut self.events);
                            let command = self
                                .zones
                                .zones()
                                .iter()
                                .rev()
                                .find(|z| z.kind == ZoneKind::Command)
                                .and_then(|z| z.command.clone())
                                .unwrap_or_default();
                            let cwd = self.uservars.cwd.clone().unwrap_or_default();
                            self.history.start(command, cwd, abs_row, None);
                        }
                        "D" => {
                            let exit_code = params
                                .get(2)
                                .and_then(|p| std::str::from_utf8(p).ok())
                                .and_then(|s| s.parse::<i32>().ok());
                            self.zones.command_end(abs_row, exit_code, &mut self.events);
                            self.history.finish(exit_code, abs_row, None);
                        }
                        _ => {}
                    }
                }
            "134" => {
                if let Some(bits) = params
                    .get(1)
                    .and_then(|p| std::str::from_utf8(p).ok())
                    .and_then(|s| s.parse::<u32>().ok())
                {
                    self.shell_integration_features = bits;
                }
            }
            "934"
                if params.len() >= 2 => {
                    let sub = std::str::from_utf8(params[1]).unwrap_or("");
                    match sub {
                        "remove_all" => self.progress.remove_all(&mut self.events),
                        "remove" => {
                            if let Some(id) = params.get(2) {
                                let id = String::from_utf8_lossy(id).to_string();
                                self.progress.remove(&id, &mut self.events);
                            }
                        }
                        "set" => {
                            if let Some(id) = params.get(2) {
                                let id = String::from_utf8_lossy(id).to_string();
                                let mut state = ProgressState::Normal;
                                let mut percent = None;
                                let mut label = None;
                                for kv in &params[3..] {
                                    let s = String::from_utf8_lossy(kv);
                                    if let Some((k, v)) = s.split_once('=') {
                                        match k {
                                            "state" => {
                                                state = ProgressState::parse(v).unwrap_or(ProgressState::Normal)
                                            }
                                            "percent" => percent = v.parse().ok(),
                                            "label" => label = Some(v.to_string()),
                                            _ => {}
                                        }
                                    }
                                }
                                self.progress.set(id, state, percent, label, &mut self.events);
                            }
                        }
                        _ => {}
                    }
                }
            "1337" => self.handle_osc_1337(params),
            _ => {
                tracing::debug!(code = first, "unhandled OSC sequence");
            }
        }
    }

    fn handle_osc_1337(&mut self, params: &[&[u8]]) {
        if params.len() < 2 {
            return;
        }
        let first_field = String::from_utf8_lossy(params[1]).to_string();

        if let Some(rest) = first_field.strip_prefix("SetUserVar=") {
            if let Some((name, b64val)) = rest.split_once('=') {
                if let Ok(decoded) = BASE64_STANDARD.decode(b64val.as_bytes()) {
                    let value = String::from_utf8_lossy(&decoded).to_string();
                    self.uservars.set(name.to_string(), value, &mut self.events);
                }
            }
            return;
        }
        if let Some(rest) = first_field.strip_prefix("RemoteHost=") {
            self.uservars.set_remote_host(rest, &mut self.events);
            return;
        }
        if let Some(rest) = first_field.strip_prefix("CurrentDir=") {
            self.uservars.cwd = Some(rest.to_string());
            self.events.emit(Event::CwdChanged { path: rest.to_string() });
            self.note_cwd();
            return;
        }
        if first_field == "ClearScrollback" {
            self.grid.clear_scrollback();
            return;
        }
        if let Some(rest) = first_field.strip_prefix("RequestUpload=") {
            let raw_name = rest.strip_prefix("file=").unwrap_or(rest);
            let name = BASE64_STANDARD
                .decode(raw_name)
                .ok()
                .and_then(|b| String::from_utf8(b).ok())
                .unwrap_or_else(|| raw_name.to_string());
            self.transfer.request_upload(name, &mut self.events);
            return;
        }

        let joined = params[1..]
            .iter()
            .map(|p| String::from_utf8_lossy(p).to_string())
            .collect::<Vec<_>>()
            .join(";");
        let Some(rest) = joined.strip_prefix("File=") else {
            return;
        };
        let Some(colon_idx) = rest.find(':') else {
            return;
        };
        let param_str = &rest[..colon_idx];
        let base64_data = &rest[colon_idx + 1..];

        let mut name = String::new();
        let mut size: Option<u64> = None;
        let mut inline = false;
        let mut width = Dimension::Auto;
        let mut height = Dimension::Auto;
        for part in param_str.split(';') {
            if let Some((key, val)) = part.split_once('=') {
                match key {
                    "name" => {
                        name = BASE64_STANDARD
                            .decode(val)
                            .ok()
                            .and_then(|b| String::from_utf8(b).ok())
                            .unwrap_or_default()
                    }
                    "size" => size = val.parse().ok(),
                    "inline" => inline = val == "1",
                    "width" => width = parse_dimension(val),
                    "height" => height = parse_dimension(val),
                    _ => {}
                }
            }
        }

        let Ok(data) = BASE64_STANDARD.decode(base64_data) else {
            return;
        };

        if inline {
            let abs_row = self.current_abs_row();
            let placement = Placement {
                requested_width: width,
                requested_height: height,
                ..Placement::default()
            };
            self.graphics
                .add(Protocol::ItermInline, data, 0, 0, abs_row, self.cursor.col, placement);
        } else {
            let id = self.transfer.start_download(name, size, &mut self.events);
            self.transfer.append_data(&id, &data, &mut self.events);
            self.transfer.finish(&id, &mut self.events);
        }
    }

    /// OSC 52: deny by default (spec §9 open question 1). A non-query
    /// payload only surfaces as a `clipboard_request` event for the host to
    /// act on when `clipboard_allowed` has been explicitly set; the core
    /// never touches an OS clipboard itself. Queries never get a response.
    fn handle_osc_52(&mut self, params: &[&[u8]]) {
        if params.len() < 3 || !self.clipboard_allowed {
            return;
        }
        let selection = params[1].first().copied().unwrap_or(b'c') as char;
        let payload = std::str::from_utf8(params[2]).unwrap_or("");
        if payload == "?" {
            return;
        }
        self.events.emit(Event::ClipboardRequest {
            selection,
            data_base64: Some(payload.to_string()),
        });
    }

    fn handle_dcs(&mut self, action: Option<char>, intermediates: &[u8], data: &[u8]) {
        match (action, intermediates) {
            (Some('q'), [b'+']) => self.handle_xtgettcap(data),
            (Some('q'), [b'$']) => self.handle_decrqss(data),
            _ => {}
        }
    }

    fn handle_xtgettcap(&mut self, data: &[u8]) {
        let raw = String::from_utf8_lossy(data);
        if raw.trim().is_empty() {
            self.pending_responses.push(b"\x1bP0+r\x1b\\".to_vec());
            return;
        }

        let mut pairs: Vec<String> = Vec::new();
        for item in raw.split(';') {
            if item.is_empty() {
                continue;
            }
            let Some(name) = decode_hex_ascii(item) else {
                self.pending_responses.push(b"\x1bP0+r\x1b\\".to_vec());
                return;
            };
            let Some(value) = tcap_capability_value(&name) else {
                self.pending_responses.push(b"\x1bP0+r\x1b\\".to_vec());
                return;
            };
            pairs.push(format!("{}={}", encode_hex_ascii(&name), encode_hex_ascii(value)));
        }

        if pairs.is_empty() {
            self.pending_responses.push(b"\x1bP0+r\x1b\\".to_vec());
            return;
        }
        let response = format!("\x1bP1+r{}\x1b\\", pairs.join(";"));
        self.pending_responses.push(response.into_bytes());
    }

    fn handle_decrqss(&mut self, data: &[u8]) {
        let query = String::from_utf8_lossy(data).to_string();
        let status = match query.as_str() {
            "m" => Some("0m".to_string()),
            " q" => {
                let cursor_style = match self.cursor.shape {
                    CursorShape::Block => 2,
                    CursorShape::Underline => 4,
                    CursorShape::Bar => 6,
                };
                Some(format!("{} q", cursor_style))
            }
            "r" => Some(format!("{};{}r", self.scroll_top + 1, self.scroll_bottom + 1)),
            _ => None,
        };

        if let Some(pt) = status {
            let response = format!("\x1bP1$r{}\x1b\\", pt);
            self.pending_responses.push(response.into_bytes());
        } else {
            self.pending_responses.push(b"\x1bP0$r\x1b\\".to_vec());
        }
    }

    /// Flush whatever grapheme cluster is still buffered (a chunk boundary
    /// forces it out even if a combining mark could in principle still
    /// follow).
    fn flush_pending_print(&mut self) {
        if self.pending_grapheme.is_empty() {
            return;
        }
        let grapheme = std::mem::take(&mut self.pending_grapheme);
        self.flush_grapheme(&grapheme);
    }

    /// Normalize one confirmed grapheme cluster and place it. Multi-codepoint
    /// clusters (combining marks, ZWJ sequences) are represented by their
    /// normalized lead codepoint, matching a single-cell grid model.
    fn flush_grapheme(&mut self, grapheme: &str) {
        let normalized: String = match self.normalization_form {
            NormalizationForm::None => grapheme.to_string(),
            NormalizationForm::Nfc => grapheme.nfc().collect(),
            NormalizationForm::Nfd => grapheme.nfd().collect(),
            NormalizationForm::Nfkc => grapheme.nfkc().collect(),
            NormalizationForm::Nfkd => grapheme.nfkd().collect(),
        };
        let Some(c) = normalized.chars().next().or_else(|| grapheme.chars().next()) else {
            return;
        };
        self.place_char(c);
    }

    fn place_char(&mut self, c: char) {
        let c = if self.charset_g0_drawing {
            dec_line_drawing_char(c)
        } else {
            c
        };
        self.emit_char(c);
    }

    /// Writes a single already-resolved character at the cursor, handling
    /// autowrap/insert-mode/wide-character spacer bookkeeping. Shared by
    /// `place_char` and CSI REP (`b`), which replays `last_printed_char`.
    fn emit_char(&mut self, c: char) {
        let width = UnicodeWidthChar::width(c).unwrap_or(1).max(1) as u16;

        if self.cursor.col >= self.cols {
            if self.modes.autowrap {
                let row = self.cursor.row;
                self.active_grid_mut().visible_row_mut(row).wrapped = true;
                self.carriage_return();
                self.linefeed();
            } else {
                self.cursor.col = self.cols.saturating_sub(1);
            }
        }

        // A wide glyph doesn't fit in the last column: pad it blank and wrap
        // before placing the glyph, rather than splitting it across rows.
        if width == 2 && self.cursor.col == self.cols.saturating_sub(1) && self.modes.autowrap {
            let row = self.cursor.row;
            let col = self.cursor.col;
            self.active_grid_mut().clear_cell(row, col);
            self.active_grid_mut().visible_row_mut(row).wrapped = true;
            self.carriage_return();
            self.linefeed();
        }

        if self.modes.insert {
            let row = self.cursor.row;
            let col = self.cursor.col;
            let right = self.h_right_margin();
            self.active_grid_mut().insert_cells(row, col, width, right);
        }

        let row = self.cursor.row;
        let col = self.cursor.col;
        let mut flags = if width == 2 {
            CellFlags::WIDE_CHAR
        } else {
            CellFlags::empty()
        };
        if self.modes.protected_attribute {
            flags.insert(CellFlags::PROTECTED);
        }
        let cell = Cell {
            c,
            fg: self.cursor.fg,
            bg: self.cursor.bg,
            attrs: self.cursor.attrs,
            underline_style: self.cursor.underline_style,
            underline_color: self.cursor.underline_color,
            hyperlink_id: self.cursor.hyperlink_id,
            flags,
        };

        let cols = self.cols;
        let grid = self.active_grid_mut();
        grid.set_cell(row, col, cell);
        if width == 2 && col + 1 < cols {
            grid.set_cell(row, col + 1, Cell::wide_spacer());
        }
        self.cursor.col += width;
        self.last_printed_char = c;
    }

    pub fn get_text_range(&self, start_row: u16, end_row: u16) -> String {
        let grid = if self.using_alt {
            self.alt_grid.as_ref().unwrap_or(&self.grid)
        } else {
            &self.grid
        };
        let mut lines = Vec::new();
        for row in start_row..end_row.min(grid.visible_rows) {
            lines.push(grid.visible_row(row).text().trim_end().to_string());
        }
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }
}

fn extract_params(params: &vte::Params) -> Vec<u16> {
    params.iter().flat_map(|subparams| subparams.iter().copied()).collect()
}

/// Preserves vte's native per-parameter subparameter grouping (colon vs.
/// semicolon), needed for SGR 38/48/58 (spec §4.1: "subseparator `:`
/// preserved for SGR").
fn grouped_params(params: &vte::Params) -> Vec<Vec<u16>> {
    params.iter().map(|g| g.to_vec()).collect()
}

fn param(params: &[u16], idx: usize, default: u16) -> u16 {
    params.get(idx).copied().filter(|&v| v != 0).unwrap_or(default)
}

/// SGR 38/48/58 extended color, handling both the colon form (all
/// subparameters in one group, e.g. `38:2::r:g:b`) and the classic
/// semicolon form (`38;2;r;g;b` spread across several groups).
fn parse_extended_color(groups: &[Vec<u16>], i: &mut usize) -> Option<Color> {
    let group = &groups[*i];
    if group.len() > 1 {
        match group[1] {
            5 if group.len() >= 3 => Some(Color::Indexed(group[2] as u8)),
            2 => {
                let tail = &group[2..];
                if tail.len() >= 4 {
                    Some(Color::Rgb(tail[1] as u8, tail[2] as u8, tail[3] as u8))
                } else if tail.len() >= 3 {
                    Some(Color::Rgb(tail[0] as u8, tail[1] as u8, tail[2] as u8))
                } else {
                    None
                }
            }
            _ => None,
        }
    } else {
        let next = groups.get(*i + 1)?;
        match next.first().copied().unwrap_or(0) {
            5 => {
                let n = groups.get(*i + 2).and_then(|g| g.first()).copied().unwrap_or(0);
                *i += 2;
                Some(Color::Indexed(n as u8))
            }
            2 => {
                let r = groups.get(*i + 2).and_then(|g| g.first()).copied().unwrap_or(0);
                let g = groups.get(*i + 3).and_then(|g| g.first()).copied().unwrap_or(0);
                let b = groups.get(*i + 4).and_then(|g| g.first()).copied().unwrap_or(0);
                *i += 4;
                Some(Color::Rgb(r as u8, g as u8, b as u8))
            }
            _ => None,
        }
    }
}

fn parse_dimension(s: &str) -> Dimension {
    if s == "auto" || s.is_empty() {
        Dimension::Auto
    } else if let Some(pct) = s.strip_suffix('%') {
        pct.parse().map(Dimension::Percent).unwrap_or(Dimension::Auto)
    } else if let Some(px) = s.strip_suffix("px") {
        px.parse().map(Dimension::Pixels).unwrap_or(Dimension::Auto)
    } else {
        s.parse().map(Dimension::Cells).unwrap_or(Dimension::Auto)
    }
}

fn decode_hex_ascii(input: &str) -> Option<String> {
    if !input.len().is_multiple_of(2) {
        return None;
    }
    let mut out = Vec::with_capacity(input.len() / 2);
    let bytes = input.as_bytes();
    let mut i = 0usize;
    while i + 1 < bytes.len() {
        let pair = std::str::from_utf8(&bytes[i..i + 2]).ok()?;
        out.push(u8::from_str_radix(pair, 16).ok()?);
        i += 2;
    }
    String::from_utf8(out).ok()
}

fn encode_hex_ascii(input: &str) -> String {
    input.as_bytes().iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join("")
}

fn tcap_capability_value(name: &str) -> Option<&'static str> {
    match name {
        "TN" | "name" => Some("xterm-256color"),
        "Co" | "colors" => Some("256"),
        "RGB" | "Tc" => Some("8"),
        "Ms" => Some("\x1b]52;%p1%s;%p2%s\x07"),
        "Ss" => Some("\x1b[%p1%d q"),
        "Se" => Some("\x1b[2 q"),
        _ => None,
    }
}

/// Map ASCII to DEC Special Graphics (line-drawing) character.
fn dec_line_drawing_char(c: char) -> char {
    match c {
        '`' => '◆',
        'a' => '▒',
        'j' => '┘',
        'k' => '┐',
        'l' => '┌',
        'm' => '└',
        'n' => '┼',
        'o' => '⎺',
        'p' => '⎻',
        'q' => '─',
        'r' => '⎼',
        's' => '⎽',
        't' => '├',
        'u' => '┤',
        'v' => '┴',
        'w' => '┬',
        'x' => '│',
        'y' => '≤',
        'z' => '≥',
        '{' => 'π',
        '|' => '≠',
        '}' => '£',
        '~' => '·',
        _ => c,
    }
}

impl vte::Perform for TerminalState {
    fn print(&mut self, c: char) {
        self.pending_grapheme.push(c);
        let buf = std::mem::take(&mut self.pending_grapheme);
        let mut clusters: Vec<&str> = buf.graphemes(true).collect();
        if clusters.len() > 1 {
            // UAX #29 confirms every cluster but the last is complete (only
            // the trailing one could still grow with another combining mark
            // or ZWJ continuation).
            let tail = clusters.pop().unwrap().to_string();
            let complete: Vec<String> = clusters.into_iter().map(str::to_string).collect();
            for cluster in &complete {
                self.flush_grapheme(cluster);
            }
            self.pending_grapheme = tail;
        } else {
            self.pending_grapheme = buf;
        }
    }

    fn execute(&mut self, byte: u8) {
        self.flush_pending_print();
        match byte {
            0x07 => self.events.emit(Event::Bell),
            0x08 => self.backspace(),
            0x09 => self.tab(),
            0x0A..=0x0C => {
                self.linefeed();
                if self.modes.linefeed_newline {
                    self.carriage_return();
                }
            }
            0x0D => self.carriage_return(),
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &vte::Params, intermediates: &[u8], _ignore: bool, action: char) {
        self.flush_pending_print();
        let raw = extract_params(params);
        let is_private = intermediates.contains(&b'?');
        let has_gt = intermediates.contains(&b'>');
        let has_dollar = intermediates.contains(&b'$');
        let has_eq = intermediates.contains(&b'=');

        if action == 'p' && has_dollar {
            if is_private {
                self.report_dec_modes(&raw);
            } else {
                self.report_ansi_modes(&raw);
            }
            return;
        }
        if action == 'c' && has_gt {
            if param(&raw, 0, 0) == 0 {
                self.pending_responses.push(b"\x1b[>0;10;0c".to_vec());
            }
            return;
        }
        if action == 'c' && has_eq {
            self.pending_responses.push(b"\x1bP!|00000000\x1b\\".to_vec());
            return;
        }
        if action == 'q' && intermediates.contains(&b'"') {
            self.modes.protected_attribute = param(&raw, 0, 0) == 1;
            return;
        }
        if action == 'J' {
            self.erase_display(param(&raw, 0, 0), is_private);
            return;
        }
        if action == 'K' {
            self.erase_line(param(&raw, 0, 0), is_private);
            return;
        }
        if action == 'm' {
            let groups = grouped_params(params);
            self.handle_sgr(&groups);
            return;
        }

        match (action, is_private) {
            ('A', false) => self.cursor_up(param(&raw, 0, 1)),
            ('B', false) => self.cursor_down(param(&raw, 0, 1)),
            ('C', false) => self.cursor_forward(param(&raw, 0, 1)),
            ('D', false) => self.cursor_backward(param(&raw, 0, 1)),
            ('E', false) => {
                self.cursor.col = 0;
                self.cursor_down(param(&raw, 0, 1));
            }
            ('F', false) => {
                self.cursor.col = 0;
                self.cursor_up(param(&raw, 0, 1));
            }
            ('G', false) | ('`', false) => {
                self.cursor.col = (param(&raw, 0, 1) - 1).min(self.cols.saturating_sub(1));
            }
            ('H' | 'f', false) => {
                let row = param(&raw, 0, 1) - 1;
                if self.modes.origin {
                    self.cursor.row = (self.scroll_top + row).min(self.scroll_bottom);
                } else {
                    self.cursor.row = row.min(self.rows.saturating_sub(1));
                }
                self.cursor.col = (param(&raw, 1, 1) - 1).min(self.cols.saturating_sub(1));
            }
            ('L', false) => self.insert_lines(param(&raw, 0, 1)),
            ('M', false) => self.delete_lines(param(&raw, 0, 1)),
            ('P', false) => self.delete_chars(param(&raw, 0, 1)),
            ('S', false) => self.scroll_up_n(param(&raw, 0, 1)),
            ('T', false) => self.scroll_down_n(param(&raw, 0, 1)),
            ('X', false) => self.erase_chars(param(&raw, 0, 1)),
            ('@', false) => self.insert_chars(param(&raw, 0, 1)),
            ('g', false) => match param(&raw, 0, 0) {
                0 => {
                    let col = self.cursor.col as usize;
                    if col < self.tab_stops.len() {
                        self.tab_stops[col] = false;
                    }
                }
                3 => {
                    for t in self.tab_stops.iter_mut() {
                        *t = false;
                    }
                }
                _ => {}
            },
            ('d', false) => {
                let row = param(&raw, 0, 1) - 1;
                if self.modes.origin {
                    self.cursor.row = (self.scroll_top + row).min(self.scroll_bottom);
                } else {
                    self.cursor.row = row.min(self.rows.saturating_sub(1));
                }
            }
            ('m', false) => unreachable!("handled above"),
            ('r', false) => {
                let top = param(&raw, 0, 1).saturating_sub(1).min(self.rows.saturating_sub(1));
                let bottom = param(&raw, 1, self.rows)
                    .saturating_sub(1)
                    .min(self.rows.saturating_sub(1));
                if top < bottom {
                    self.scroll_top = top;
                    self.scroll_bottom = bottom;
                    self.cursor.row = if self.modes.origin { self.scroll_top } else { 0 };
                    self.cursor.col = 0;
                }
            }
            ('h', true) => self.set_dec_mode(&raw, true),
            ('l', true) => self.set_dec_mode(&raw, false),
            ('h', false) => self.set_mode(&raw, true),
            ('l', false) => self.set_mode(&raw, false),
            ('n', false) => match param(&raw, 0, 0) {
                5 => self.pending_responses.push(b"\x1b[0n".to_vec()),
                6 => {
                    let response = format!("\x1b[{};{}R", self.cursor.row + 1, self.cursor.col + 1);
                    self.pending_responses.push(response.into_bytes());
                }
                _ => {}
            },
            ('c', false)
                if param(&raw, 0, 0) == 0 => {
                    self.pending_responses.push(b"\x1b[?62;22c".to_vec());
                }
            ('s', false) => {
                if self.modes.left_right_margin_mode {
                    let left = param(&raw, 0, 1).saturating_sub(1);
                    let right = param(&raw, 1, self.cols).saturating_sub(1).min(self.cols.saturating_sub(1));
                    if left < right {
                        self.scroll_left = left;
                        self.scroll_right = right;
                    }
                } else {
                    self.save_cursor();
                }
            }
            ('u', false) => self.restore_cursor(),
            ('q', false) if intermediates.contains(&b' ') => match param(&raw, 0, 1) {
                0..=2 => self.cursor.shape = CursorShape::Block,
                3 | 4 => self.cursor.shape = CursorShape::Underline,
                5 | 6 => self.cursor.shape = CursorShape::Bar,
                _ => {}
            },
            ('b', false) => {
                let count = param(&raw, 0, 1) as usize;
                let c = self.last_printed_char;
                for _ in 0..count.min(2048) {
                    self.emit_char(c);
                }
            }
            _ => {
                tracing::debug!(?action, is_private, ?raw, "unhandled CSI sequence");
            }
        }
    }

    fn osc_dispatch(&mut self, params: &[&[u8]], _bell_terminated: bool) {
        self.flush_pending_print();
        self.handle_osc(params);
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], _ignore: bool, byte: u8) {
        self.flush_pending_print();
        match (byte, intermediates) {
            (b'c', []) => {
                let rows = self.rows;
                let cols = self.cols;
                let events = std::mem::take(&mut self.events);
                let triggers = std::mem::take(&mut self.triggers);
                let clipboard_allowed = self.clipboard_allowed;
                let normalization_form = self.normalization_form;
                *self = TerminalState::new(rows, cols);
                self.events = events;
                self.triggers = triggers;
                self.clipboard_allowed = clipboard_allowed;
                self.normalization_form = normalization_form;
            }
            (b'D', []) => self.linefeed(),
            (b'E', []) => {
                self.carriage_return();
                self.linefeed();
            }
            (b'H', []) => {
                let col = self.cursor.col as usize;
                if col < self.tab_stops.len() {
                    self.tab_stops[col] = true;
                }
            }
            (b'M', []) => self.reverse_index(),
            (b'7', []) => self.save_cursor(),
            (b'8', []) => self.restore_cursor(),
            (b'=', []) => self.modes.cursor_keys_application = true,
            (b'>', []) => self.modes.cursor_keys_application = false,
            (b'0', [b'(']) => self.charset_g0_drawing = true,
            (b'B', [b'(']) => self.charset_g0_drawing = false,
            _ => {
                tracing::debug!(byte = ?(byte as char), ?intermediates, "unhandled ESC sequence");
            }
        }
    }

    fn hook(&mut self, _params: &vte::Params, intermediates: &[u8], _ignore: bool, action: char) {
        self.flush_pending_print();
        self.dcs_buffer.clear();
        self.dcs_intermediates.clear();
        self.dcs_intermediates.extend_from_slice(intermediates);
        self.dcs_action = Some(action);
        self.dcs_overflowed = false;

        // DCS `q` with no intermediates is a Sixel payload intro (XTGETTCAP
        // uses `+`, DECRQSS uses `$` — both have intermediates).
        if action == 'q' && intermediates.is_empty() {
            self.sixel_active = true;
            self.sixel_buffer.clear();
        }
    }

    fn put(&mut self, byte: u8) {
        const CAP: usize = 16 * 1024 * 1024;
        if self.sixel_active {
            if self.sixel_buffer.len() < CAP {
                self.sixel_buffer.push(byte);
            } else if !self.dcs_overflowed {
                self.dcs_overflowed = true;
                self.parser_overflow_count += 1;
                tracing::warn!(cap = CAP, "sixel payload exceeded cap, dropping rest of payload");
                self.events.emit(Event::ParserOverflow { kind: "dcs".to_string() });
            }
            return;
        }
        if self.dcs_buffer.len() < CAP {
            self.dcs_buffer.push(byte);
        } else if !self.dcs_overflowed {
            self.dcs_overflowed = true;
            self.parser_overflow_count += 1;
            tracing::warn!(cap = CAP, action = ?self.dcs_action, "DCS payload exceeded cap, dropping rest of payload");
            self.events.emit(Event::ParserOverflow { kind: "dcs".to_string() });
        }
    }

    fn unhook(&mut self) {
        if self.sixel_active {
            self.sixel_active = false;
            let data = std::mem::take(&mut self.sixel_buffer);
            if !data.is_empty() && !self.dcs_overflowed {
                let abs_row = self.current_abs_row();
                let col = self.cursor.col;
                self.graphics.add(Protocol::Sixel, data, 0, 0, abs_row, col, Placement::default());
            }
            self.dcs_buffer.clear();
            self.dcs_intermediates.clear();
            self.dcs_action.take();
            return;
        }

        let data = std::mem::take(&mut self.dcs_buffer);
        let intermediates = std::mem::take(&mut self.dcs_intermediates);
        let action = self.dcs_action.take();
        if !self.dcs_overflowed {
            self.handle_dcs(action, &intermediates, &data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_bytes(state: &mut TerminalState, bytes: &[u8]) {
        let mut parser = vte::Parser::new();
        for &b in bytes {
            parser.advance(state, b);
        }
        state.end_of_chunk();
    }

    #[test]
    fn cup_moves_cursor() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[5;10H");
        assert_eq!(state.cursor.row, 4);
        assert_eq!(state.cursor.col, 9);
    }

    #[test]
    fn origin_mode_clamps_to_scroll_region() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[5;20r\x1b[?6h\x1b[1;1H");
        assert_eq!(state.cursor.row, 4);
    }

    #[test]
    fn dec_line_drawing_maps_q_to_horizontal_line() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b(0q\x1b(B");
        assert_eq!(state.grid.visible_row(0).cells[0].c, '─');
    }

    #[test]
    fn sgr_256_and_truecolor() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[38;5;196mX");
        assert_eq!(state.grid.visible_row(0).cells[0].fg, Color::Indexed(196));

        feed_bytes(&mut state, b"\x1b[38;2;10;20;30mX");
        assert_eq!(state.grid.visible_row(0).cells[1].fg, Color::Rgb(10, 20, 30));
    }

    #[test]
    fn sgr_colon_truecolor() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[38:2::10:20:30mX");
        assert_eq!(state.grid.visible_row(0).cells[0].fg, Color::Rgb(10, 20, 30));
    }

    #[test]
    fn cursor_save_restore() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[10;10H\x1b[31m\x1b7\x1b[1;1H\x1b[0m\x1b8");
        assert_eq!(state.cursor.row, 9);
        assert_eq!(state.cursor.col, 9);
        assert_eq!(state.cursor.fg, Color::Indexed(1));
    }

    #[test]
    fn alt_screen_round_trip_restores_cursor() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[6;11H\x1b[41m\x1b[?1049h");
        assert!(state.using_alt);
        feed_bytes(&mut state, b"X\x1b[?1049l");
        assert!(!state.using_alt);
        assert_eq!(state.cursor.row, 5);
        assert_eq!(state.cursor.col, 10);
        assert_eq!(state.cursor.bg, Color::Indexed(1));
    }

    #[test]
    fn scroll_region_movement() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[5;10r");
        assert_eq!(state.scroll_top, 4);
        assert_eq!(state.scroll_bottom, 9);
    }

    #[test]
    fn csi_rep_repeats_last_char() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"A\x1b[4b");
        let text = state.grid.visible_row(0).text();
        assert!(text.starts_with("AAAAA"));
    }

    #[test]
    fn grid_resize_preserves_cell_count() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"hello");
        state.resize(30, 100);
        assert_eq!(state.grid.cols, 100);
        assert_eq!(state.grid.visible_rows, 30);
    }

    #[test]
    fn scrollback_capture_on_scroll() {
        let mut state = TerminalState::new(3, 10);
        for _ in 0..5 {
            feed_bytes(&mut state, b"line\r\n");
        }
        assert!(state.grid.scrollback_len() > 0);
    }

    #[test]
    fn decrpm_reports_mode_state() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b[?25$p");
        let resp = state.take_pending_responses();
        assert_eq!(resp, b"\x1b[?25;1$y");
    }

    #[test]
    fn xtgettcap_responds_with_known_capability() {
        let mut state = TerminalState::new(24, 80);
        // "Co" hex-encoded is 436f
        feed_bytes(&mut state, b"\x1bP+q436f\x1b\\");
        let resp = state.take_pending_responses();
        assert!(resp.starts_with(b"\x1bP1+r"));
    }

    #[test]
    fn utf8_nfc_composition_single_cell() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, "e\u{0301}".as_bytes());
        assert_eq!(state.grid.visible_row(0).cells[0].c, '\u{00e9}');
        assert_eq!(state.cursor.col, 1);
    }

    #[test]
    fn zone_cycle_with_exit_code() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(
            &mut state,
            b"\x1b]133;A\x07$ \r\n\x1b]133;B\x07ls\r\n\x1b]133;C\x07file1\r\nfile2\r\n\x1b]133;D;0\x07",
        );
        let zones = state.zones.zones();
        assert_eq!(zones.len(), 3);
        assert_eq!(zones[2].exit_code, Some(0));
    }

    #[test]
    fn named_progress_bar_event() {
        let mut state = TerminalState::new(24, 80);
        feed_bytes(&mut state, b"\x1b]934;set;dl-1;percent=42;label=Downloading\x1b\\");
        let bar = state.progress.get("dl-1").unwrap();
        assert_eq!(bar.percent, Some(42));
        assert_eq!(bar.label.as_deref(), Some("Downloading"));
    }

    #[test]
    fn ris_clears_zones_but_keeps_observers() {
        let mut state = TerminalState::new(24, 80);
        state.events.add_observer(|_| {}, None);
        feed_bytes(&mut state, b"\x1b]133;A\x07\x1bc");
        assert_eq!(state.zones.zones().len(), 0);
        assert_eq!(state.events.observer_count(), 1);
    }
}
