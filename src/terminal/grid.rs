use std::collections::VecDeque;

use bitflags::bitflags;

use super::color::Color;
use super::cursor::{CellAttrs, UnderlineStyle};

bitflags! {
    /// Per-cell flags for wide character tracking and line wrapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct CellFlags: u8 {
        /// This cell holds a wide (2-column) character
        const WIDE_CHAR   = 1 << 0;
        /// This cell is the trailing spacer of a wide character
        const WIDE_SPACER = 1 << 1;
        /// Line wrapped at this position
        const WRAP        = 1 << 2;
        /// Cell is protected from DECSED/DECSEL while DECSCA is set
        const PROTECTED   = 1 << 3;
    }
}

/// A single terminal cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub c: char,
    pub fg: Color,
    pub bg: Color,
    pub attrs: CellAttrs,
    pub underline_style: UnderlineStyle,
    pub underline_color: Color,
    pub hyperlink_id: Option<u32>,
    pub flags: CellFlags,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            c: ' ',
            fg: Color::Default,
            bg: Color::Default,
            attrs: CellAttrs::empty(),
            underline_style: UnderlineStyle::None,
            underline_color: Color::Default,
            hyperlink_id: None,
            flags: CellFlags::empty(),
        }
    }
}

impl Cell {
    /// Create a spacer cell for the trailing half of a wide character.
    pub fn wide_spacer() -> Self {
        Self {
            c: ' ',
            flags: CellFlags::WIDE_SPACER,
            ..Default::default()
        }
    }

    /// Reset cell to default blank state.
    pub fn clear(&mut self) {
        *self = Cell::default();
    }

    /// Erase cell using the cursor's current background color (per ECMA-48),
    /// unless the cell is protected by DECSCA.
    pub fn erase(&mut self, bg: Color, respect_protection: bool) {
        if respect_protection && self.flags.contains(CellFlags::PROTECTED) {
            return;
        }
        self.c = ' ';
        self.fg = Color::Default;
        self.bg = bg;
        self.attrs = CellAttrs::empty();
        self.underline_style = UnderlineStyle::None;
        self.underline_color = Color::Default;
        self.hyperlink_id = None;
        self.flags = CellFlags::empty();
    }
}

/// A single row in the terminal grid.
#[derive(Debug, Clone)]
pub struct Row {
    pub cells: Vec<Cell>,
    /// Monotonic absolute row identifier, stable across scrollback eviction.
    pub abs_id: u64,
    /// True when the line ended by wrapping rather than an explicit newline.
    pub wrapped: bool,
}

impl Row {
    pub fn new(cols: u16, abs_id: u64) -> Self {
        Self {
            cells: vec![Cell::default(); cols as usize],
            abs_id,
            wrapped: false,
        }
    }

    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
        self.wrapped = false;
    }

    /// Erase all cells using the given background color (per ECMA-48).
    pub fn erase_with_bg(&mut self, bg: Color, respect_protection: bool) {
        for cell in &mut self.cells {
            cell.erase(bg, respect_protection);
        }
    }

    pub fn resize(&mut self, cols: u16) {
        let new_len = cols as usize;
        if self.cells.len() != new_len {
            self.cells.resize(new_len, Cell::default());
        }
    }

    /// Plain text content of the row, spacer cells collapsed.
    pub fn text(&self) -> String {
        self.cells
            .iter()
            .filter(|c| !c.flags.contains(CellFlags::WIDE_SPACER))
            .map(|c| c.c)
            .collect()
    }
}

/// The terminal grid holding visible rows and scrollback history.
pub struct Grid {
    /// All rows: scrollback + visible. The visible area is the last `visible_rows` entries.
    pub rows: VecDeque<Row>,
    pub cols: u16,
    pub visible_rows: u16,
    pub scrollback_limit: usize,
    next_abs_id: u64,
}

impl Grid {
    pub fn new(visible_rows: u16, cols: u16) -> Self {
        let mut grid = Self {
            rows: VecDeque::with_capacity(visible_rows as usize),
            cols,
            visible_rows,
            scrollback_limit: 10_000,
            next_abs_id: 0,
        };
        for _ in 0..visible_rows {
            grid.push_blank_row();
        }
        grid
    }

    fn push_blank_row(&mut self) {
        let id = self.next_abs_id;
        self.next_abs_id += 1;
        self.rows.push_back(Row::new(self.cols, id));
    }

    /// Get the offset where the visible area starts.
    fn visible_offset(&self) -> usize {
        self.rows.len().saturating_sub(self.visible_rows as usize)
    }

    /// Get a reference to a visible row by its screen-relative index (0 = top of screen).
    pub fn visible_row(&self, row: u16) -> &Row {
        let idx = self.visible_offset() + row as usize;
        &self.rows[idx]
    }

    /// Get a mutable reference to a visible row.
    pub fn visible_row_mut(&mut self, row: u16) -> &mut Row {
        let idx = self.visible_offset() + row as usize;
        &mut self.rows[idx]
    }

    /// Absolute row id of the row currently at visible index 0.
    pub fn visible_base_abs_id(&self) -> u64 {
        let idx = self.visible_offset();
        self.rows[idx].abs_id
    }

    /// Absolute row id of the last row ever evicted from scrollback (if any),
    /// i.e. the lowest abs_id no longer present in `rows`.
    pub fn oldest_retained_abs_id(&self) -> u64 {
        self.rows.front().map(|r| r.abs_id).unwrap_or(0)
    }

    /// Look up a row anywhere in scrollback/visible by absolute id.
    pub fn row_by_abs_id(&self, abs_id: u64) -> Option<&Row> {
        if self.rows.is_empty() {
            return None;
        }
        let base = self.rows.front().unwrap().abs_id;
        if abs_id < base {
            return None;
        }
        let idx = (abs_id - base) as usize;
        self.rows.get(idx)
    }

    /// Write a cell at the given screen-relative position.
    pub fn set_cell(&mut self, row: u16, col: u16, cell: Cell) {
        if col < self.cols && row < self.visible_rows {
            let r = self.visible_row_mut(row);
            r.cells[col as usize] = cell;
        }
    }

    /// Clear a cell to default at the given screen-relative position.
    pub fn clear_cell(&mut self, row: u16, col: u16) {
        if col < self.cols && row < self.visible_rows {
            let r = self.visible_row_mut(row);
            r.cells[col as usize].clear();
        }
    }

    /// Restamp abs_ids from `start_idx` to the end of the deque so they're
    /// contiguous and ascending again after a mid-deque insert/remove.
    /// Absolute IDs are meant to be stamped only on true scrollback entry; a
    /// region-internal scroll just recycles visible slots, so rather than
    /// minting a fresh (too-high) id from `next_abs_id` for the row that
    /// changed, every row from the edit point onward is renumbered to close
    /// the gap. `start_idx` is always within the visible window for our
    /// callers, so this touches at most `visible_rows` rows regardless of
    /// total scrollback depth.
    fn renumber_suffix(&mut self, start_idx: usize) {
        let base = if start_idx > 0 {
            self.rows[start_idx - 1].abs_id + 1
        } else {
            self.rows.front().map(|r| r.abs_id).unwrap_or(0)
        };
        for (offset, i) in (start_idx..self.rows.len()).enumerate() {
            self.rows[i].abs_id = base + offset as u64;
        }
        if let Some(max_id) = self.rows.back().map(|r| r.abs_id) {
            if max_id >= self.next_abs_id {
                self.next_abs_id = max_id + 1;
            }
        }
    }

    /// Scroll the region [top, bottom] up by one line.
    /// The top line moves into scrollback (if top == 0), and a blank line is
    /// inserted at bottom. Returns the abs_id of the row that was evicted from
    /// scrollback entirely (if the scrollback limit was exceeded), so callers
    /// (zone tracker, command history) can prune references to it.
    pub fn scroll_up(&mut self, top: u16, bottom: u16) -> Option<u64> {
        let offset = self.visible_offset();
        let top_idx = offset + top as usize;
        let bottom_idx = offset + bottom as usize;

        if top_idx > bottom_idx || bottom_idx >= self.rows.len() {
            return None;
        }

        let mut evicted = None;

        if top == 0 {
            let insert_idx = bottom_idx + 1;
            self.rows.insert(insert_idx, Row::new(self.cols, 0));
            self.renumber_suffix(insert_idx);

            while self.rows.len() > self.visible_rows as usize + self.scrollback_limit {
                if let Some(front) = self.rows.pop_front() {
                    evicted = Some(front.abs_id);
                }
            }
        } else {
            self.rows.remove(top_idx);
            self.rows.insert(bottom_idx, Row::new(self.cols, 0));
            self.renumber_suffix(top_idx);
        }

        evicted
    }

    /// Scroll the region [top, bottom] down by one line.
    /// The bottom line is discarded and a blank line is inserted at top.
    pub fn scroll_down(&mut self, top: u16, bottom: u16) {
        let offset = self.visible_offset();
        let top_idx = offset + top as usize;
        let bottom_idx = offset + bottom as usize;

        if top_idx > bottom_idx || bottom_idx >= self.rows.len() {
            return;
        }

        self.rows.remove(bottom_idx);
        self.rows.insert(top_idx, Row::new(self.cols, 0));
        self.renumber_suffix(top_idx);
    }

    /// Resize the grid to new dimensions. Existing content is preserved where possible.
    pub fn resize(&mut self, new_rows: u16, new_cols: u16) {
        for row in self.rows.iter_mut() {
            row.resize(new_cols);
        }

        let current_visible = self.visible_rows as usize;
        let new_visible = new_rows as usize;

        if new_visible > current_visible {
            let needed = new_visible - current_visible;
            for _ in 0..needed {
                self.push_blank_row();
            }
        }

        self.visible_rows = new_rows;
        self.cols = new_cols;
    }

    /// Resize for the alternate screen buffer. Alt-screen content is
    /// disposable: TUIs always repaint from scratch on resize.
    pub fn resize_no_scrollback(&mut self, new_rows: u16, new_cols: u16) {
        self.rows.clear();
        self.cols = new_cols;
        self.visible_rows = new_rows;
        for _ in 0..new_rows as usize {
            self.push_blank_row();
        }
    }

    /// OSC 1337 `ClearScrollback`: drop every row above the visible area.
    pub fn clear_scrollback(&mut self) {
        let drop = self.visible_offset();
        for _ in 0..drop {
            self.rows.pop_front();
        }
    }

    /// Get the total number of lines including scrollback.
    pub fn total_lines(&self) -> usize {
        self.rows.len()
    }

    /// Get the number of scrollback lines above the visible area.
    pub fn scrollback_len(&self) -> usize {
        self.visible_offset()
    }

    /// Erase cells in a row from start_col to end_col (exclusive),
    /// filling with the given background color (per ECMA-48).
    pub fn erase_cells(
        &mut self,
        row: u16,
        start_col: u16,
        end_col: u16,
        bg: Color,
        respect_protection: bool,
    ) {
        if row >= self.visible_rows {
            return;
        }
        let r = self.visible_row_mut(row);
        let start = start_col as usize;
        let end = (end_col as usize).min(r.cells.len());
        for i in start..end {
            r.cells[i].erase(bg, respect_protection);
        }
    }

    /// Insert blank cells at position, shifting existing cells right (up to `right_margin`).
    pub fn insert_cells(&mut self, row: u16, col: u16, count: u16, right_margin: u16) {
        if row >= self.visible_rows {
            return;
        }
        let r = self.visible_row_mut(row);
        let col = col as usize;
        let count = count as usize;
        let limit = (right_margin as usize + 1).min(r.cells.len());

        for _ in 0..count.min(limit.saturating_sub(col)) {
            if limit <= r.cells.len() && limit > 0 {
                r.cells.remove(limit - 1);
            }
            r.cells.insert(col.min(r.cells.len()), Cell::default());
        }
    }

    /// Delete cells at position, shifting remaining cells left (up to `right_margin`).
    pub fn delete_cells(&mut self, row: u16, col: u16, count: u16, right_margin: u16) {
        if row >= self.visible_rows {
            return;
        }
        let r = self.visible_row_mut(row);
        let col = col as usize;
        let count = count as usize;
        let limit = (right_margin as usize + 1).min(r.cells.len());

        let to_remove = count.min(limit.saturating_sub(col));
        for _ in 0..to_remove {
            if col < r.cells.len() {
                r.cells.remove(col);
                r.cells.insert(limit.saturating_sub(1).min(r.cells.len()), Cell::default());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(grid: &Grid) -> Vec<u64> {
        grid.rows.iter().map(|r| r.abs_id).collect()
    }

    fn ascending_by_position(grid: &Grid) -> bool {
        let all = ids(grid);
        all.windows(2).all(|w| w[0] < w[1])
    }

    #[test]
    fn scroll_up_in_narrow_region_keeps_ids_ascending() {
        let mut grid = Grid::new(10, 20);
        // Region rows [2, 6], rows 7-9 stay fixed below the margin.
        for _ in 0..5 {
            grid.scroll_up(2, 6);
        }
        assert!(ascending_by_position(&grid), "ids not ascending: {:?}", ids(&grid));
        for id in ids(&grid) {
            assert!(grid.row_by_abs_id(id).is_some());
        }
    }

    #[test]
    fn scroll_down_in_narrow_region_keeps_ids_ascending() {
        let mut grid = Grid::new(10, 20);
        for _ in 0..5 {
            grid.scroll_down(2, 6);
        }
        assert!(ascending_by_position(&grid), "ids not ascending: {:?}", ids(&grid));
        for id in ids(&grid) {
            assert!(grid.row_by_abs_id(id).is_some());
        }
    }

    #[test]
    fn row_by_abs_id_resolves_correct_row_after_mixed_region_scrolls() {
        let mut grid = Grid::new(10, 20);
        grid.scroll_up(0, 9);
        grid.scroll_down(2, 6);
        grid.scroll_up(3, 5);
        for (idx, row) in grid.rows.iter().enumerate() {
            let found = grid.row_by_abs_id(row.abs_id).expect("row resolves by id");
            assert_eq!(found.abs_id, row.abs_id);
            assert_eq!(idx as u64, row.abs_id - grid.rows.front().unwrap().abs_id);
        }
    }
}
