use crate::events::{Event, EventBus};

/// Kind of a semantic zone, derived from OSC-133 shell-integration markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneKind {
    Prompt,
    Command,
    Output,
}

impl ZoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneKind::Prompt => "prompt",
            ZoneKind::Command => "command",
            ZoneKind::Output => "output",
        }
    }
}

/// A semantic region of the scrollback/screen tagged by shell integration.
#[derive(Debug, Clone)]
pub struct Zone {
    pub id: u64,
    pub kind: ZoneKind,
    pub abs_row_start: u64,
    /// `None` while the zone is still open.
    pub abs_row_end: Option<u64>,
    pub command: Option<String>,
    pub exit_code: Option<i32>,
}

impl Zone {
    pub fn is_open(&self) -> bool {
        self.abs_row_end.is_none()
    }
}

/// Drives the zone open/close state machine from OSC-133 A/B/C/D markers
/// and keeps the zone list pruned as scrollback rows are evicted.
#[derive(Default)]
pub struct ZoneTracker {
    zones: Vec<Zone>,
    current: Option<usize>,
    next_zone_id: u64,
    suspended: bool,
}

impl ZoneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    fn close_current(&mut self, abs_row_end: u64, exit_code: Option<i32>, bus: &mut EventBus) {
        if let Some(idx) = self.current.take() {
            let zone = &mut self.zones[idx];
            zone.abs_row_end = Some(abs_row_end);
            zone.exit_code = exit_code;
            bus.emit(Event::ZoneClosed {
                zone_id: zone.id,
                kind: zone.kind.as_str().to_string(),
                abs_row_start: zone.abs_row_start,
                abs_row_end,
                exit_code,
            });
        }
    }

    fn open(&mut self, kind: ZoneKind, abs_row_start: u64, bus: &mut EventBus) {
        let id = self.next_zone_id;
        self.next_zone_id += 1;
        self.zones.push(Zone {
            id,
            kind,
            abs_row_start,
            abs_row_end: None,
            command: None,
            exit_code: None,
        });
        self.current = Some(self.zones.len() - 1);
        bus.emit(Event::ZoneOpened {
            zone_id: id,
            kind: kind.as_str().to_string(),
            abs_row_start,
        });
    }

    /// OSC 133;A — prompt start.
    pub fn prompt_start(&mut self, abs_row: u64, bus: &mut EventBus) {
        if self.suspended {
            return;
        }
        self.close_current(abs_row, None, bus);
        self.open(ZoneKind::Prompt, abs_row, bus);
    }

    /// OSC 133;B — command start (end of the prompt, the user's typed
    /// command follows on the same or later rows).
    pub fn command_start(&mut self, abs_row: u64, bus: &mut EventBus) {
        if self.suspended {
            return;
        }
        self.close_current(abs_row, None, bus);
        self.open(ZoneKind::Command, abs_row, bus);
    }

    /// OSC 133;C — output start.
    pub fn output_start(&mut self, abs_row: u64, bus: &mut EventBus) {
        if self.suspended {
            return;
        }
        self.close_current(abs_row, None, bus);
        self.open(ZoneKind::Output, abs_row, bus);
    }

    /// OSC 133;D[;exit_code] — command finished.
    pub fn command_end(&mut self, abs_row: u64, exit_code: Option<i32>, bus: &mut EventBus) {
        if self.suspended {
            return;
        }
        self.close_current(abs_row, exit_code, bus);
    }

    /// Attach the command string recognized for the currently-open (or most
    /// recently opened) command zone.
    pub fn set_current_command(&mut self, command: String) {
        if let Some(idx) = self.current {
            if self.zones[idx].kind == ZoneKind::Command {
                self.zones[idx].command = Some(command);
            }
        }
    }

    /// Prune zones whose entire extent fell below `oldest_retained_abs_id`,
    /// clamping the start of zones that straddle the eviction boundary.
    pub fn prune_evicted(&mut self, oldest_retained_abs_id: u64, bus: &mut EventBus) {
        let mut i = 0;
        while i < self.zones.len() {
            let fully_evicted = match self.zones[i].abs_row_end {
                Some(end) => end < oldest_retained_abs_id,
                None => false,
            };
            if fully_evicted {
                let zone = self.zones.remove(i);
                bus.emit(Event::ZoneScrolledOut {
                    zone_id: zone.id,
                    kind: zone.kind.as_str().to_string(),
                });
                if self.current == Some(i) {
                    self.current = None;
                } else if let Some(cur) = self.current {
                    if cur > i {
                        self.current = Some(cur - 1);
                    }
                }
                continue;
            }
            if self.zones[i].abs_row_start < oldest_retained_abs_id {
                self.zones[i].abs_row_start = oldest_retained_abs_id;
            }
            i += 1;
        }
    }

    /// RIS (full reset): all open zones are dropped without emitting
    /// ZoneClosed (the screen itself is being wiped).
    pub fn reset(&mut self) {
        self.zones.clear();
        self.current = None;
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn zone_at(&self, abs_row: u64) -> Option<&Zone> {
        self.zones.iter().find(|z| {
            z.abs_row_start <= abs_row && z.abs_row_end.is_none_or(|end| abs_row <= end)
        })
    }
}
