use regex::Regex;

use crate::error::{Result, TerminalError};
use crate::events::{Event, EventBus};
use crate::uservars::SessionVariables;

/// Effect produced when a trigger's pattern matches a finalized row.
#[derive(Debug, Clone)]
pub enum TriggerAction {
    Highlight {
        fg: Option<(u8, u8, u8)>,
        bg: Option<(u8, u8, u8)>,
        duration_ms: Option<u64>,
    },
    Notify { title: String, message: String },
    MarkLine { label: String },
    SetVariable { name: String, value: String },
    RunCommand { command: String, args: Vec<String> },
    PlaySound { id: String, volume: Option<f32> },
    SendText { text: String, delay_ms: Option<u64> },
    Stop,
}

#[derive(Debug, Clone)]
pub struct Trigger {
    pub id: u64,
    pub name: String,
    pub pattern: String,
    pub actions: Vec<TriggerAction>,
    pub enabled: bool,
    regex: Regex,
}

/// A trigger match, ready to hand back via `poll_trigger_matches`.
#[derive(Debug, Clone)]
pub struct TriggerMatch {
    pub trigger_id: u64,
    pub row: u16,
    pub captures: Vec<Option<String>>,
}

/// A highlight overlay produced by a `Highlight` action.
#[derive(Debug, Clone)]
pub struct TriggerHighlight {
    pub row: u16,
    pub col_start: u16,
    pub col_end: u16,
    pub fg: Option<(u8, u8, u8)>,
    pub bg: Option<(u8, u8, u8)>,
    /// Monotonic expiry, if the action specified a duration. Expiry is
    /// measured against whatever clock the host supplies to `sweep_expired`;
    /// the core never reads the clock itself.
    pub expires_at_ms: Option<u64>,
}

fn substitute_captures(template: &str, captures: &regex::Captures) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            if let Some(&next) = chars.peek() {
                if next.is_ascii_digit() {
                    chars.next();
                    let idx = next.to_digit(10).unwrap() as usize;
                    if let Some(m) = captures.get(idx) {
                        out.push_str(m.as_str());
                    }
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Runs registered triggers against finalized rows and accumulates matches,
/// highlight overlays, and variable/send-text side effects.
#[derive(Default)]
pub struct TriggerEngine {
    triggers: Vec<Trigger>,
    next_id: u64,
    pending_matches: Vec<TriggerMatch>,
    highlights: Vec<TriggerHighlight>,
    pending_send_text: Vec<u8>,
}

impl TriggerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_trigger(
        &mut self,
        name: String,
        pattern: String,
        actions: Vec<TriggerAction>,
    ) -> Result<u64> {
        let regex = Regex::new(&pattern)
            .map_err(|e| TerminalError::InvalidArgument(format!("invalid regex: {e}")))?;
        let id = self.next_id;
        self.next_id += 1;
        self.triggers.push(Trigger {
            id,
            name,
            pattern,
            actions,
            enabled: true,
            regex,
        });
        Ok(id)
    }

    pub fn remove_trigger(&mut self, id: u64) -> bool {
        let before = self.triggers.len();
        self.triggers.retain(|t| t.id != id);
        self.triggers.len() < before
    }

    pub fn set_trigger_enabled(&mut self, id: u64, enabled: bool) -> bool {
        if let Some(t) = self.triggers.iter_mut().find(|t| t.id == id) {
            t.enabled = enabled;
            true
        } else {
            false
        }
    }

    pub fn get_trigger(&self, id: u64) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.id == id)
    }

    pub fn list_triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    /// Scan a single finalized row's plain text, applying matching triggers'
    /// actions in order. `row` is the on-screen row index for highlight
    /// overlays.
    pub fn scan_row(
        &mut self,
        row: u16,
        text: &str,
        now_ms: Option<u64>,
        vars: &mut SessionVariables,
        bus: &mut EventBus,
    ) {
        let triggers: Vec<(u64, Regex, Vec<TriggerAction>)> = self
            .triggers
            .iter()
            .filter(|t| t.enabled)
            .map(|t| (t.id, t.regex.clone(), t.actions.clone()))
            .collect();

        for (trigger_id, regex, actions) in triggers {
            let Some(caps) = regex.captures(text) else {
                continue;
            };

            let captures: Vec<Option<String>> = (0..caps.len())
                .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
                .collect();
            let (col_start, col_end) = caps
                .get(0)
                .map(|m| (m.start() as u16, m.end() as u16))
                .unwrap_or((0, 0));

            self.pending_matches.push(TriggerMatch {
                trigger_id,
                row,
                captures: captures.clone(),
            });

            for action in &actions {
                match action {
                    TriggerAction::Highlight { fg, bg, duration_ms } => {
                        self.highlights.push(TriggerHighlight {
                            row,
                            col_start,
                            col_end,
                            fg: *fg,
                            bg: *bg,
                            expires_at_ms: duration_ms
                                .zip(now_ms)
                                .map(|(dur, now)| now + dur),
                        });
                    }
                    TriggerAction::Notify { title, message } => {
                        bus.emit(Event::ShellIntegration {
                            marker: format!(
                                "trigger_notify:{}:{}",
                                substitute_captures(title, &caps),
                                substitute_captures(message, &caps)
                            ),
                        });
                    }
                    TriggerAction::MarkLine { label } => {
                        bus.emit(Event::ShellIntegration {
                            marker: format!("trigger_mark:{}:{}", row, substitute_captures(label, &caps)),
                        });
                    }
                    TriggerAction::SetVariable { name, value } => {
                        let value = substitute_captures(value, &caps);
                        vars.set(name.clone(), value, bus);
                    }
                    TriggerAction::RunCommand { command, args } => {
                        bus.emit(Event::ShellIntegration {
                            marker: format!("trigger_run:{command}:{}", args.join(" ")),
                        });
                    }
                    TriggerAction::PlaySound { id, .. } => {
                        bus.emit(Event::ShellIntegration {
                            marker: format!("trigger_sound:{id}"),
                        });
                    }
                    TriggerAction::SendText { text, .. } => {
                        self.pending_send_text
                            .extend(substitute_captures(text, &caps).into_bytes());
                    }
                    TriggerAction::Stop => break,
                }
            }
        }
    }

    pub fn poll_trigger_matches(&mut self) -> Vec<TriggerMatch> {
        std::mem::take(&mut self.pending_matches)
    }

    pub fn get_trigger_highlights(&self) -> &[TriggerHighlight] {
        &self.highlights
    }

    pub fn clear_trigger_highlights(&mut self) {
        self.highlights.clear();
    }

    /// Drop highlights whose duration has expired relative to a host-supplied clock.
    pub fn sweep_expired(&mut self, now_ms: u64) {
        self.highlights
            .retain(|h| h.expires_at_ms.is_none_or(|e| e > now_ms));
    }

    pub fn take_send_text(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending_send_text)
    }
}
