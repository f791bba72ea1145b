use crate::events::{Event, EventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    Normal,
    Indeterminate,
    Warning,
    Error,
}

impl ProgressState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressState::Normal => "normal",
            ProgressState::Indeterminate => "indeterminate",
            ProgressState::Warning => "warning",
            ProgressState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(ProgressState::Normal),
            "indeterminate" => Some(ProgressState::Indeterminate),
            "warning" => Some(ProgressState::Warning),
            "error" => Some(ProgressState::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NamedProgressBar {
    pub id: String,
    pub state: ProgressState,
    pub percent: Option<u8>,
    pub label: Option<String>,
}

/// OSC 934 named progress bars (insertion-ordered) plus the legacy OSC 9;4
/// single-value bar, tracked independently.
#[derive(Default)]
pub struct ProgressBars {
    bars: Vec<NamedProgressBar>,
    pub legacy_active: bool,
    pub legacy_state: Option<ProgressState>,
    pub legacy_percent: Option<u8>,
}

impl ProgressBars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &mut self,
        id: String,
        state: ProgressState,
        percent: Option<u8>,
        label: Option<String>,
        bus: &mut EventBus,
    ) {
        if let Some(existing) = self.bars.iter_mut().find(|b| b.id == id) {
            existing.state = state;
            existing.percent = percent;
            existing.label = label.clone();
        } else {
            self.bars.push(NamedProgressBar {
                id: id.clone(),
                state,
                percent,
                label: label.clone(),
            });
        }
        bus.emit(Event::ProgressBarChanged {
            action: "set".to_string(),
            id,
            state: Some(state.as_str().to_string()),
            percent,
            label,
        });
    }

    pub fn remove(&mut self, id: &str, bus: &mut EventBus) -> bool {
        let before = self.bars.len();
        self.bars.retain(|b| b.id != id);
        let removed = self.bars.len() < before;
        if removed {
            bus.emit(Event::ProgressBarChanged {
                action: "remove".to_string(),
                id: id.to_string(),
                state: None,
                percent: None,
                label: None,
            });
        }
        removed
    }

    pub fn remove_all(&mut self, bus: &mut EventBus) {
        self.bars.clear();
        bus.emit(Event::ProgressBarChanged {
            action: "remove_all".to_string(),
            id: String::new(),
            state: None,
            percent: None,
            label: None,
        });
    }

    pub fn get(&self, id: &str) -> Option<&NamedProgressBar> {
        self.bars.iter().find(|b| b.id == id)
    }

    pub fn all(&self) -> &[NamedProgressBar] {
        &self.bars
    }

    /// Legacy OSC 9;4 single-value bar: `state;percent`.
    pub fn set_legacy(&mut self, state: ProgressState, percent: Option<u8>) {
        self.legacy_active = true;
        self.legacy_state = Some(state);
        self.legacy_percent = percent;
    }

    pub fn clear_legacy(&mut self) {
        self.legacy_active = false;
        self.legacy_state = None;
        self.legacy_percent = None;
    }
}
