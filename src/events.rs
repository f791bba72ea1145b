use std::collections::HashMap;

use serde::Serialize;

/// The closed set of event kinds the core can emit (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Bell,
    TitleChanged,
    IconChanged,
    CwdChanged,
    RemoteHostTransition,
    EnvironmentChanged,
    UserVarChanged,
    ProgressBarChanged,
    ZoneOpened,
    ZoneClosed,
    ZoneScrolledOut,
    FileTransferStarted,
    FileTransferProgress,
    FileTransferCompleted,
    UploadRequested,
    ShellIntegration,
    Mouse,
    FocusChanged,
    Paste,
    ParserOverflow,
    Hyperlink,
    ClipboardRequest,
}

/// A semantic event produced by the interpreter. Internally a typed sum
/// type; only the JSON/query boundary flattens it to a string-keyed map.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Bell,
    TitleChanged { title: String },
    IconChanged { icon: String },
    CwdChanged { path: String },
    RemoteHostTransition {
        old_hostname: Option<String>,
        old_username: Option<String>,
        new_hostname: Option<String>,
        new_username: Option<String>,
    },
    EnvironmentChanged { key: String, value: String },
    UserVarChanged {
        key: String,
        value: String,
        old_value: Option<String>,
    },
    ProgressBarChanged {
        action: String,
        id: String,
        state: Option<String>,
        percent: Option<u8>,
        label: Option<String>,
    },
    ZoneOpened {
        zone_id: u64,
        kind: String,
        abs_row_start: u64,
    },
    ZoneClosed {
        zone_id: u64,
        kind: String,
        abs_row_start: u64,
        abs_row_end: u64,
        exit_code: Option<i32>,
    },
    ZoneScrolledOut { zone_id: u64, kind: String },
    FileTransferStarted {
        id: String,
        name: String,
        size: Option<u64>,
    },
    FileTransferProgress { id: String, bytes_received: u64 },
    FileTransferCompleted {
        id: String,
        status: String,
        bytes_received: u64,
    },
    UploadRequested { name: String },
    ShellIntegration { marker: String },
    Mouse {
        kind: String,
        button: u8,
        row: u16,
        col: u16,
    },
    FocusChanged { focused: bool },
    Paste { bytes: usize },
    ParserOverflow { kind: String },
    Hyperlink { id: Option<u32>, uri: Option<String> },
    ClipboardRequest { selection: char, data_base64: Option<String> },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Bell => EventKind::Bell,
            Event::TitleChanged { .. } => EventKind::TitleChanged,
            Event::IconChanged { .. } => EventKind::IconChanged,
            Event::CwdChanged { .. } => EventKind::CwdChanged,
            Event::RemoteHostTransition { .. } => EventKind::RemoteHostTransition,
            Event::EnvironmentChanged { .. } => EventKind::EnvironmentChanged,
            Event::UserVarChanged { .. } => EventKind::UserVarChanged,
            Event::ProgressBarChanged { .. } => EventKind::ProgressBarChanged,
            Event::ZoneOpened { .. } => EventKind::ZoneOpened,
            Event::ZoneClosed { .. } => EventKind::ZoneClosed,
            Event::ZoneScrolledOut { .. } => EventKind::ZoneScrolledOut,
            Event::FileTransferStarted { .. } => EventKind::FileTransferStarted,
            Event::FileTransferProgress { .. } => EventKind::FileTransferProgress,
            Event::FileTransferCompleted { .. } => EventKind::FileTransferCompleted,
            Event::UploadRequested { .. } => EventKind::UploadRequested,
            Event::ShellIntegration { .. } => EventKind::ShellIntegration,
            Event::Mouse { .. } => EventKind::Mouse,
            Event::FocusChanged { .. } => EventKind::FocusChanged,
            Event::Paste { .. } => EventKind::Paste,
            Event::ParserOverflow { .. } => EventKind::ParserOverflow,
            Event::Hyperlink { .. } => EventKind::Hyperlink,
            Event::ClipboardRequest { .. } => EventKind::ClipboardRequest,
        }
    }
}

type ObserverFn = Box<dyn FnMut(&Event) + Send>;

struct Observer {
    id: u64,
    kinds: Option<Vec<EventKind>>,
    callback: ObserverFn,
}

struct AsyncObserver {
    id: u64,
    kinds: Option<Vec<EventKind>>,
    sender: crossbeam_channel::Sender<Event>,
}

/// Collects events as they are produced and fans them out to pull queues,
/// synchronous observers, and async observer queues.
#[derive(Default)]
pub struct EventBus {
    pull_queue: Vec<Event>,
    subscription: Option<Vec<EventKind>>,
    subscribed_queue: Vec<Event>,
    observers: Vec<Observer>,
    async_observers: Vec<AsyncObserver>,
    next_observer_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn kind_matches(filter: &Option<Vec<EventKind>>, kind: EventKind) -> bool {
        match filter {
            None => true,
            Some(kinds) => kinds.contains(&kind),
        }
    }

    /// Record an event: pushes it to the pull queue/subscription queue and
    /// synchronously invokes matching observers. Called only from inside
    /// `process`, with the reentrancy guard already held by the caller.
    pub fn emit(&mut self, event: Event) {
        let kind = event.kind();

        if Self::kind_matches(&self.subscription, kind) {
            self.subscribed_queue.push(event.clone());
        }

        for observer in &mut self.observers {
            if Self::kind_matches(&observer.kinds, kind) {
                (observer.callback)(&event);
            }
        }

        self.async_observers.retain(|obs| {
            if Self::kind_matches(&obs.kinds, kind) {
                obs.sender.send(event.clone()).is_ok()
            } else {
                true
            }
        });

        self.pull_queue.push(event);
    }

    pub fn poll_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pull_queue)
    }

    pub fn set_event_subscription(&mut self, kinds: Vec<EventKind>) {
        self.subscription = Some(kinds);
        self.subscribed_queue.clear();
    }

    pub fn poll_subscribed_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.subscribed_queue)
    }

    pub fn add_observer(
        &mut self,
        callback: impl FnMut(&Event) + Send + 'static,
        kinds: Option<Vec<EventKind>>,
    ) -> u64 {
        let id = self.next_observer_id;
        self.next_observer_id += 1;
        self.observers.push(Observer {
            id,
            kinds,
            callback: Box::new(callback),
        });
        id
    }

    pub fn add_async_observer(
        &mut self,
        kinds: Option<Vec<EventKind>>,
    ) -> (u64, crossbeam_channel::Receiver<Event>) {
        let id = self.next_observer_id;
        self.next_observer_id += 1;
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.async_observers.push(AsyncObserver { id, kinds, sender });
        (id, receiver)
    }

    pub fn remove_observer(&mut self, id: u64) -> bool {
        let before = self.observers.len() + self.async_observers.len();
        self.observers.retain(|o| o.id != id);
        self.async_observers.retain(|o| o.id != id);
        (self.observers.len() + self.async_observers.len()) < before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len() + self.async_observers.len()
    }
}

/// Flattened string-keyed representation of an `Event`, for the JSON/host
/// boundary only (spec §9 DESIGN NOTES: internal sum type, boundary
/// conversion).
pub fn event_to_map(event: &Event) -> HashMap<String, serde_json::Value> {
    let value = serde_json::to_value(event).expect("Event serializes infallibly");
    match value {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    }
}
