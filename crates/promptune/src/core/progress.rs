use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Compile phases, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validate,
    Mine,
    Instruct,
    Optimize,
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Validate => "validate",
            Phase::Mine => "mine",
            Phase::Instruct => "instruct",
            Phase::Optimize => "optimize",
            Phase::Done => "done",
        }
    }
}

/// Snapshot handed to the progress callback at phase transitions and at each
/// optimizer iteration.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub completed: usize,
    pub total: usize,
    pub score: Option<f32>,
    pub correlation_id: String,
}

/// Non-blocking progress notification. Implementations must not block the
/// compile; buffer or drop if the consumer is slow.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

pub(crate) fn emit_progress(callback: &Option<ProgressCallback>, event: ProgressEvent) {
    if let Some(callback) = callback {
        callback(event);
    }
}

/// A telemetry event the core may emit zero or more times per phase.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: &'static str,
    pub measurements: BTreeMap<&'static str, f64>,
    pub metadata: BTreeMap<&'static str, String>,
}

impl Event {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            measurements: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn measure(mut self, key: &'static str, value: f64) -> Self {
        self.measurements.insert(key, value);
        self
    }

    pub fn tag(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.metadata.insert(key, value.into());
        self
    }
}

/// Narrow telemetry collaborator. The default sink drops everything; test
/// suites attach a capturing implementation.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: Event);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&self, _event: Event) {}
}

/// Records every event; intended for tests.
#[derive(Default)]
pub struct CapturingSink {
    events: Mutex<Vec<Event>>,
}

impl CapturingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("event sink poisoned").clone()
    }
}

impl EventSink for CapturingSink {
    fn on_event(&self, event: Event) {
        self.events.lock().expect("event sink poisoned").push(event);
    }
}
