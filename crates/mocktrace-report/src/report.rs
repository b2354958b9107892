use std::sync::Mutex;

use crate::event::Event;
use crate::query::Query;

/// Append-only event log shared between the host orchestrator and the
/// engine worker. Events are immutable once appended; readers get clones.
///
/// All queries are linear scans in insertion order. The log is deliberately
/// unindexed: reports from a single run are small enough that research
/// queries never justified an index.
#[derive(Debug, Default)]
pub struct Report {
    events: Mutex<Vec<Event>>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, event: Event) {
        self.events.lock().expect("report lock poisoned").push(event);
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("report lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_all(&self) -> Vec<Event> {
        self.events.lock().expect("report lock poisoned").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("report lock poisoned").clear();
    }

    /// Every match, in insertion order.
    pub fn find_all(&self, query: &Query) -> Vec<Event> {
        self.events
            .lock()
            .expect("report lock poisoned")
            .iter()
            .filter(|event| query.matches(event))
            .cloned()
            .collect()
    }

    /// The first match, if any.
    pub fn find(&self, query: &Query) -> Option<Event> {
        self.events
            .lock()
            .expect("report lock poisoned")
            .iter()
            .find(|event| query.matches(event))
            .cloned()
    }

    pub fn has(&self, query: &Query) -> bool {
        self.find(query).is_some()
    }

    /// JSON export of the whole log, using the public event payload field
    /// names.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let events = self.get_all();
        serde_json::to_string(&events)
    }
}
