//! Aggregate view of a report for triage: counts, per-path tallies and the
//! call groups analysts reach for first (network-capable APIs and dynamic
//! code execution).

use std::collections::{BTreeMap, BTreeSet};

use crate::event::{Event, EventKind};
use crate::report::Report;

const NETWORK_CALLS: &[&str] = &[
    "fetch",
    "XMLHttpRequest",
    "XMLHttpRequest().open",
    "XMLHttpRequest().send",
    "navigator.sendBeacon",
    "WebSocket",
    "WebSocket().send",
    "RTCDataChannel",
    "RTCPeerConnection",
    "EventSource",
    "importScripts",
];

const DYNAMIC_CODE_CALLS: &[&str] = &["eval", "Function", "setTimeout", "setInterval", "execScript"];

fn last_segment(path: &str) -> &str {
    let tail = path.rsplit('.').next().unwrap_or(path);
    tail.strip_suffix("()").unwrap_or(tail)
}

/// Whether a call path names a network-capable API.
pub fn is_network_path(path: &str) -> bool {
    NETWORK_CALLS.iter().any(|known| {
        path == *known || last_segment(path) == *known || path.starts_with(&format!("{known}."))
    })
}

/// Whether a call path names a dynamic-code sink.
pub fn is_dynamic_code_path(path: &str) -> bool {
    DYNAMIC_CODE_CALLS.iter().any(|known| path == *known || last_segment(path) == *known)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub event_count: usize,
    pub get_count: usize,
    pub set_count: usize,
    pub call_count: usize,
    pub construct_count: usize,
    pub unique_paths: usize,
    pub unique_call_paths: usize,
    pub call_counts_by_path: BTreeMap<String, usize>,
    /// Call paths that hit network-capable APIs, deduplicated, in order of
    /// first observation.
    pub network_calls: Vec<String>,
    /// Call paths that execute dynamically-produced code.
    pub dynamic_code_calls: Vec<String>,
}

impl ReportSummary {
    pub fn from_report(report: &Report) -> Self {
        Self::from_events(&report.get_all())
    }

    pub fn from_events(events: &[Event]) -> Self {
        let mut summary = ReportSummary { event_count: events.len(), ..Default::default() };
        let mut paths = BTreeSet::new();
        let mut network_seen = BTreeSet::new();
        let mut dynamic_seen = BTreeSet::new();
        for event in events {
            paths.insert(event.path().to_string());
            match event.kind() {
                EventKind::Get => summary.get_count += 1,
                EventKind::Set => summary.set_count += 1,
                EventKind::Call => {
                    summary.call_count += 1;
                    if event.is_constructor() == Some(true) {
                        summary.construct_count += 1;
                    }
                    let path = event.path();
                    *summary.call_counts_by_path.entry(path.to_string()).or_insert(0) += 1;
                    if is_network_path(path) && network_seen.insert(path.to_string()) {
                        summary.network_calls.push(path.to_string());
                    }
                    if is_dynamic_code_path(path) && dynamic_seen.insert(path.to_string()) {
                        summary.dynamic_code_calls.push(path.to_string());
                    }
                }
            }
        }
        summary.unique_paths = paths.len();
        summary.unique_call_paths = summary.call_counts_by_path.len();
        summary
    }

    /// True when the traced program showed any network intent.
    pub fn has_network_intent(&self) -> bool {
        !self.network_calls.is_empty()
    }

    pub fn has_dynamic_code(&self) -> bool {
        !self.dynamic_code_calls.is_empty()
    }
}
