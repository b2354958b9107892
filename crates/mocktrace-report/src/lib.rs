//! Event model and queryable report store for the mocktrace sandbox.
//!
//! Instrumented guest execution produces a stream of [`Event`] records; the
//! orchestrator appends them to a shared [`Report`], which callers inspect
//! with partial-record [`Query`] values.

pub mod event;
pub mod query;
pub mod report;
pub mod summary;

pub use event::{Event, EventKind, Literal, Location, Value};
pub use query::{LocationQuery, Query, ValuePattern};
pub use report::Report;
pub use summary::{is_dynamic_code_path, is_network_path, ReportSummary};
