//! Instrumented JavaScript execution sandbox for security research.
//!
//! Untrusted, browser-oriented JavaScript runs inside an isolated QuickJS
//! runtime whose `globalThis` is hijacked by an injected bootstrap: every
//! global the code touches — hooked, intrinsic, or never seen before — is a
//! recursively self-generating proxy mock. Each property get, set, call and
//! construction is recorded as a structured event with a stable value
//! identity and the closest user source location, so the program's runtime
//! API surface can be inspected without an instrumented browser.
//!
//! ```no_run
//! use mocktrace_sandbox::{Sandbox, Query};
//!
//! let mut sandbox = Sandbox::with_defaults()?;
//! sandbox.run_source("./index.js", "alert('hello')")?;
//! let report = sandbox.report();
//! assert!(report.has(&Query::path("alert")));
//! # Ok::<(), mocktrace_sandbox::SandboxError>(())
//! ```

pub mod bootstrap;
mod engine;
pub mod error;
pub mod hooks;
pub mod path;
pub mod sandbox;
pub mod source;

pub use error::SandboxError;
pub use hooks::{HookEntry, HookRegistry, HookValue, HostCallable};
pub use sandbox::{RunOptions, Sandbox, SandboxOptions, SandboxStats, SourceType};
pub use source::{ResolvedSource, SharedResolver};

pub use mocktrace_report::{
    Event, EventKind, Literal, Location, LocationQuery, Query, Report, ReportSummary, Value,
    ValuePattern,
};
