//! The orchestrator: isolate lifecycle, hook API, evaluation, watchdog and
//! stats. One instance owns one isolate (created lazily, recreated after
//! disposal), the hook table, the shared report and the value-id counter.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use url::Url;

use mocktrace_report::Report;

use crate::engine::{EngineConfig, EngineHandle, RunRequest, RunStatsDelta};
use crate::error::SandboxError;
use crate::hooks::{HookRegistry, HookValue};
use crate::source::{ResolvedSource, SharedResolver};

/// Hard-timeout watchdog slack on top of the engine-enforced soft timeout.
const WATCHDOG_GRACE: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceType {
    #[default]
    Script,
    Module,
}

#[derive(Debug, Clone)]
pub struct SandboxOptions {
    pub source_type: SourceType,
    /// Base URL entry specifiers resolve against.
    pub origin: String,
    pub max_memory_mib: usize,
    pub timeout: Duration,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            source_type: SourceType::Script,
            origin: "file:///".to_string(),
            max_memory_mib: 64,
            timeout: Duration::from_millis(10_000),
        }
    }
}

/// Per-call overrides for [`Sandbox::run_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub timeout: Option<Duration>,
    pub source_type: Option<SourceType>,
}

/// Cumulative gauges for the current isolate. Merged only when a run
/// completes cleanly — a run killed by the watchdog or the memory limit
/// leaves the previous numbers untouched — and zeroed on dispose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SandboxStats {
    pub runs: u64,
    pub eval_ms: u128,
    pub wall_ms: u128,
    pub memory_used_bytes: i64,
    pub malloc_bytes: i64,
}

impl SandboxStats {
    fn merge(&mut self, delta: RunStatsDelta) {
        self.runs += 1;
        self.eval_ms += delta.eval_ms;
        self.wall_ms += delta.wall_ms;
        self.memory_used_bytes = delta.memory_used_bytes;
        self.malloc_bytes = delta.malloc_bytes;
    }
}

pub struct Sandbox {
    options: SandboxOptions,
    origin: Url,
    hooks: HookRegistry,
    resolver: Option<SharedResolver>,
    engine: Option<EngineHandle>,
    report: Arc<Report>,
    next_value_id: Arc<AtomicU64>,
    stats: SandboxStats,
}

impl Sandbox {
    /// Create an instance with the default hook set installed. No isolate
    /// exists until the first `run`.
    pub fn new(options: SandboxOptions) -> Result<Self, SandboxError> {
        let origin = Url::parse(&options.origin).map_err(|err| {
            SandboxError::InvalidValue(format!("origin {:?}: {err}", options.origin))
        })?;
        Ok(Self {
            options,
            origin,
            hooks: HookRegistry::with_defaults(),
            resolver: None,
            engine: None,
            report: Arc::new(Report::new()),
            next_value_id: Arc::new(AtomicU64::new(1)),
            stats: SandboxStats::default(),
        })
    }

    pub fn with_defaults() -> Result<Self, SandboxError> {
        Self::new(SandboxOptions::default())
    }

    /// Register the `URL -> source` lookup used by the module loader.
    pub fn set_resolver<F>(&mut self, resolver: F)
    where
        F: Fn(&Url) -> anyhow::Result<Option<ResolvedSource>> + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
    }

    /// Install a writable hook at `path`, replacing any prior hook there.
    pub fn hook(&mut self, path: &str, value: HookValue) -> Result<(), SandboxError> {
        self.hooks.insert(path, value, true)
    }

    pub fn hook_with(
        &mut self,
        path: &str,
        value: HookValue,
        writable: bool,
    ) -> Result<(), SandboxError> {
        self.hooks.insert(path, value, writable)
    }

    pub fn unhook(&mut self, path: &str) -> bool {
        self.hooks.remove(path)
    }

    /// Single-shot evaluation of `specifier` under the instance options.
    pub fn run(&mut self, specifier: &str) -> Result<(), SandboxError> {
        self.run_with(specifier, None, RunOptions::default())
    }

    /// Evaluate explicit source text registered under `specifier`'s URL.
    pub fn run_source(&mut self, specifier: &str, source: &str) -> Result<(), SandboxError> {
        self.run_with(specifier, Some(source), RunOptions::default())
    }

    pub fn run_with(
        &mut self,
        specifier: &str,
        source: Option<&str>,
        options: RunOptions,
    ) -> Result<(), SandboxError> {
        let timeout = options.timeout.unwrap_or(self.options.timeout);
        let source_type = options.source_type.unwrap_or(self.options.source_type);
        let timeout_ms = timeout.as_millis() as u64;

        let (hooks_json, callables) = self.hooks.wire();
        let active = Arc::new(AtomicBool::new(true));
        let (reply_tx, reply_rx) = mpsc::channel();
        let request = RunRequest {
            specifier: specifier.to_string(),
            source_override: source.map(str::to_string),
            source_type,
            timeout,
            hooks_json,
            callables,
            resolver: self.resolver.clone(),
            report: Arc::clone(&self.report),
            next_value_id: Arc::clone(&self.next_value_id),
            active: Arc::clone(&active),
            reply: reply_tx,
        };

        self.submit(request)?;

        match reply_rx.recv_timeout(timeout + WATCHDOG_GRACE) {
            Ok(reply) => match reply.result {
                Ok(()) => {
                    self.stats.merge(reply.stats);
                    Ok(())
                }
                Err(err) => {
                    if matches!(err, SandboxError::MemoryLimit { .. }) {
                        // Engine-driven disposal; the report and id counter
                        // survive, the next run gets a fresh isolate.
                        self.engine = None;
                    }
                    Err(err)
                }
            },
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // Soft timeout failed to stop the guest; abandon the worker
                // and drop the isolate, keeping the report.
                active.store(false, Ordering::Relaxed);
                tracing::debug!(
                    target: "mocktrace::sandbox",
                    timeout_ms,
                    "watchdog fired; isolate disposed during execution"
                );
                self.engine = None;
                Err(SandboxError::Timeout { timeout_ms })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                self.engine = None;
                Err(SandboxError::execution("isolate worker terminated unexpectedly"))
            }
        }
    }

    fn submit(&mut self, request: RunRequest) -> Result<(), SandboxError> {
        if self.engine.is_none() {
            self.engine = Some(self.spawn_engine()?);
        }
        let engine = self.engine.as_ref().expect("engine just ensured");
        match engine.submit(request) {
            Ok(()) => Ok(()),
            Err(request) => {
                // The previous worker is gone (e.g. watchdog abandon that
                // raced a clean exit); recreate the isolate once.
                let engine = self.spawn_engine()?;
                let outcome = engine
                    .submit(request)
                    .map_err(|_| SandboxError::execution("isolate worker failed to start"));
                self.engine = Some(engine);
                outcome
            }
        }
    }

    fn spawn_engine(&self) -> Result<EngineHandle, SandboxError> {
        EngineHandle::spawn(EngineConfig {
            origin: self.origin.clone(),
            max_memory_mib: self.options.max_memory_mib,
        })
    }

    /// The shared event log. Clients may `clear` it; events themselves are
    /// immutable.
    pub fn report(&self) -> Arc<Report> {
        Arc::clone(&self.report)
    }

    pub fn stats(&self) -> SandboxStats {
        self.stats
    }

    /// Destroy the isolate and module cache, reset stats and the value-id
    /// generator, and optionally clear the report. The instance stays
    /// usable; the next `run` builds a fresh isolate.
    pub fn dispose(&mut self, clear_report: bool) {
        self.engine = None;
        self.next_value_id.store(1, Ordering::Relaxed);
        self.stats = SandboxStats::default();
        if clear_report {
            self.report.clear();
        }
    }
}
