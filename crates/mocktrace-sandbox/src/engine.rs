//! The engine worker: one dedicated thread per sandbox instance owning the
//! QuickJS runtime (the isolate), its module loader state and the interrupt
//! deadline. The host talks to it over channels; abandoning the channel is
//! how the watchdog disposes a wedged isolate.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rquickjs::loader::{Loader, Resolver};
use rquickjs::module::{Declared, Module};
use rquickjs::{
    Array, Context, Ctx, Error as JsError, Exception, Function, IntoJs, Promise, Runtime,
    Value as JsValue,
};
use url::Url;

use mocktrace_report::{Event, Report};

use crate::bootstrap::BOOTSTRAP_SOURCE;
use crate::error::SandboxError;
use crate::hooks::HostCallable;
use crate::sandbox::SourceType;
use crate::source::{SharedResolver, SourceCache};

const ENGINE_STACK_BYTES: usize = 512 * 1024;
const STALL_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub(crate) struct EngineConfig {
    pub origin: Url,
    pub max_memory_mib: usize,
}

/// One `run` handed to the worker.
pub(crate) struct RunRequest {
    pub specifier: String,
    pub source_override: Option<String>,
    pub source_type: SourceType,
    pub timeout: Duration,
    pub hooks_json: String,
    pub callables: Vec<HostCallable>,
    pub resolver: Option<SharedResolver>,
    pub report: Arc<Report>,
    pub next_value_id: Arc<AtomicU64>,
    /// Flipped off by the watchdog so a zombie evaluation cannot keep
    /// appending events after the host has moved on.
    pub active: Arc<AtomicBool>,
    pub reply: mpsc::Sender<RunReply>,
}

pub(crate) struct RunReply {
    pub result: Result<(), SandboxError>,
    pub stats: RunStatsDelta,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RunStatsDelta {
    pub eval_ms: u128,
    pub wall_ms: u128,
    pub memory_used_bytes: i64,
    pub malloc_bytes: i64,
}

/// Host-side handle. Dropping it closes the job channel; the worker exits
/// after its current job, which is also the abandon path the watchdog uses.
pub(crate) struct EngineHandle {
    jobs: mpsc::Sender<RunRequest>,
    _thread: JoinHandle<()>,
}

impl EngineHandle {
    pub fn spawn(config: EngineConfig) -> Result<Self, SandboxError> {
        let (jobs_tx, jobs_rx) = mpsc::channel::<RunRequest>();
        let thread = thread::Builder::new()
            .name("mocktrace-isolate".to_string())
            .spawn(move || worker_main(config, jobs_rx))
            .map_err(|err| {
                SandboxError::execution(format!("failed to spawn isolate thread: {err}"))
            })?;
        Ok(Self { jobs: jobs_tx, _thread: thread })
    }

    /// Hands the request back if the worker is already gone so the caller
    /// can respawn and retry.
    pub fn submit(&self, request: RunRequest) -> Result<(), RunRequest> {
        self.jobs.send(request).map_err(|mpsc::SendError(request)| request)
    }
}

struct LoaderState {
    cache: SourceCache,
    origin: Url,
    /// First typed failure observed while resolving or loading; wins over
    /// whatever the engine wraps it into.
    error: Option<SandboxError>,
}

struct ModuleResolver {
    state: Rc<RefCell<LoaderState>>,
}

impl Resolver for ModuleResolver {
    fn resolve(&mut self, _ctx: &Ctx<'_>, base: &str, name: &str) -> rquickjs::Result<String> {
        let mut state = self.state.borrow_mut();
        // Imports triggered from evaluated (non-module) code carry the eval
        // pseudo-filename as base; fall back to the origin there.
        let referrer = if Url::parse(base).is_ok() { Some(base) } else { None };
        let resolved = if referrer.is_some() {
            state.cache.resolve_url(name, referrer)
        } else {
            let origin = state.origin.clone();
            origin.join(name).map_err(|_| SandboxError::SourceNotFound { url: name.to_string() })
        };
        match resolved {
            Ok(url) => Ok(url.to_string()),
            Err(err) => {
                let message = err.to_string();
                state.error.get_or_insert(err);
                Err(rquickjs::Error::new_resolving_message(base, name, message))
            }
        }
    }
}

struct SourceLoader {
    state: Rc<RefCell<LoaderState>>,
}

impl Loader for SourceLoader {
    fn load<'js>(&mut self, ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Module<'js, Declared>> {
        let source = {
            let mut state = self.state.borrow_mut();
            let url = match Url::parse(name) {
                Ok(url) => url,
                Err(_) => {
                    let err = SandboxError::SourceNotFound { url: name.to_string() };
                    let message = err.to_string();
                    state.error.get_or_insert(err);
                    return Err(rquickjs::Error::new_loading_message(name, message));
                }
            };
            match state.cache.fetch(&url, true) {
                Ok(source) => source,
                Err(err) => {
                    let message = err.to_string();
                    state.error.get_or_insert(err);
                    return Err(rquickjs::Error::new_loading_message(name, message));
                }
            }
        };
        Module::declare(ctx.clone(), name, source)
    }
}

fn worker_main(config: EngineConfig, jobs: mpsc::Receiver<RunRequest>) {
    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::warn!(target: "mocktrace::engine", %err, "failed to create isolate");
            return;
        }
    };
    runtime.set_memory_limit(config.max_memory_mib * 1024 * 1024);
    runtime.set_max_stack_size(ENGINE_STACK_BYTES);

    // Deadline is millis since `epoch`; zero disables the interrupt.
    let epoch = Instant::now();
    let deadline = Arc::new(AtomicU64::new(0));
    {
        let deadline = Arc::clone(&deadline);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            let limit = deadline.load(Ordering::Relaxed);
            limit != 0 && epoch.elapsed().as_millis() as u64 >= limit
        })));
    }

    let state = Rc::new(RefCell::new(LoaderState {
        cache: SourceCache::new(config.origin.clone()),
        origin: config.origin.clone(),
        error: None,
    }));
    runtime.set_loader(
        ModuleResolver { state: Rc::clone(&state) },
        SourceLoader { state: Rc::clone(&state) },
    );

    tracing::debug!(
        target: "mocktrace::engine",
        origin = %config.origin,
        max_memory_mib = config.max_memory_mib,
        "isolate ready"
    );

    while let Ok(job) = jobs.recv() {
        let reply = job.reply.clone();
        let outcome = execute_job(&config, &runtime, &state, epoch, &deadline, job);
        // A send failure means the host abandoned us (hard timeout); the
        // report already holds whatever was observed.
        if reply.send(outcome).is_err() {
            tracing::debug!(
                target: "mocktrace::engine",
                "isolate was disposed during execution; dropping reply"
            );
            return;
        }
    }
}

fn execute_job(
    config: &EngineConfig,
    runtime: &Runtime,
    state: &Rc<RefCell<LoaderState>>,
    epoch: Instant,
    deadline: &Arc<AtomicU64>,
    job: RunRequest,
) -> RunReply {
    let wall_start = Instant::now();
    let failed = |result: SandboxError| RunReply {
        result: Err(result),
        stats: RunStatsDelta::default(),
    };

    {
        let mut state = state.borrow_mut();
        state.error = None;
        state.cache.set_resolver(job.resolver.clone());
    }

    let entry_url = match state.borrow().cache.resolve_url(&job.specifier, None) {
        Ok(url) => url,
        Err(err) => return failed(err),
    };

    let cache_entry = matches!(job.source_type, SourceType::Module);
    let entry_source = {
        let mut state = state.borrow_mut();
        match &job.source_override {
            Some(source) if cache_entry => {
                state.cache.override_source(&entry_url, source.clone());
                Ok(source.clone())
            }
            Some(source) => Ok(source.clone()),
            None => state.cache.fetch(&entry_url, cache_entry),
        }
    };
    let entry_source = match entry_source {
        Ok(source) => source,
        Err(err) => return failed(err),
    };

    let context = match Context::full(runtime) {
        Ok(context) => context,
        Err(err) => return failed(SandboxError::execution(format!("context setup failed: {err}"))),
    };

    let timeout_ms = job.timeout.as_millis() as u64;
    let mut eval_ms = 0u128;
    let result = context.with(|ctx| {
        install_bootstrap(&ctx, &job)
            .map_err(|err| classify(&ctx, config, state, &entry_url, timeout_ms, err))?;

        let eval_start = Instant::now();
        deadline.store(epoch.elapsed().as_millis() as u64 + timeout_ms, Ordering::Relaxed);
        let outcome = evaluate_entry(&ctx, &entry_url, entry_source, epoch, deadline);
        deadline.store(0, Ordering::Relaxed);
        eval_ms = eval_start.elapsed().as_millis();
        outcome.map_err(|err| classify(&ctx, config, state, &entry_url, timeout_ms, err))
    });
    drop(context);

    match result {
        Ok(()) => {
            let counters = state.borrow().cache.counters();
            tracing::debug!(
                target: "mocktrace::engine",
                entry = %entry_url,
                cache_hits = counters.hits,
                cache_misses = counters.misses,
                cache_overrides = counters.overrides,
                "run complete"
            );
            let usage = runtime.memory_usage();
            RunReply {
                result: Ok(()),
                stats: RunStatsDelta {
                    eval_ms,
                    wall_ms: wall_start.elapsed().as_millis(),
                    memory_used_bytes: usage.memory_used_size,
                    malloc_bytes: usage.malloc_size,
                },
            }
        }
        Err(err) => failed(err),
    }
}

enum EvalFailure {
    Js(JsError),
    /// The job queue drained with the entry promise still pending.
    Stalled,
}

impl From<JsError> for EvalFailure {
    fn from(err: JsError) -> Self {
        EvalFailure::Js(err)
    }
}

fn evaluate_entry<'js>(
    ctx: &Ctx<'js>,
    entry_url: &Url,
    source: String,
    epoch: Instant,
    deadline: &Arc<AtomicU64>,
) -> Result<(), EvalFailure> {
    let promise: Promise =
        Module::evaluate(ctx.clone(), entry_url.as_str(), source).map_err(EvalFailure::Js)?;
    loop {
        match promise.finish::<JsValue>() {
            Ok(_) => return Ok(()),
            Err(JsError::WouldBlock) => {
                // Nothing left in the job queue can settle the entry; a
                // forever-pending top level is indistinguishable from a
                // hang, so wait out the soft deadline.
                let limit = deadline.load(Ordering::Relaxed);
                if limit == 0 || epoch.elapsed().as_millis() as u64 >= limit {
                    return Err(EvalFailure::Stalled);
                }
                thread::sleep(STALL_POLL);
            }
            Err(err) => return Err(EvalFailure::Js(err)),
        }
    }
}

fn install_bootstrap<'js>(ctx: &Ctx<'js>, job: &RunRequest) -> Result<(), JsError> {
    let boot: Function = ctx.eval(BOOTSTRAP_SOURCE.as_bytes())?;

    let report = Arc::clone(&job.report);
    let counter = Arc::clone(&job.next_value_id);
    let active = Arc::clone(&job.active);
    let emit = Function::new(
        ctx.clone(),
        move |payload: String, next_id: f64| -> rquickjs::Result<()> {
            if !active.load(Ordering::Relaxed) {
                return Ok(());
            }
            match serde_json::from_str::<Event>(&payload) {
                Ok(event) => report.append(event),
                Err(err) => {
                    tracing::warn!(
                        target: "mocktrace::engine",
                        %err,
                        "dropped malformed guest event"
                    );
                }
            }
            if next_id.is_finite() && next_id >= 1.0 {
                counter.store(next_id as u64, Ordering::Relaxed);
            }
            Ok(())
        },
    )?
    .with_name("__mocktraceEmit")?;

    let debug = Function::new(ctx.clone(), move |message: String| -> rquickjs::Result<()> {
        tracing::debug!(target: "mocktrace::guest", "{message}");
        Ok(())
    })?
    .with_name("__mocktraceDebug")?;

    let host_fns = Array::new(ctx.clone())?;
    for (index, callable) in job.callables.iter().enumerate() {
        let callable = Arc::clone(callable);
        let hook_fn = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'_>, args_json: String| -> rquickjs::Result<String> {
                let args: Vec<serde_json::Value> =
                    serde_json::from_str(&args_json).unwrap_or_default();
                match callable(&args) {
                    Ok(value) => Ok(value.to_string()),
                    Err(err) => {
                        let message = format!("host callable failed: {err}");
                        tracing::debug!(target: "mocktrace::engine", "{message}");
                        let thrown = message.into_js(&ctx)?;
                        Err(ctx.throw(thrown))
                    }
                }
            },
        )?;
        host_fns.set(index, hook_fn)?;
    }

    let seed = job.next_value_id.load(Ordering::Relaxed).max(1) as f64;
    boot.call::<_, ()>((emit, debug, seed, job.hooks_json.as_str(), host_fns))?;
    Ok(())
}

fn describe_exception(caught: &JsValue<'_>) -> (String, String) {
    if let Some(string) = caught.as_string() {
        if let Ok(message) = string.to_string() {
            return (String::new(), message);
        }
    }
    if let Some(object) = caught.as_object() {
        if let Some(exception) = Exception::from_object(object.clone()) {
            let name: String =
                exception.get("name").unwrap_or_else(|_| "Error".to_string());
            let message = exception.message().unwrap_or_default();
            return (name, message);
        }
        let name: String = object.get("name").unwrap_or_default();
        let message: String = object.get("message").unwrap_or_default();
        if !message.is_empty() {
            return (name, message);
        }
    }
    (String::new(), format!("{caught:?}"))
}

/// Turn an engine failure into the caller-facing error kind. Loader-recorded
/// typed errors win outright; after that the sentinel order is memory, then
/// interrupt, then syntax, then plain execution — memory must win when both
/// limits trip in the same evaluation.
fn classify(
    ctx: &Ctx<'_>,
    config: &EngineConfig,
    state: &Rc<RefCell<LoaderState>>,
    entry_url: &Url,
    timeout_ms: u64,
    failure: impl Into<EvalFailure>,
) -> SandboxError {
    if let Some(typed) = state.borrow_mut().error.take() {
        // Clear whatever the engine left pending for the wrapped failure.
        let _ = ctx.catch();
        return typed;
    }
    match failure.into() {
        EvalFailure::Stalled => SandboxError::Timeout { timeout_ms },
        EvalFailure::Js(JsError::Exception) => {
            let caught = ctx.catch();
            let (name, message) = describe_exception(&caught);
            let lowered = message.to_ascii_lowercase();
            if lowered.contains("out of memory") {
                SandboxError::MemoryLimit { limit_mib: config.max_memory_mib }
            } else if lowered.contains("interrupted") {
                SandboxError::Timeout { timeout_ms }
            } else if name == "SyntaxError" {
                SandboxError::Parsing { url: entry_url.to_string(), message }
            } else {
                SandboxError::Execution { message }
            }
        }
        EvalFailure::Js(other) => {
            let message = other.to_string();
            let lowered = message.to_ascii_lowercase();
            if lowered.contains("out of memory") || lowered.contains("allocation") {
                SandboxError::MemoryLimit { limit_mib: config.max_memory_mib }
            } else if lowered.contains("interrupted") {
                SandboxError::Timeout { timeout_ms }
            } else if lowered.contains("syntax") {
                SandboxError::Parsing { url: entry_url.to_string(), message }
            } else {
                SandboxError::Execution { message }
            }
        }
    }
}
