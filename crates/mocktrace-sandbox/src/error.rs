use thiserror::Error;

/// Everything `hook` and `run` can fail with. Nothing here is recovered
/// internally; the orchestrator classifies engine failures once and hands
/// them to the caller.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("invalid accessor path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("invalid hook value: {0}")]
    InvalidValue(String),

    #[error("no source available for {url}")]
    SourceNotFound { url: String },

    #[error("failed to parse {url}: {message}")]
    Parsing { url: String, message: String },

    #[error("guest execution failed: {message}")]
    Execution { message: String },

    #[error("execution timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("isolate exceeded its {limit_mib} MiB memory limit")]
    MemoryLimit { limit_mib: usize },
}

impl SandboxError {
    pub fn execution(message: impl Into<String>) -> Self {
        SandboxError::Execution { message: message.into() }
    }
}
