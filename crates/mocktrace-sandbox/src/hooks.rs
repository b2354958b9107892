//! Host-declared overrides installed into the guest before user code runs.
//!
//! A hook is keyed by accessor path and is one of: a value copied into the
//! guest, a host-side callable bridged across the boundary, or an alias that
//! forwards reads to another path. The registry serialises itself into the
//! wire table the bootstrap consumes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::json;

use crate::error::SandboxError;
use crate::path;

/// Host function invocable from the guest. Arguments arrive as the guest's
/// structured-clone (JSON) rendering; the returned value is cloned back in.
pub type HostCallable =
    Arc<dyn Fn(&[serde_json::Value]) -> anyhow::Result<serde_json::Value> + Send + Sync>;

/// The three override shapes, plus copied `undefined` which JSON cannot
/// carry inside [`HookValue::Copy`].
#[derive(Clone)]
pub enum HookValue {
    /// Structured-cloneable value, deposited into the guest by deep copy.
    Copy(serde_json::Value),
    /// Copied `undefined` (neutralises AMD/CommonJS detection loops).
    Undefined,
    /// Host function; guest invocations round-trip across the boundary.
    Callable(HostCallable),
    /// Reads and calls behave as if they occurred at the target path.
    Alias(String),
}

impl HookValue {
    pub fn copy(value: serde_json::Value) -> Self {
        HookValue::Copy(value)
    }

    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&[serde_json::Value]) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static,
    {
        HookValue::Callable(Arc::new(f))
    }

    pub fn alias(target: impl Into<String>) -> Self {
        HookValue::Alias(target.into())
    }
}

impl fmt::Debug for HookValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookValue::Copy(value) => f.debug_tuple("Copy").field(value).finish(),
            HookValue::Undefined => f.write_str("Undefined"),
            HookValue::Callable(_) => f.write_str("Callable(..)"),
            HookValue::Alias(target) => f.debug_tuple("Alias").field(target).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HookEntry {
    pub value: HookValue,
    pub writable: bool,
}

/// Path-keyed hook table. Later insertions at the same path replace earlier
/// ones, which is how user hooks override the default set.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    entries: BTreeMap<String, HookEntry>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The table every sandbox starts with: `globalThis` aliases for the
    /// window-ish names, a minimal `document`, an empty `browser` with
    /// `chrome` aliased onto it, and `undefined` at the module-system
    /// probes. All writable; user hooks may override any of them.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for name in ["frames", "global", "parent", "self", "window"] {
            registry
                .insert(name, HookValue::alias("globalThis"), true)
                .expect("default alias hook");
        }
        registry
            .insert(
                "document",
                HookValue::copy(json!({ "nodeType": 9, "readyState": "complete" })),
                true,
            )
            .expect("default document hook");
        registry
            .insert("browser", HookValue::copy(json!({})), true)
            .expect("default browser hook");
        registry
            .insert("chrome", HookValue::alias("browser"), true)
            .expect("default chrome hook");
        for name in ["define", "exports", "module", "require"] {
            registry
                .insert(name, HookValue::Undefined, true)
                .expect("default module-probe hook");
        }
        registry
    }

    /// Validate and store, replacing any prior hook at `path`.
    pub fn insert(
        &mut self,
        path: &str,
        value: HookValue,
        writable: bool,
    ) -> Result<(), SandboxError> {
        path::validate(path)?;
        if let HookValue::Alias(target) = &value {
            path::validate(target).map_err(|_| {
                SandboxError::InvalidValue(format!("alias target {target:?} is not a valid path"))
            })?;
        }
        self.entries.insert(path.to_string(), HookEntry { value, writable });
        Ok(())
    }

    pub fn remove(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn get(&self, path: &str) -> Option<&HookEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialise into the JSON table the bootstrap installs, plus the host
    /// callables in table order (`"fn"` entries index into the returned
    /// vector).
    pub(crate) fn wire(&self) -> (String, Vec<HostCallable>) {
        let mut callables = Vec::new();
        let mut table = Vec::with_capacity(self.entries.len());
        for (path, entry) in &self.entries {
            let mut record = json!({ "path": path, "writable": entry.writable });
            match &entry.value {
                HookValue::Copy(value) => {
                    record["kind"] = json!("copy");
                    record["value"] = value.clone();
                }
                HookValue::Undefined => {
                    record["kind"] = json!("copy");
                    record["value"] = serde_json::Value::Null;
                    record["undefined"] = json!(true);
                }
                HookValue::Callable(callable) => {
                    record["kind"] = json!("callable");
                    record["fn"] = json!(callables.len());
                    callables.push(Arc::clone(callable));
                }
                HookValue::Alias(target) => {
                    record["kind"] = json!("alias");
                    record["target"] = json!(target);
                }
            }
            table.push(record);
        }
        let json = serde_json::Value::Array(table).to_string();
        (json, callables)
    }
}
