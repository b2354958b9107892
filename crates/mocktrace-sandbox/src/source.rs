//! Specifier resolution and the resolved-source cache.
//!
//! Specifiers become absolute URLs joined against the referrer (the entry
//! specifier joins against the configured origin). The full `href`,
//! fragments and percent-encoding included, is the cache key. Module
//! sources are fetched through the user resolver at most once per isolate
//! lifetime; explicit overrides replace prior entries; script-mode entries
//! bypass the cache entirely.

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::error::SandboxError;

/// What a user resolver may hand back. Bytes are interpreted as UTF-8.
#[derive(Debug, Clone)]
pub enum ResolvedSource {
    Text(String),
    Bytes(Vec<u8>),
}

impl ResolvedSource {
    fn into_text(self) -> String {
        match self {
            ResolvedSource::Text(text) => text,
            ResolvedSource::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

impl From<&str> for ResolvedSource {
    fn from(value: &str) -> Self {
        ResolvedSource::Text(value.to_string())
    }
}

impl From<String> for ResolvedSource {
    fn from(value: String) -> Self {
        ResolvedSource::Text(value)
    }
}

impl From<Vec<u8>> for ResolvedSource {
    fn from(value: Vec<u8>) -> Self {
        ResolvedSource::Bytes(value)
    }
}

/// User-provided `URL -> source` lookup. `None` means the module does not
/// exist; errors propagate to the caller as `Execution`.
pub type SharedResolver =
    Arc<dyn Fn(&Url) -> anyhow::Result<Option<ResolvedSource>> + Send + Sync>;

#[derive(Debug, Clone)]
struct CachedSource {
    source: String,
    overridden: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub overrides: u64,
}

/// Lives on the engine worker, so its lifetime is exactly the isolate's.
pub(crate) struct SourceCache {
    origin: Url,
    resolver: Option<SharedResolver>,
    entries: HashMap<String, CachedSource>,
    counters: CacheCounters,
}

impl SourceCache {
    pub fn new(origin: Url) -> Self {
        Self { origin, resolver: None, entries: HashMap::new(), counters: CacheCounters::default() }
    }

    pub fn set_resolver(&mut self, resolver: Option<SharedResolver>) {
        self.resolver = resolver;
    }

    /// `specifier` joined against `referrer` (or the origin for the entry
    /// point). A specifier no URL can be produced from is reported as
    /// `SourceNotFound`.
    pub fn resolve_url(
        &self,
        specifier: &str,
        referrer: Option<&str>,
    ) -> Result<Url, SandboxError> {
        let base = match referrer {
            Some(raw) => Url::parse(raw).map_err(|_| SandboxError::SourceNotFound {
                url: raw.to_string(),
            })?,
            None => self.origin.clone(),
        };
        base.join(specifier).map_err(|_| SandboxError::SourceNotFound {
            url: specifier.to_string(),
        })
    }

    /// Replace whatever is cached for `url` with explicit source text.
    pub fn override_source(&mut self, url: &Url, source: String) {
        self.counters.overrides += 1;
        self.entries
            .insert(url.as_str().to_string(), CachedSource { source, overridden: true });
    }

    /// Fetch the source for `url`, consulting the cache first and the user
    /// resolver on a miss. `cache` is false for script-mode entries, which
    /// recompile from a fresh fetch on every run.
    pub fn fetch(&mut self, url: &Url, cache: bool) -> Result<String, SandboxError> {
        let key = url.as_str();
        if let Some(entry) = self.entries.get(key) {
            self.counters.hits += 1;
            return Ok(entry.source.clone());
        }
        self.counters.misses += 1;
        let resolver = self.resolver.as_ref().ok_or_else(|| SandboxError::SourceNotFound {
            url: key.to_string(),
        })?;
        let resolved = resolver(url)
            .map_err(|err| SandboxError::execution(format!("resolver failed for {key}: {err}")))?
            .ok_or_else(|| SandboxError::SourceNotFound { url: key.to_string() })?;
        let source = resolved.into_text();
        if cache {
            self.entries
                .insert(key.to_string(), CachedSource { source: source.clone(), overridden: false });
        }
        Ok(source)
    }

    pub fn counters(&self) -> CacheCounters {
        self.counters
    }

    #[cfg(test)]
    fn is_overridden(&self, url: &Url) -> bool {
        self.entries.get(url.as_str()).map(|e| e.overridden).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn origin() -> Url {
        Url::parse("file:///").unwrap()
    }

    #[test]
    fn entry_specifiers_join_against_the_origin() {
        let cache = SourceCache::new(origin());
        assert_eq!(cache.resolve_url("./index.js", None).unwrap().as_str(), "file:///index.js");
        assert_eq!(cache.resolve_url("index.js", None).unwrap().as_str(), "file:///index.js");
        assert_eq!(
            cache.resolve_url("https://example.com/a.js", None).unwrap().as_str(),
            "https://example.com/a.js"
        );
    }

    #[test]
    fn nested_specifiers_join_against_the_referrer() {
        let cache = SourceCache::new(origin());
        let url = cache
            .resolve_url("../test.js", Some("file:///subdir/hey.js"))
            .unwrap();
        assert_eq!(url.as_str(), "file:///test.js");
    }

    #[test]
    fn awkward_filenames_keep_percent_encoding_in_the_key() {
        let cache = SourceCache::new(origin());
        let url = cache
            .resolve_url("../a [weird] (name).js", Some("file:///subdir/hey.js"))
            .unwrap();
        assert_eq!(url.as_str(), "file:///a%20[weird]%20(name).js");
        let with_fragment = cache.resolve_url("./mod.js#part", None).unwrap();
        assert_eq!(with_fragment.as_str(), "file:///mod.js#part");
    }

    #[test]
    fn resolver_is_consulted_once_per_url() {
        let mut cache = SourceCache::new(origin());
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        cache.set_resolver(Some(Arc::new(move |_url: &Url| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(Some(ResolvedSource::from("export {};")))
        })));
        let url = cache.resolve_url("./m.js", None).unwrap();
        assert_eq!(cache.fetch(&url, true).unwrap(), "export {};");
        assert_eq!(cache.fetch(&url, true).unwrap(), "export {};");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.counters().hits, 1);
        assert_eq!(cache.counters().misses, 1);
    }

    #[test]
    fn script_fetches_do_not_populate_the_cache() {
        let mut cache = SourceCache::new(origin());
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        cache.set_resolver(Some(Arc::new(move |_url: &Url| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(Some(ResolvedSource::from("1;")))
        })));
        let url = cache.resolve_url("./s.js", None).unwrap();
        cache.fetch(&url, false).unwrap();
        cache.fetch(&url, false).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn overrides_replace_and_win_over_the_resolver() {
        let mut cache = SourceCache::new(origin());
        cache.set_resolver(Some(Arc::new(|_url: &Url| {
            Ok(Some(ResolvedSource::from("from resolver")))
        })));
        let url = cache.resolve_url("./m.js", None).unwrap();
        cache.override_source(&url, "first".to_string());
        assert_eq!(cache.fetch(&url, true).unwrap(), "first");
        assert!(cache.is_overridden(&url));
        cache.override_source(&url, "second".to_string());
        assert_eq!(cache.fetch(&url, true).unwrap(), "second");
    }

    #[test]
    fn missing_sources_surface_as_source_not_found() {
        let mut cache = SourceCache::new(origin());
        let url = cache.resolve_url("./nope.js", None).unwrap();
        // No resolver configured.
        assert!(matches!(
            cache.fetch(&url, true),
            Err(SandboxError::SourceNotFound { .. })
        ));
        cache.set_resolver(Some(Arc::new(|_url: &Url| Ok(None))));
        assert!(matches!(
            cache.fetch(&url, true),
            Err(SandboxError::SourceNotFound { .. })
        ));
    }

    #[test]
    fn bytes_are_decoded_as_utf8() {
        let mut cache = SourceCache::new(origin());
        cache.set_resolver(Some(Arc::new(|_url: &Url| {
            Ok(Some(ResolvedSource::from(b"callMe('\xc3\xa9')".to_vec())))
        })));
        let url = cache.resolve_url("./u.js", None).unwrap();
        assert_eq!(cache.fetch(&url, true).unwrap(), "callMe('é')");
    }
}
