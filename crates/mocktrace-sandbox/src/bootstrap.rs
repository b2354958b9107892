//! The in-guest instrumentation program.
//!
//! The source is injected verbatim into every fresh context. Evaluating it
//! yields a closure which the engine driver calls with the event sink, the
//! debug sink, the id seed, the serialised hook table and the host callable
//! array. From then on every property read, write, call and construction in
//! the context flows through its proxy traps.

/// JavaScript injected before user code. Kept as a single closure expression
/// so evaluation hands back a callable and nothing leaks into the global
/// scope before the hijack itself runs.
pub const BOOTSTRAP_SOURCE: &str = include_str!("bootstrap.js");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_is_a_single_closure_expression() {
        let trimmed = BOOTSTRAP_SOURCE.trim();
        assert!(trimmed.starts_with("(function bootstrap("));
        assert!(trimmed.ends_with("})"));
    }

    #[test]
    fn bootstrap_carries_the_expected_machinery() {
        for marker in [
            "use strict",
            "new RealProxy(target, handler)",
            "resolvePath",
            "toEventValue",
            "GetEvent",
            "SetEvent",
            "CallEvent",
            "visitCallbacks",
            "installHooks(hooksJson)",
            "ObjectSetPrototypeOf(globalThis, globalMock)",
            "delete globalThis[INTRINSIC_NAMES[d]]",
        ] {
            assert!(BOOTSTRAP_SOURCE.contains(marker), "missing marker: {marker}");
        }
    }

    #[test]
    fn bootstrap_captures_intrinsics_before_the_hijack() {
        // The traps run after the originals are deleted from the outer
        // global, so every intrinsic they use must be captured up front.
        let hijack = BOOTSTRAP_SOURCE.find("ObjectSetPrototypeOf(globalThis").unwrap();
        for capture in [
            "var RealError = Error;",
            "var RealPromise = Promise;",
            "var JSONStringify = JSON.stringify.bind(JSON);",
            "var ReflectApply = Reflect.apply;",
            "var ParseIntFn = parseInt;",
        ] {
            let at = BOOTSTRAP_SOURCE.find(capture).unwrap_or_else(|| panic!("missing {capture}"));
            assert!(at < hijack, "{capture} must precede the hijack");
        }
    }
}
