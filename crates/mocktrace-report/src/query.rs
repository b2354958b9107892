use crate::event::{Event, EventKind, Literal, Value};

/// Constraint on a single event value. Both fields are conjunctive; an
/// empty pattern matches any value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValuePattern {
    /// Require the event value to be a `Ref` with this id.
    pub ref_id: Option<u64>,
    /// Require the event value to be a `Literal` strictly equal to this
    /// one. `Undefined` and `Null` are distinct here.
    pub literal: Option<Literal>,
}

impl ValuePattern {
    pub fn of_ref(id: u64) -> Self {
        Self { ref_id: Some(id), literal: None }
    }

    pub fn literal(lit: impl Into<Literal>) -> Self {
        Self { ref_id: None, literal: Some(lit.into()) }
    }

    pub fn undefined() -> Self {
        Self::literal(Literal::Undefined)
    }

    pub fn matches(&self, value: &Value) -> bool {
        if let Some(expected) = self.ref_id {
            match value {
                Value::Ref(id) if *id == expected => {}
                _ => return false,
            }
        }
        if let Some(expected) = &self.literal {
            match value {
                Value::Literal(lit) if lit == expected => {}
                _ => return false,
            }
        }
        true
    }
}

/// Location constraint; only the supplied subfields are compared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationQuery {
    pub filename: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl LocationQuery {
    fn is_empty(&self) -> bool {
        self.filename.is_none() && self.line.is_none() && self.column.is_none()
    }
}

/// A partial event record. Every populated field is a conjunctive filter;
/// an empty query matches every event.
///
/// `arguments` uses set containment, not positional comparison: each
/// queried pattern must match *some* argument of the event, irrespective of
/// position or arity, and two queried patterns may be satisfied by the same
/// event argument. The empty list is special-cased to match only events
/// whose argument list is itself empty. Queries carrying `arguments`,
/// `returns` or `is_constructor` only ever match call events, and queries
/// carrying `value` only get/set events, because the field must be present
/// on the event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub kind: Option<EventKind>,
    pub path: Option<String>,
    pub value: Option<ValuePattern>,
    pub arguments: Option<Vec<ValuePattern>>,
    pub returns: Option<ValuePattern>,
    pub is_constructor: Option<bool>,
    pub location: LocationQuery,
}

impl Query {
    pub fn kind(kind: EventKind) -> Self {
        Self { kind: Some(kind), ..Self::default() }
    }

    pub fn path(path: impl Into<String>) -> Self {
        Self { path: Some(path.into()), ..Self::default() }
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(kind) = self.kind {
            if event.kind() != kind {
                return false;
            }
        }
        if let Some(path) = &self.path {
            if event.path() != path {
                return false;
            }
        }
        if let Some(pattern) = &self.value {
            match event.value() {
                Some(value) if pattern.matches(value) => {}
                _ => return false,
            }
        }
        if let Some(patterns) = &self.arguments {
            let Some(arguments) = event.arguments() else {
                return false;
            };
            if patterns.is_empty() {
                if !arguments.is_empty() {
                    return false;
                }
            } else if !patterns.iter().all(|p| arguments.iter().any(|a| p.matches(a))) {
                return false;
            }
        }
        if let Some(pattern) = &self.returns {
            match event.returns() {
                Some(value) if pattern.matches(value) => {}
                _ => return false,
            }
        }
        if let Some(expected) = self.is_constructor {
            if event.is_constructor() != Some(expected) {
                return false;
            }
        }
        if !self.location.is_empty() {
            let location = event.location();
            if let Some(filename) = &self.location.filename {
                if &location.filename != filename {
                    return false;
                }
            }
            if let Some(line) = self.location.line {
                if location.line != line {
                    return false;
                }
            }
            if let Some(column) = self.location.column {
                if location.column != column {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Location;

    fn call(path: &str, arguments: Vec<Value>, returns: Value, is_constructor: bool) -> Event {
        Event::CallEvent {
            path: path.to_string(),
            arguments,
            returns,
            is_constructor,
            location: Location::new("file:///index.js", 1, 1),
        }
    }

    fn get(path: &str, value: Value) -> Event {
        Event::GetEvent {
            path: path.to_string(),
            value,
            location: Location::new("file:///index.js", 2, 5),
        }
    }

    #[test]
    fn empty_query_matches_everything() {
        let q = Query::default();
        assert!(q.matches(&get("alert", Value::of_ref(1))));
        assert!(q.matches(&call("alert", vec![], Value::of_ref(2), false)));
    }

    #[test]
    fn path_and_kind_are_equality_filters() {
        let event = get("alert", Value::of_ref(1));
        assert!(Query::path("alert").matches(&event));
        assert!(!Query::path("aler").matches(&event));
        assert!(Query::kind(EventKind::Get).matches(&event));
        assert!(!Query::kind(EventKind::Set).matches(&event));
    }

    #[test]
    fn value_requires_presence() {
        let q = Query { value: Some(ValuePattern::of_ref(1)), ..Query::default() };
        assert!(q.matches(&get("x", Value::of_ref(1))));
        // Call events have no `value` field, so the filter fails outright.
        assert!(!q.matches(&call("x", vec![Value::of_ref(1)], Value::of_ref(2), false)));
    }

    #[test]
    fn empty_argument_list_matches_only_nullary_calls() {
        let q = Query { arguments: Some(vec![]), ..Query::default() };
        assert!(q.matches(&call("f", vec![], Value::of_ref(1), false)));
        assert!(!q.matches(&call("f", vec![Value::str("x")], Value::of_ref(1), false)));
        assert!(!q.matches(&get("f", Value::of_ref(1))));
    }

    #[test]
    fn arguments_use_set_containment() {
        let event = call(
            "f",
            vec![Value::str("a"), Value::number(2.0), Value::of_ref(9)],
            Value::of_ref(1),
            false,
        );
        // Order does not matter.
        let q = Query {
            arguments: Some(vec![ValuePattern::of_ref(9), ValuePattern::literal("a")]),
            ..Query::default()
        };
        assert!(q.matches(&event));
        // A pattern that matches nothing fails the conjunction.
        let q = Query {
            arguments: Some(vec![ValuePattern::literal("missing")]),
            ..Query::default()
        };
        assert!(!q.matches(&event));
        // Duplicate patterns may re-match the same event argument.
        let q = Query {
            arguments: Some(vec![ValuePattern::literal("a"), ValuePattern::literal("a")]),
            ..Query::default()
        };
        assert!(q.matches(&event));
    }

    #[test]
    fn undefined_literal_is_not_null() {
        let event = call("f", vec![Value::undefined()], Value::of_ref(1), false);
        let undef = Query {
            arguments: Some(vec![ValuePattern::undefined()]),
            ..Query::default()
        };
        let null = Query {
            arguments: Some(vec![ValuePattern::literal(Literal::Null)]),
            ..Query::default()
        };
        assert!(undef.matches(&event));
        assert!(!null.matches(&event));
    }

    #[test]
    fn location_subfields_compare_independently() {
        let event = get("x", Value::of_ref(1));
        let q = Query {
            location: LocationQuery { line: Some(2), ..LocationQuery::default() },
            ..Query::default()
        };
        assert!(q.matches(&event));
        let q = Query {
            location: LocationQuery {
                filename: Some("file:///other.js".to_string()),
                ..LocationQuery::default()
            },
            ..Query::default()
        };
        assert!(!q.matches(&event));
    }

    #[test]
    fn constructor_flag_is_strict() {
        let event = call("Date", vec![], Value::of_ref(3), true);
        let q = Query { is_constructor: Some(true), ..Query::default() };
        assert!(q.matches(&event));
        let q = Query { is_constructor: Some(false), ..Query::default() };
        assert!(!q.matches(&event));
        // Get events never match a constructor query.
        let q = Query { is_constructor: Some(true), ..Query::default() };
        assert!(!q.matches(&get("Date", Value::of_ref(1))));
    }
}
