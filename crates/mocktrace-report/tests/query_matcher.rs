//! Query semantics over a hand-built report, mirroring the shapes research
//! queries actually take.

use mocktrace_report::{
    Event, EventKind, Literal, Location, LocationQuery, Query, Report, Value, ValuePattern,
};

/// The canonical two-event report produced by tracing `alert("hello")`.
fn alert_report() -> Report {
    let report = Report::new();
    report.append(Event::GetEvent {
        path: "alert".to_string(),
        value: Value::of_ref(1),
        location: Location::new("file:///index.js", 1, 1),
    });
    report.append(Event::CallEvent {
        path: "alert".to_string(),
        arguments: vec![Value::str("hello")],
        returns: Value::of_ref(2),
        is_constructor: false,
        location: Location::new("file:///index.js", 1, 1),
    });
    report
}

#[test]
fn path_queries_match_and_type_queries_discriminate() {
    let report = alert_report();
    assert!(report.has(&Query::path("alert")));
    assert!(!report.has(&Query::kind(EventKind::Set)));
    assert!(report.has(&Query::kind(EventKind::Call)));
}

#[test]
fn empty_argument_queries_skip_unary_calls() {
    let report = alert_report();
    assert!(report.find(&Query { arguments: Some(vec![]), ..Query::default() }).is_none());
}

#[test]
fn argument_containment_finds_the_call() {
    let report = alert_report();
    let found = report
        .find(&Query {
            arguments: Some(vec![ValuePattern::literal("hello")]),
            ..Query::default()
        })
        .expect("containment match");
    assert_eq!(found.kind(), EventKind::Call);
    assert_eq!(found.returns().unwrap(), &Value::of_ref(2));
}

#[test]
fn containment_ignores_arity_and_position() {
    let report = Report::new();
    report.append(Event::CallEvent {
        path: "postMessage".to_string(),
        arguments: vec![Value::str("payload"), Value::str("*"), Value::of_ref(4)],
        returns: Value::undefined(),
        is_constructor: false,
        location: Location::new("file:///index.js", 3, 1),
    });
    // Last argument queried first, arity 2 against arity 3.
    assert!(report.has(&Query {
        arguments: Some(vec![ValuePattern::of_ref(4), ValuePattern::literal("payload")]),
        ..Query::default()
    }));
    // One unmatched pattern fails the whole conjunction.
    assert!(!report.has(&Query {
        arguments: Some(vec![ValuePattern::of_ref(4), ValuePattern::literal("payload!")]),
        ..Query::default()
    }));
}

#[test]
fn value_queries_only_consider_events_carrying_a_value() {
    let report = alert_report();
    let get = report
        .find(&Query { value: Some(ValuePattern::of_ref(1)), ..Query::default() })
        .expect("value match");
    assert_eq!(get.kind(), EventKind::Get);
    assert!(report.find(&Query { value: Some(ValuePattern::of_ref(2)), ..Query::default() }).is_none());
    // ...but ref 2 is reachable through `returns`.
    assert!(report.has(&Query { returns: Some(ValuePattern::of_ref(2)), ..Query::default() }));
}

#[test]
fn location_queries_compare_only_supplied_subfields() {
    let report = alert_report();
    assert!(report.has(&Query {
        location: LocationQuery {
            filename: Some("file:///index.js".to_string()),
            line: Some(1),
            column: None,
        },
        ..Query::default()
    }));
    assert!(!report.has(&Query {
        location: LocationQuery { line: Some(2), ..LocationQuery::default() },
        ..Query::default()
    }));
}

#[test]
fn undefined_literals_never_match_null_patterns() {
    let report = Report::new();
    report.append(Event::SetEvent {
        path: "state".to_string(),
        value: Value::undefined(),
        location: Location::new("file:///index.js", 1, 1),
    });
    assert!(report.has(&Query {
        value: Some(ValuePattern::undefined()),
        ..Query::default()
    }));
    assert!(!report.has(&Query {
        value: Some(ValuePattern::literal(Literal::Null)),
        ..Query::default()
    }));
}

#[test]
fn find_all_preserves_insertion_order_and_find_is_its_head() {
    let report = alert_report();
    let all = report.find_all(&Query::path("alert"));
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].kind(), EventKind::Get);
    assert_eq!(report.find(&Query::path("alert")).unwrap(), all[0]);
}
