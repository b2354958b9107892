use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A primitive carried by copy in an event. `Undefined` and `Null` are
/// distinct members; queries must be able to tell them apart.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
}

impl Literal {
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Undefined => "undefined",
            Literal::Null => "null",
            Literal::Bool(_) => "boolean",
            Literal::Number(_) => "number",
            Literal::Str(_) => "string",
        }
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Str(value.to_string())
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Number(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Bool(value)
    }
}

/// Names whatever was read, written, passed or returned. Exactly one
/// variant: a primitive by copy, or the stable integer identity of a
/// non-primitive guest object.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Ref(u64),
    Literal(Literal),
}

impl Value {
    pub fn of_ref(id: u64) -> Self {
        Value::Ref(id)
    }

    pub fn undefined() -> Self {
        Value::Literal(Literal::Undefined)
    }

    pub fn null() -> Self {
        Value::Literal(Literal::Null)
    }

    pub fn str(value: impl Into<String>) -> Self {
        Value::Literal(Literal::Str(value.into()))
    }

    pub fn number(value: f64) -> Self {
        Value::Literal(Literal::Number(value))
    }

    pub fn bool(value: bool) -> Self {
        Value::Literal(Literal::Bool(value))
    }

    pub fn ref_id(&self) -> Option<u64> {
        match self {
            Value::Ref(id) => Some(*id),
            Value::Literal(_) => None,
        }
    }

    pub fn literal(&self) -> Option<&Literal> {
        match self {
            Value::Ref(_) => None,
            Value::Literal(lit) => Some(lit),
        }
    }
}

// The wire and export format is `{"ref": n}` or `{"literal": v}`. JSON has
// no `undefined`, so that literal is encoded as `null` plus an
// `"undefined": true` marker which deserialization honours.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Ref(id) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("ref", id)?;
                map.end()
            }
            Value::Literal(Literal::Undefined) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("literal", &())?;
                map.serialize_entry("undefined", &true)?;
                map.end()
            }
            Value::Literal(lit) => {
                let mut map = serializer.serialize_map(Some(1))?;
                match lit {
                    Literal::Null => map.serialize_entry("literal", &())?,
                    Literal::Bool(b) => map.serialize_entry("literal", b)?,
                    Literal::Number(n) => map.serialize_entry("literal", n)?,
                    Literal::Str(s) => map.serialize_entry("literal", s)?,
                    Literal::Undefined => unreachable!("handled above"),
                }
                map.end()
            }
        }
    }
}

struct LiteralVisitor;

impl<'de> Visitor<'de> for LiteralVisitor {
    type Value = Literal;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("null, a boolean, a number or a string")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Literal, E> {
        Ok(Literal::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Literal, E> {
        Ok(Literal::Null)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Literal, E> {
        Ok(Literal::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Literal, E> {
        Ok(Literal::Number(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Literal, E> {
        Ok(Literal::Number(v as f64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Literal, E> {
        Ok(Literal::Number(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Literal, E> {
        Ok(Literal::Str(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Literal, E> {
        Ok(Literal::Str(v))
    }
}

impl<'de> Deserialize<'de> for Literal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(LiteralVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map with either a \"ref\" or a \"literal\" key")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut ref_id: Option<u64> = None;
        let mut literal: Option<Literal> = None;
        let mut saw_literal = false;
        let mut undefined = false;
        while let Some(key) = access.next_key::<String>()? {
            match key.as_str() {
                "ref" => ref_id = Some(access.next_value()?),
                "literal" => {
                    literal = Some(access.next_value()?);
                    saw_literal = true;
                }
                "undefined" => undefined = access.next_value()?,
                other => {
                    return Err(de::Error::unknown_field(other, &["ref", "literal", "undefined"]))
                }
            }
        }
        match (ref_id, saw_literal) {
            (Some(id), false) => Ok(Value::Ref(id)),
            (None, true) => {
                if undefined {
                    Ok(Value::Literal(Literal::Undefined))
                } else {
                    Ok(Value::Literal(literal.unwrap_or(Literal::Null)))
                }
            }
            (Some(_), true) => Err(de::Error::custom("value has both \"ref\" and \"literal\"")),
            (None, false) => Err(de::Error::custom("value has neither \"ref\" nor \"literal\"")),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(ValueVisitor)
    }
}

/// Closest user frame of the emitting access. `filename` is the absolute
/// URL the originating source was compiled under; `line` and `column` are
/// 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub filename: String,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(filename: impl Into<String>, line: u32, column: u32) -> Self {
        Self { filename: filename.into(), line, column }
    }

    pub fn unknown() -> Self {
        Self { filename: "<unknown>".to_string(), line: 1, column: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Get,
    Set,
    Call,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Get => "GetEvent",
            EventKind::Set => "SetEvent",
            EventKind::Call => "CallEvent",
        }
    }
}

/// One observed interaction. Immutable once appended to a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    GetEvent {
        path: String,
        value: Value,
        location: Location,
    },
    SetEvent {
        path: String,
        value: Value,
        location: Location,
    },
    CallEvent {
        path: String,
        arguments: Vec<Value>,
        returns: Value,
        #[serde(rename = "isConstructor")]
        is_constructor: bool,
        location: Location,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::GetEvent { .. } => EventKind::Get,
            Event::SetEvent { .. } => EventKind::Set,
            Event::CallEvent { .. } => EventKind::Call,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Event::GetEvent { path, .. }
            | Event::SetEvent { path, .. }
            | Event::CallEvent { path, .. } => path,
        }
    }

    pub fn location(&self) -> &Location {
        match self {
            Event::GetEvent { location, .. }
            | Event::SetEvent { location, .. }
            | Event::CallEvent { location, .. } => location,
        }
    }

    /// The `value` field of a get/set; calls carry `arguments`/`returns`
    /// instead.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Event::GetEvent { value, .. } | Event::SetEvent { value, .. } => Some(value),
            Event::CallEvent { .. } => None,
        }
    }

    pub fn arguments(&self) -> Option<&[Value]> {
        match self {
            Event::CallEvent { arguments, .. } => Some(arguments),
            _ => None,
        }
    }

    pub fn returns(&self) -> Option<&Value> {
        match self {
            Event::CallEvent { returns, .. } => Some(returns),
            _ => None,
        }
    }

    pub fn is_constructor(&self) -> Option<bool> {
        match self {
            Event::CallEvent { is_constructor, .. } => Some(*is_constructor),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_union_round_trips() {
        let cases = vec![
            Value::of_ref(7),
            Value::str("hello"),
            Value::number(1.5),
            Value::bool(false),
            Value::null(),
            Value::undefined(),
        ];
        for value in cases {
            let json = serde_json::to_string(&value).unwrap();
            let back: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(back, value, "round trip through {json}");
        }
    }

    #[test]
    fn undefined_and_null_stay_distinct() {
        let undef = serde_json::to_string(&Value::undefined()).unwrap();
        let null = serde_json::to_string(&Value::null()).unwrap();
        assert_ne!(undef, null);
        let undef_back: Value = serde_json::from_str(&undef).unwrap();
        let null_back: Value = serde_json::from_str(&null).unwrap();
        assert_eq!(undef_back, Value::undefined());
        assert_eq!(null_back, Value::null());
    }

    #[test]
    fn value_rejects_empty_and_double_population() {
        assert!(serde_json::from_str::<Value>("{}").is_err());
        assert!(serde_json::from_str::<Value>(r#"{"ref":1,"literal":"x"}"#).is_err());
    }

    #[test]
    fn event_serialises_with_public_field_names() {
        let event = Event::CallEvent {
            path: "alert".to_string(),
            arguments: vec![Value::str("hello")],
            returns: Value::of_ref(2),
            is_constructor: false,
            location: Location::new("file:///index.js", 1, 1),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "CallEvent");
        assert_eq!(json["path"], "alert");
        assert_eq!(json["isConstructor"], false);
        assert_eq!(json["arguments"][0]["literal"], "hello");
        assert_eq!(json["returns"]["ref"], 2);
        assert_eq!(json["location"]["filename"], "file:///index.js");
        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
