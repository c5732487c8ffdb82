use crate::async_generator::AsyncGenerator;
use crate::delegation::{AsyncSource, SyncSource};
use crate::error::GeneratorError;
use crate::generator::Generator;
use crate::promise::Promise;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// An error object raised by the runtime itself (`TypeError`, `RangeError`, ...)
/// rather than thrown by a body.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
}

impl ErrorValue {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorValue {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    Error(ErrorValue),
    Promise(Promise),
    IterResult(Box<IterResult>),
    Generator(Generator),
    AsyncGenerator(AsyncGenerator),
    Iterator(Rc<RefCell<dyn SyncSource>>),
    AsyncIterator(Rc<RefCell<dyn AsyncSource>>),
}

impl Value {
    /// Wrap a synchronous source so it can be delegated to with `yield*`.
    pub fn iterator<S: SyncSource + 'static>(source: S) -> Value {
        Value::Iterator(Rc::new(RefCell::new(source)))
    }

    pub fn async_iterator<S: AsyncSource + 'static>(source: S) -> Value {
        Value::AsyncIterator(Rc::new(RefCell::new(source)))
    }

    pub fn type_error(message: impl Into<String>) -> Value {
        Value::Error(ErrorValue::new("TypeError", message))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorValue> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }

    /// JSON rendering with `JSON.stringify` rules: `None` for undefined,
    /// undefined object members are skipped and undefined array slots become null.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value as Json;
        let json = match self {
            Value::Undefined => return None,
            Value::Null => Json::Null,
            Value::Boolean(b) => Json::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(|v| v.to_json().unwrap_or(Json::Null)).collect()),
            Value::Object(map) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in map {
                    if let Some(j) = v.to_json() {
                        obj.insert(k.clone(), j);
                    }
                }
                Json::Object(obj)
            }
            Value::Error(e) => {
                let mut obj = serde_json::Map::new();
                obj.insert("name".to_string(), Json::String(e.name.clone()));
                obj.insert("message".to_string(), Json::String(e.message.clone()));
                Json::Object(obj)
            }
            Value::IterResult(r) => r.to_json(),
            _ => Json::Object(serde_json::Map::new()),
        };
        Some(json)
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|v| match v {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.to_string(),
                    })
                    .collect();
                write!(f, "{}", parts.join(","))
            }
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Error(e) => write!(f, "{e}"),
            Value::Promise(_) => write!(f, "[object Promise]"),
            Value::IterResult(r) => write!(f, "{r}"),
            Value::Generator(_) => write!(f, "[object Generator]"),
            Value::AsyncGenerator(_) => write!(f, "[object AsyncGenerator]"),
            Value::Iterator(_) => write!(f, "[object Iterator]"),
            Value::AsyncIterator(_) => write!(f, "[object AsyncIterator]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::Null => write!(f, "Null"),
            Value::Boolean(b) => write!(f, "Boolean({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Value::Object(map) => f.debug_tuple("Object").field(map).finish(),
            Value::Error(e) => write!(f, "Error({e})"),
            Value::Promise(p) => write!(f, "Promise(#{})", p.id()),
            Value::IterResult(r) => write!(f, "IterResult({r})"),
            Value::Generator(g) => write!(f, "Generator(#{})", g.id()),
            Value::AsyncGenerator(g) => write!(f, "AsyncGenerator(#{})", g.id()),
            Value::Iterator(_) => write!(f, "Iterator"),
            Value::AsyncIterator(_) => write!(f, "AsyncIterator"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::IterResult(a), Value::IterResult(b)) => a == b,
            // handles compare by identity
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            (Value::Generator(a), Value::Generator(b)) => a.ptr_eq(b),
            (Value::AsyncGenerator(a), Value::AsyncGenerator(b)) => a.ptr_eq(b),
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            (Value::AsyncIterator(a), Value::AsyncIterator(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Value::Promise(p)
    }
}

impl From<Generator> for Value {
    fn from(g: Generator) -> Self {
        Value::Generator(g)
    }
}

impl From<AsyncGenerator> for Value {
    fn from(g: AsyncGenerator) -> Self {
        Value::AsyncGenerator(g)
    }
}

impl From<IterResult> for Value {
    fn from(r: IterResult) -> Self {
        Value::IterResult(Box::new(r))
    }
}

/// The `{ value, done }` pair delivered to callers. Compared structurally.
#[derive(Clone, Debug, PartialEq)]
pub struct IterResult {
    pub value: Value,
    pub done: bool,
}

impl IterResult {
    pub fn new(value: impl Into<Value>, done: bool) -> Self {
        IterResult { value: value.into(), done }
    }

    pub fn yielded(value: impl Into<Value>) -> Self {
        IterResult::new(value, false)
    }

    /// `{ done: true }` with the value left undefined.
    pub fn done() -> Self {
        IterResult {
            value: Value::Undefined,
            done: true,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        if let Some(v) = self.value.to_json() {
            obj.insert("value".to_string(), v);
        }
        obj.insert("done".to_string(), serde_json::Value::Bool(self.done));
        serde_json::Value::Object(obj)
    }
}

impl fmt::Display for IterResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl TryFrom<Value> for IterResult {
    type Error = GeneratorError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::IterResult(r) => Ok(*r),
            _ => Err(GeneratorError::type_error("Iterator result is not an object")),
        }
    }
}
