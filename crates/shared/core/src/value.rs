use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("signal values cannot be objects")]
    Object,
}

/// Value carried by a signal.
///
/// The protocol is schema-less, so a signal holds any JSON scalar or an
/// ordered list of them. Objects are not signal values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum SignalValue {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
    List(Vec<SignalValue>),
}

impl SignalValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SignalValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SignalValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SignalValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Float constructor. NaN and infinities have no JSON form and become `Null`.
    pub fn from_f64(value: f64) -> Self {
        Number::from_f64(value)
            .map(SignalValue::Number)
            .unwrap_or(SignalValue::Null)
    }
}

impl TryFrom<Value> for SignalValue {
    type Error = ValueError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Null => SignalValue::Null,
            Value::Bool(b) => SignalValue::Bool(b),
            Value::Number(n) => SignalValue::Number(n),
            Value::String(s) => SignalValue::Text(s),
            Value::Array(items) => SignalValue::List(
                items
                    .into_iter()
                    .map(SignalValue::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(_) => return Err(ValueError::Object),
        })
    }
}

impl From<SignalValue> for Value {
    fn from(value: SignalValue) -> Self {
        match value {
            SignalValue::Null => Value::Null,
            SignalValue::Bool(b) => Value::Bool(b),
            SignalValue::Number(n) => Value::Number(n),
            SignalValue::Text(s) => Value::String(s),
            SignalValue::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
        }
    }
}

impl From<bool> for SignalValue {
    fn from(value: bool) -> Self {
        SignalValue::Bool(value)
    }
}

impl From<i64> for SignalValue {
    fn from(value: i64) -> Self {
        SignalValue::Number(value.into())
    }
}

impl From<u64> for SignalValue {
    fn from(value: u64) -> Self {
        SignalValue::Number(value.into())
    }
}

impl From<f64> for SignalValue {
    fn from(value: f64) -> Self {
        SignalValue::from_f64(value)
    }
}

impl From<&str> for SignalValue {
    fn from(value: &str) -> Self {
        SignalValue::Text(value.to_string())
    }
}

impl From<String> for SignalValue {
    fn from(value: String) -> Self {
        SignalValue::Text(value)
    }
}

impl fmt::Display for SignalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::from(self.clone()))
    }
}
