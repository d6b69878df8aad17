//! Runtime values carried through bindings and materialized rows.
//!
//! `Value` is the single dynamic type that flows through the whole query
//! path: staged bindings, fetched row fields, IN-list inputs and relation
//! attachments. Scalar variants bind to statement placeholders; the
//! container variants (`List`, `Row`, `Rows`) never do — binding one is an
//! `InvalidArgument` at the driver seam.

use serde::{Deserialize, Serialize};

use crate::row::Row;

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Signed integer.
    Int(i64),
    /// Double-precision float.
    Double(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes (blob columns, or text that failed UTF-8 validation).
    Bytes(Vec<u8>),
    /// Flat list of scalars; accepted by the `IN (...)` builders only.
    List(Vec<Value>),
    /// A related row attached by the relation engine.
    Row(Box<Row>),
    /// Related rows attached by a to-many relation.
    Rows(Vec<Row>),
}

impl Value {
    /// Whether this value can be bound to a single statement placeholder.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::List(_) | Value::Row(_) | Value::Rows(_))
    }

    /// The value as a signed integer, with lenient text parsing.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Double(d) => Some(*d as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// The value as text, when it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The value as a float, with lenient text parsing.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Short tag used in error messages.
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Row(_) => "row",
            Value::Rows(_) => "rows",
        }
    }

    /// Canonical string form used for cache keys and relation join indexes.
    ///
    /// Scalars render as their plain text form; `Null` and the container
    /// variants render empty (containers never participate in a key).
    pub(crate) fn key_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Text(s) => s.clone(),
            Value::Bytes(b) => b.iter().map(|byte| format!("{byte:02x}")).collect(),
            Value::List(values) => values
                .iter()
                .map(Value::key_string)
                .collect::<Vec<_>>()
                .join(","),
            Value::Row(_) | Value::Rows(_) => String::new(),
        }
    }
}

macro_rules! int_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Int(value as i64)
                }
            }
        )*
    };
}

int_from!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Double(f64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_detection() {
        assert!(Value::Int(1).is_scalar());
        assert!(Value::Text("a".into()).is_scalar());
        assert!(Value::Null.is_scalar());
        assert!(!Value::List(vec![]).is_scalar());
        assert!(!Value::Rows(vec![]).is_scalar());
    }

    #[test]
    fn test_key_string_scalars() {
        assert_eq!(Value::Int(42).key_string(), "42");
        assert_eq!(Value::Text("abc".into()).key_string(), "abc");
        assert_eq!(Value::Null.key_string(), "");
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).key_string(), "dead");
    }

    #[test]
    fn test_key_string_list_joins_with_comma() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(list.key_string(), "1,2");
    }

    #[test]
    fn test_from_impls() {
        assert_eq!(Value::from(5i32), Value::Int(5));
        assert_eq!(Value::from(5u64), Value::Int(5));
        assert_eq!(Value::from(1.5f64), Value::Double(1.5));
        assert_eq!(Value::from("x"), Value::Text("x".into()));
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(
            Value::from(vec![1, 2]),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_lenient_int_parsing() {
        assert_eq!(Value::Text(" 7 ".into()).as_int(), Some(7));
        assert_eq!(Value::Text("x".into()).as_int(), None);
        assert_eq!(Value::Double(3.9).as_int(), Some(3));
    }
}
