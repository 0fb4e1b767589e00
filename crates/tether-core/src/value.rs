//! Dynamically typed values.
//!
//! [`Value`] is the currency of the property system: property getters return
//! one, setters accept one, and binding transforms map one to another. The
//! supported shapes are deliberately few; this is a seam for the property and
//! binding machinery, not a general serialization type.
//!
//! Cross-type conversion is provided by [`Value::transform`], covering the
//! conversions the runtime needs (numeric widening/narrowing, boolean to
//! number, anything to its display string).

use std::fmt;

use crate::object::ObjectRef;

/// Type tag for a [`Value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// A boolean.
    Bool,
    /// A signed 64-bit integer.
    I64,
    /// An unsigned 64-bit integer.
    U64,
    /// A double-precision float.
    F64,
    /// A UTF-8 string.
    Str,
    /// An optional strong object reference.
    Object,
}

impl ValueType {
    /// A short stable name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::F64 => "f64",
            Self::Str => "string",
            Self::Object => "object",
        }
    }

    /// Whether this type is numeric (transformable to other numerics).
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::I64 | Self::U64 | Self::F64)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A dynamically typed value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A boolean.
    Bool(bool),
    /// A signed 64-bit integer.
    I64(i64),
    /// An unsigned 64-bit integer.
    U64(u64),
    /// A double-precision float.
    F64(f64),
    /// A UTF-8 string.
    Str(String),
    /// An optional strong object reference.
    Object(Option<ObjectRef>),
}

impl Value {
    /// The type tag of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::I64(_) => ValueType::I64,
            Self::U64(_) => ValueType::U64,
            Self::F64(_) => ValueType::F64,
            Self::Str(_) => ValueType::Str,
            Self::Object(_) => ValueType::Object,
        }
    }

    /// Get the boolean payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the signed integer payload, if this is an `I64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the unsigned integer payload, if this is a `U64`.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the float payload, if this is an `F64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the string payload, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get the object payload, if this is an `Object`.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(obj) => obj.as_ref(),
            _ => None,
        }
    }

    /// Convert this value to the given type.
    ///
    /// Returns `None` when no conversion exists. Identity conversions always
    /// succeed. Numeric conversions saturate/truncate the way `as` casts do;
    /// booleans convert to 0/1 and numerics to `false`/`true` by zero test;
    /// every non-object value renders to a string.
    pub fn transform(&self, to: ValueType) -> Option<Value> {
        if self.value_type() == to {
            return Some(self.clone());
        }
        match (self, to) {
            (Self::Bool(b), ValueType::I64) => Some(Self::I64(i64::from(*b))),
            (Self::Bool(b), ValueType::U64) => Some(Self::U64(u64::from(*b))),
            (Self::Bool(b), ValueType::F64) => Some(Self::F64(if *b { 1.0 } else { 0.0 })),

            (Self::I64(v), ValueType::Bool) => Some(Self::Bool(*v != 0)),
            (Self::I64(v), ValueType::U64) => Some(Self::U64(*v as u64)),
            (Self::I64(v), ValueType::F64) => Some(Self::F64(*v as f64)),

            (Self::U64(v), ValueType::Bool) => Some(Self::Bool(*v != 0)),
            (Self::U64(v), ValueType::I64) => Some(Self::I64(*v as i64)),
            (Self::U64(v), ValueType::F64) => Some(Self::F64(*v as f64)),

            (Self::F64(v), ValueType::Bool) => Some(Self::Bool(*v != 0.0)),
            (Self::F64(v), ValueType::I64) => Some(Self::I64(*v as i64)),
            (Self::F64(v), ValueType::U64) => Some(Self::U64(*v as u64)),

            (Self::Bool(_) | Self::I64(_) | Self::U64(_) | Self::F64(_), ValueType::Str) => {
                Some(Self::Str(self.to_string()))
            }

            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
            Self::Object(Some(obj)) => write!(f, "<{}>", obj.class().type_name()),
            Self::Object(None) => f.write_str("<null>"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::U64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Self::Object(Some(v))
    }
}

impl From<Option<ObjectRef>> for Value {
    fn from(v: Option<ObjectRef>) -> Self {
        Self::Object(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let v = Value::I64(7);
        assert_eq!(v.transform(ValueType::I64), Some(Value::I64(7)));
    }

    #[test]
    fn test_numeric_transforms() {
        assert_eq!(Value::I64(3).transform(ValueType::F64), Some(Value::F64(3.0)));
        assert_eq!(Value::F64(2.9).transform(ValueType::I64), Some(Value::I64(2)));
        assert_eq!(Value::U64(1).transform(ValueType::Bool), Some(Value::Bool(true)));
        assert_eq!(Value::Bool(true).transform(ValueType::I64), Some(Value::I64(1)));
    }

    #[test]
    fn test_string_rendering() {
        assert_eq!(
            Value::F64(21.5).transform(ValueType::Str),
            Some(Value::Str("21.5".to_string()))
        );
        assert_eq!(
            Value::Bool(false).transform(ValueType::Str),
            Some(Value::Str("false".to_string()))
        );
    }

    #[test]
    fn test_no_transform_from_string() {
        // Strings do not parse back into numerics.
        assert_eq!(Value::Str("42".into()).transform(ValueType::I64), None);
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Bool(true).as_i64(), None);
        assert_eq!(Value::Str("x".into()).as_str(), Some("x"));
        assert!(Value::Object(None).as_object().is_none());
    }
}
