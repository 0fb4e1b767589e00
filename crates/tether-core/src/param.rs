//! Property specifications.
//!
//! A [`ParamSpec`] describes one property of an object class: its name, value
//! type, access flags, default and optional numeric bounds. Specs are handed
//! around as `Arc<ParamSpec>` and compared by pointer identity; the notify
//! queue and bindings both rely on a class exposing exactly one spec per
//! property name.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::logging::targets;
use crate::value::{Value, ValueType};

/// Access flags for a property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamFlags {
    /// The property can be read with `Object::property`.
    pub readable: bool,
    /// The property can be written with `Object::set_property`.
    pub writable: bool,
    /// The setter emits change notifications itself; the generic
    /// `set_property` path will not queue an implicit one.
    pub explicit_notify: bool,
}

impl ParamFlags {
    /// Readable and writable.
    pub const READWRITE: Self = Self { readable: true, writable: true, explicit_notify: false };

    /// Readable only.
    pub const READABLE: Self = Self { readable: true, writable: false, explicit_notify: false };

    /// Writable only.
    pub const WRITABLE: Self = Self { readable: false, writable: true, explicit_notify: false };

    /// Mark notification as handled by the setter.
    pub fn with_explicit_notify(mut self) -> Self {
        self.explicit_notify = true;
        self
    }
}

impl Default for ParamFlags {
    fn default() -> Self {
        Self::READWRITE
    }
}

/// Specification of a single property.
pub struct ParamSpec {
    name: String,
    value_type: ValueType,
    flags: ParamFlags,
    default_value: Value,
    minimum: Option<Value>,
    maximum: Option<Value>,
}

impl ParamSpec {
    fn new(
        name: &str,
        value_type: ValueType,
        flags: ParamFlags,
        default_value: Value,
        minimum: Option<Value>,
        maximum: Option<Value>,
    ) -> Arc<Self> {
        if !is_valid_name(name) {
            warn!(
                target: targets::CORE,
                name,
                "property name should start with a letter and contain only \
                 letters, digits, '-' or '_'"
            );
        }
        Arc::new(Self {
            name: name.to_string(),
            value_type,
            flags,
            default_value,
            minimum,
            maximum,
        })
    }

    /// A boolean property.
    pub fn boolean(name: &str, default: bool, flags: ParamFlags) -> Arc<Self> {
        Self::new(name, ValueType::Bool, flags, Value::Bool(default), None, None)
    }

    /// A signed integer property with inclusive bounds.
    pub fn int(name: &str, minimum: i64, maximum: i64, default: i64, flags: ParamFlags) -> Arc<Self> {
        Self::new(
            name,
            ValueType::I64,
            flags,
            Value::I64(default),
            Some(Value::I64(minimum)),
            Some(Value::I64(maximum)),
        )
    }

    /// An unsigned integer property with inclusive bounds.
    pub fn uint(name: &str, minimum: u64, maximum: u64, default: u64, flags: ParamFlags) -> Arc<Self> {
        Self::new(
            name,
            ValueType::U64,
            flags,
            Value::U64(default),
            Some(Value::U64(minimum)),
            Some(Value::U64(maximum)),
        )
    }

    /// A floating-point property with inclusive bounds.
    pub fn double(name: &str, minimum: f64, maximum: f64, default: f64, flags: ParamFlags) -> Arc<Self> {
        Self::new(
            name,
            ValueType::F64,
            flags,
            Value::F64(default),
            Some(Value::F64(minimum)),
            Some(Value::F64(maximum)),
        )
    }

    /// A string property.
    pub fn string(name: &str, default: &str, flags: ParamFlags) -> Arc<Self> {
        Self::new(name, ValueType::Str, flags, Value::Str(default.to_string()), None, None)
    }

    /// An object-reference property. Defaults to null.
    pub fn object(name: &str, flags: ParamFlags) -> Arc<Self> {
        Self::new(name, ValueType::Object, flags, Value::Object(None), None, None)
    }

    /// The property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The property's value type.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// The property's access flags.
    pub fn flags(&self) -> ParamFlags {
        self.flags
    }

    /// The default value.
    pub fn default_value(&self) -> &Value {
        &self.default_value
    }

    /// Clamp `value` into this spec's bounds.
    ///
    /// Returns `true` when the value was already valid, `false` when it was
    /// modified. The value's type must already match `value_type`.
    pub fn validate(&self, value: &mut Value) -> bool {
        debug_assert_eq!(value.value_type(), self.value_type);
        match (value, &self.minimum, &self.maximum) {
            (Value::I64(v), min, max) => clamp_scalar(v, min, max, Value::as_i64),
            (Value::U64(v), min, max) => clamp_scalar(v, min, max, Value::as_u64),
            (Value::F64(v), min, max) => clamp_scalar(v, min, max, Value::as_f64),
            _ => true,
        }
    }
}

fn clamp_scalar<T: PartialOrd + Copy>(
    v: &mut T,
    min: &Option<Value>,
    max: &Option<Value>,
    extract: impl Fn(&Value) -> Option<T>,
) -> bool {
    let mut valid = true;
    if let Some(min) = min.as_ref().and_then(&extract) {
        if *v < min {
            *v = min;
            valid = false;
        }
    }
    if let Some(max) = max.as_ref().and_then(&extract) {
        if *v > max {
            *v = max;
            valid = false;
        }
    }
    valid
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamSpec")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_clamps_to_bounds() {
        let spec = ParamSpec::int("count", 0, 100, 10, ParamFlags::READWRITE);
        let mut v = Value::I64(250);
        assert!(!spec.validate(&mut v));
        assert_eq!(v, Value::I64(100));

        let mut v = Value::I64(-3);
        assert!(!spec.validate(&mut v));
        assert_eq!(v, Value::I64(0));

        let mut v = Value::I64(42);
        assert!(spec.validate(&mut v));
        assert_eq!(v, Value::I64(42));
    }

    #[test]
    fn test_double_bounds() {
        let spec = ParamSpec::double("ratio", 0.0, 1.0, 0.5, ParamFlags::READWRITE);
        let mut v = Value::F64(1.5);
        assert!(!spec.validate(&mut v));
        assert_eq!(v, Value::F64(1.0));
    }

    #[test]
    fn test_unbounded_types_always_valid() {
        let spec = ParamSpec::string("label", "", ParamFlags::READWRITE);
        let mut v = Value::Str("anything".into());
        assert!(spec.validate(&mut v));
    }

    #[test]
    fn test_name_validation() {
        assert!(is_valid_name("text"));
        assert!(is_valid_name("line-width"));
        assert!(is_valid_name("line_width2"));
        assert!(!is_valid_name("2fast"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("has space"));
    }

    #[test]
    fn test_identity_is_pointer_identity() {
        let a = ParamSpec::boolean("visible", false, ParamFlags::READWRITE);
        let b = ParamSpec::boolean("visible", false, ParamFlags::READWRITE);
        assert!(Arc::ptr_eq(&a, &a.clone()));
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
