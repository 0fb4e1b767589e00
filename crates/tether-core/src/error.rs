//! Error types for Tether.

use std::fmt;

/// Errors that can occur during object operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    /// The property was not found on the object's class.
    PropertyNotFound {
        /// The property name that was looked up.
        name: String,
    },
    /// The property exists but is not readable.
    PropertyNotReadable {
        /// The property name.
        name: String,
    },
    /// The property exists but is not writable.
    PropertyNotWritable {
        /// The property name.
        name: String,
    },
    /// The supplied value cannot be converted to the property's type.
    PropertyTypeMismatch {
        /// The property name.
        name: String,
        /// The property's declared type name.
        expected: &'static str,
        /// The type name of the value that was supplied.
        got: &'static str,
    },
    /// The signal is not declared on the object's class.
    SignalNotFound {
        /// The signal name.
        name: String,
    },
    /// The detailed-signal string could not be parsed.
    InvalidDetailedSignal {
        /// The offending string.
        detailed: String,
    },
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PropertyNotFound { name } => write!(f, "Property '{name}' not found"),
            Self::PropertyNotReadable { name } => write!(f, "Property '{name}' is not readable"),
            Self::PropertyNotWritable { name } => write!(f, "Property '{name}' is not writable"),
            Self::PropertyTypeMismatch { name, expected, got } => {
                write!(f, "Property '{name}' type mismatch: expected {expected}, got {got}")
            }
            Self::SignalNotFound { name } => write!(f, "Signal '{name}' not declared"),
            Self::InvalidDetailedSignal { detailed } => {
                write!(f, "Invalid detailed signal '{detailed}'")
            }
        }
    }
}

impl std::error::Error for ObjectError {}

/// Result type for object operations.
pub type ObjectResult<T> = std::result::Result<T, ObjectError>;

/// Errors reported when a property binding cannot be constructed.
///
/// Construction fails closed: no half-valid binding is ever produced
/// (the error is also logged at `error` level at the rejection site).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    /// The named property does not exist on the endpoint's class.
    NoSuchProperty {
        /// Type name of the endpoint that was inspected.
        object_type: &'static str,
        /// The property name that was looked up.
        property: String,
    },
    /// The property must be readable for the requested direction.
    PropertyNotReadable {
        /// Type name of the endpoint.
        object_type: &'static str,
        /// The property name.
        property: String,
    },
    /// The property must be writable for the requested direction.
    PropertyNotWritable {
        /// Type name of the endpoint.
        object_type: &'static str,
        /// The property name.
        property: String,
    },
    /// INVERT_BOOLEAN requires two boolean properties and no custom transform.
    InvalidInvertBoolean,
    /// A property cannot be bound to itself on the same object.
    SelfBinding,
}

impl fmt::Display for BindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchProperty { object_type, property } => {
                write!(f, "Type '{object_type}' has no property named '{property}'")
            }
            Self::PropertyNotReadable { object_type, property } => {
                write!(f, "Property '{property}' on '{object_type}' is not readable")
            }
            Self::PropertyNotWritable { object_type, property } => {
                write!(f, "Property '{property}' on '{object_type}' is not writable")
            }
            Self::InvalidInvertBoolean => write!(
                f,
                "INVERT_BOOLEAN requires two boolean properties and no custom transforms"
            ),
            Self::SelfBinding => {
                write!(f, "Cannot bind a property to itself on the same object")
            }
        }
    }
}

impl std::error::Error for BindingError {}

/// The main error type for Tether operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TetherError {
    /// Object-related error.
    Object(ObjectError),
    /// Binding-related error.
    Binding(BindingError),
}

impl fmt::Display for TetherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(err) => write!(f, "Object error: {err}"),
            Self::Binding(err) => write!(f, "Binding error: {err}"),
        }
    }
}

impl std::error::Error for TetherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Object(err) => Some(err),
            Self::Binding(err) => Some(err),
        }
    }
}

impl From<ObjectError> for TetherError {
    fn from(err: ObjectError) -> Self {
        Self::Object(err)
    }
}

impl From<BindingError> for TetherError {
    fn from(err: BindingError) -> Self {
        Self::Binding(err)
    }
}

/// A specialized Result type for Tether operations.
pub type Result<T> = std::result::Result<T, TetherError>;
