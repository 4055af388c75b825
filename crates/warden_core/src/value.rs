//! Tri-state evaluation results.
//!
//! Every expression evaluation produces a [`Val`]: a defined JSON value, an
//! evaluation error, or undefined. Errors carry an optional trace describing
//! the operator that produced them.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Trace node attached to an error value, naming the operator that produced
/// it and the values that went into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    /// Operator or component that produced the error
    pub operator: String,
    /// Named argument values at the time of the error
    pub arguments: Vec<(String, Val)>,
}

/// Result of an expression evaluation.
///
/// Exactly one variant is active. Equality is structural so values can be
/// deduplicated and cached; traces do not participate in hashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "UPPERCASE")]
pub enum Val {
    /// A defined JSON value
    Value(Json),
    /// An evaluation error
    Error {
        /// Human-readable error message
        message: String,
        /// Optional trace of the failing operator
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trace: Option<Box<Trace>>,
    },
    /// No value
    Undefined,
}

impl Val {
    /// Wrap a JSON value
    #[must_use]
    pub fn of(value: impl Into<Json>) -> Self {
        Self::Value(value.into())
    }

    /// Boolean value
    #[must_use]
    pub fn of_bool(value: bool) -> Self {
        Self::Value(Json::Bool(value))
    }

    /// JSON null value
    #[must_use]
    pub fn null() -> Self {
        Self::Value(Json::Null)
    }

    /// Error value with the given message
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            trace: None,
        }
    }

    /// Undefined value
    #[must_use]
    pub fn undefined() -> Self {
        Self::Undefined
    }

    /// Attach a trace to an error value. Non-error values are returned
    /// unchanged, they carry no trace.
    #[must_use]
    pub fn with_trace(self, operator: impl Into<String>, arguments: Vec<(String, Val)>) -> Self {
        match self {
            Self::Error { message, .. } => Self::Error {
                message,
                trace: Some(Box::new(Trace {
                    operator: operator.into(),
                    arguments,
                })),
            },
            other => other,
        }
    }

    /// True if this is a defined value
    #[must_use]
    pub fn is_defined(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// True if this is an error
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// True if this is undefined
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// True if this is a defined boolean
    #[must_use]
    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::Value(Json::Bool(_)))
    }

    /// The defined value, if any
    #[must_use]
    pub fn get(&self) -> Option<&Json> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The error message, if this is an error
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Extract the boolean, or a type-mismatch error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::TypeMismatch`] if the value is not a
    /// defined boolean, or [`crate::EngineError::Evaluation`] wrapping an
    /// error value.
    pub fn boolean_or_err(&self) -> Result<bool, crate::EngineError> {
        match self {
            Self::Value(Json::Bool(b)) => Ok(*b),
            Self::Value(other) => Err(crate::EngineError::TypeMismatch {
                expected: "BOOLEAN".to_string(),
                actual: json_type_name(other).to_string(),
            }),
            Self::Error { message, .. } => Err(crate::EngineError::Evaluation {
                message: message.clone(),
            }),
            Self::Undefined => Err(crate::EngineError::TypeMismatch {
                expected: "BOOLEAN".to_string(),
                actual: "undefined".to_string(),
            }),
        }
    }

    /// Map this value to itself if it is a boolean or an error, otherwise to
    /// a type-mismatch error naming the offending type.
    #[must_use]
    pub fn require_boolean(self) -> Self {
        match self {
            Self::Value(Json::Bool(_)) | Self::Error { .. } => self,
            Self::Value(other) => Self::error(format!(
                "Type mismatch. Boolean operation expects boolean values, but got: '{}'.",
                json_type_name(&other)
            )),
            Self::Undefined => Self::error(
                "Type mismatch. Boolean operation expects boolean values, but got: 'undefined'.",
            ),
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{}", v),
            Self::Error { message, .. } => write!(f, "ERROR[{}]", message),
            Self::Undefined => write!(f, "undefined"),
        }
    }
}

impl Hash for Val {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Value(v) => {
                state.write_u8(0);
                hash_json(v, state);
            }
            Self::Error { message, .. } => {
                state.write_u8(1);
                message.hash(state);
            }
            Self::Undefined => state.write_u8(2),
        }
    }
}

/// Name of a JSON value's type, used in type-mismatch messages.
#[must_use]
pub fn json_type_name(value: &Json) -> &'static str {
    match value {
        Json::Null => "NULL",
        Json::Bool(_) => "BOOLEAN",
        Json::Number(_) => "NUMBER",
        Json::String(_) => "STRING",
        Json::Array(_) => "ARRAY",
        Json::Object(_) => "OBJECT",
    }
}

/// Structural hash of a JSON value.
///
/// `serde_json::Value` does not implement `Hash`, so tree-walking is done
/// here. Numbers hash through their canonical display form.
pub fn hash_json<H: Hasher>(value: &Json, state: &mut H) {
    match value {
        Json::Null => state.write_u8(0),
        Json::Bool(b) => {
            state.write_u8(1);
            b.hash(state);
        }
        Json::Number(n) => {
            state.write_u8(2);
            n.to_string().hash(state);
        }
        Json::String(s) => {
            state.write_u8(3);
            s.hash(state);
        }
        Json::Array(items) => {
            state.write_u8(4);
            state.write_usize(items.len());
            for item in items {
                hash_json(item, state);
            }
        }
        Json::Object(map) => {
            state.write_u8(5);
            state.write_usize(map.len());
            for (key, item) in map {
                key.hash(state);
                hash_json(item, state);
            }
        }
    }
}
