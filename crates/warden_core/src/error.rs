//! Error taxonomy for the authorization engine.

use crate::value::Val;

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors produced while compiling or evaluating policies.
///
/// Expression-level failures never abort the pipeline; they are converted
/// into error [`Val`]s and flow through the operators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Operator applied to the wrong kind of value
    #[error("Type mismatch. Expected {expected}, but got: '{actual}'.")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        actual: String,
    },

    /// External attribute source failure
    #[error("Attribute resolution error. Attribute '{attribute}': {reason}")]
    AttributeResolution {
        /// Fully qualified attribute name
        attribute: String,
        /// Failure description
        reason: String,
    },

    /// Arithmetic or logic failure during evaluation
    #[error("Evaluation error: {message}")]
    Evaluation {
        /// Failure description
        message: String,
    },

    /// Malformed target formula at policy-set build time
    #[error("Index compilation failed for policy '{policy}': {reason}")]
    IndexCompilation {
        /// Name of the offending policy
        policy: String,
        /// Failure description
        reason: String,
    },
}

impl From<EngineError> for Val {
    fn from(err: EngineError) -> Self {
        Val::error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::TypeMismatch {
            expected: "BOOLEAN".to_string(),
            actual: "STRING".to_string(),
        };
        assert_eq!(err.to_string(), "Type mismatch. Expected BOOLEAN, but got: 'STRING'.");

        let err = EngineError::Evaluation {
            message: "Division by zero".to_string(),
        };
        assert!(err.to_string().contains("Division by zero"));
    }

    #[test]
    fn test_error_becomes_error_val() {
        let err = EngineError::AttributeResolution {
            attribute: "env.temperature".to_string(),
            reason: "source unavailable".to_string(),
        };
        let val: Val = err.into();
        assert!(val.is_error());
        assert!(val.error_message().unwrap().contains("env.temperature"));
    }
}
