use thiserror::Error;

/// Errors raised while declaring, building, calling or parsing functions.
///
/// Every failure is reported synchronously to the immediate caller; nothing
/// is retried and nothing is partially applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FunctionError {
    /// A function class could not be declared (malformed declaration, or the
    /// declared parameters do not match the ones consumed by the evaluation rule).
    #[error("Definition of function {function} is invalid: {reason}")]
    Definition { function: String, reason: String },

    #[error("Function {name} is not known. Known functions are: {known}")]
    UnknownFunction { name: String, known: String },

    #[error("{parameter} is not a parameter of function {function}")]
    UnknownParameter { function: String, parameter: String },

    /// A unit specifier could not be resolved, units were missing from a
    /// unit-checked call, or two quantities had incompatible dimensions.
    #[error("Unit error: {0}")]
    Unit(String),

    /// Structural misuse of the API, or unsafe/unparseable expression text.
    #[error("Design violation: {0}")]
    DesignViolation(String),

    #[error("Value {value} for parameter {parameter} is outside its bounds [{min}, {max}]")]
    ParameterOutOfBounds {
        parameter: String,
        value: f64,
        min: String,
        max: String,
    },

    #[error("Input shapes are incompatible: {0}")]
    Shape(String),
}

impl FunctionError {
    pub(crate) fn definition(function: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Definition {
            function: function.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown_parameter(
        function: impl Into<String>,
        parameter: impl Into<String>,
    ) -> Self {
        Self::UnknownParameter {
            function: function.into(),
            parameter: parameter.into(),
        }
    }

    pub(crate) fn unit(message: impl Into<String>) -> Self {
        Self::Unit(message.into())
    }

    pub(crate) fn design(message: impl Into<String>) -> Self {
        Self::DesignViolation(message.into())
    }
}

pub type Result<T, E = FunctionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_items() {
        let err = FunctionError::unknown_parameter("powerlaw", "Q");
        assert_eq!(err.to_string(), "Q is not a parameter of function powerlaw");

        let err = FunctionError::definition("line", "missing desc");
        assert!(err.to_string().contains("line"));
        assert!(err.to_string().contains("missing desc"));
    }
}
