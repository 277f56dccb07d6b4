//! Error taxonomy shared by the codec, the boundary converter, and method invocation.
//!
//! Marshalling failures (the caller's data did not fit the declared shape/dtype, or the
//! boundary could not be built) are kept apart from native failures (the engine rejected
//! the call) so callers can tell "fix the input" from "fix the script".

use std::path::PathBuf;

use thiserror::Error;

use crate::tensor::DType;

/// Convenience alias for results returned by jitlink routines.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A host scalar kind has no dtype mapping.
    #[error("unsupported type {type_name}")]
    UnsupportedType { type_name: String },

    /// A sequence length does not match the expected shape dimension.
    #[error("mismatched sequence lengths: {actual} and {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// The nesting depth of a value does not match the rank of the target shape.
    #[error("value nesting depth {actual} does not match shape rank {expected}")]
    RankMismatch { expected: usize, actual: usize },

    /// A scalar's kind disagrees with the dtype it is encoded as or decoded from.
    #[error("expected {expected:?} element but found {actual}")]
    DTypeMismatch { expected: DType, actual: String },

    /// Boundary node or buffer construction/destruction failed.
    #[error("marshal error: {message}")]
    Marshal { message: String },

    /// The native engine reported a failure; the message is the engine's text verbatim.
    #[error("{message}")]
    NativeExecution { message: String },

    /// The engine has no method of the requested name.
    #[error("{message}")]
    MethodNotFound { message: String },

    /// A declared method argument was not supplied.
    #[error("{message}")]
    ArgumentMissing { message: String },

    /// The engine shared library could not be opened or lacks a required symbol.
    #[error("failed to load engine library {}: {source}", path.display())]
    EngineLibrary {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    /// No engine is registered under the requested name.
    #[error("unknown engine '{name}'. Available engines: {}", available.join(", "))]
    UnknownEngine {
        name: String,
        available: Vec<String>,
    },

    /// The process configuration cannot satisfy the request.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl Error {
    pub fn marshal(message: impl Into<String>) -> Self {
        Error::Marshal {
            message: message.into(),
        }
    }

    pub fn unsupported(type_name: impl Into<String>) -> Self {
        Error::UnsupportedType {
            type_name: type_name.into(),
        }
    }

    /// Classifies an engine-reported message into the schema or execution variants.
    ///
    /// The message is kept verbatim in every variant.
    pub fn from_native(err: crate::engine::NativeError) -> Self {
        let message = err.into_message();
        if is_method_not_found(&message) {
            Error::MethodNotFound { message }
        } else if is_argument_missing(&message) {
            Error::ArgumentMissing { message }
        } else {
            Error::NativeExecution { message }
        }
    }

    /// Returns `true` when the failure came from the caller's data or the boundary itself.
    pub fn is_marshal(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedType { .. }
                | Error::ShapeMismatch { .. }
                | Error::RankMismatch { .. }
                | Error::DTypeMismatch { .. }
                | Error::Marshal { .. }
        )
    }

    /// Returns `true` when the native engine rejected the request.
    pub fn is_native(&self) -> bool {
        matches!(
            self,
            Error::NativeExecution { .. }
                | Error::MethodNotFound { .. }
                | Error::ArgumentMissing { .. }
        )
    }
}

fn is_method_not_found(message: &str) -> bool {
    message.starts_with("Method '") && message.contains("is not defined")
}

fn is_argument_missing(message: &str) -> bool {
    message.contains("is missing value for argument")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NativeError;

    #[test]
    fn native_messages_are_classified_verbatim() {
        let err = Error::from_native(NativeError::new("Method 'nope' is not defined."));
        assert!(matches!(err, Error::MethodNotFound { .. }));
        assert_eq!(err.to_string(), "Method 'nope' is not defined.");

        let msg = "sum() is missing value for argument 'b'. Declaration: sum(Tensor a, Tensor b) -> Tensor";
        let err = Error::from_native(NativeError::new(msg));
        assert!(matches!(err, Error::ArgumentMissing { .. }));
        assert_eq!(err.to_string(), msg);

        let err = Error::from_native(NativeError::new("shape mismatch in add"));
        assert!(matches!(err, Error::NativeExecution { .. }));
        assert!(err.is_native());
        assert!(!err.is_marshal());
    }

    #[test]
    fn shape_mismatch_names_both_lengths() {
        let err = Error::ShapeMismatch {
            expected: 3,
            actual: 2,
        };
        assert_eq!(err.to_string(), "mismatched sequence lengths: 2 and 3");
        assert!(err.is_marshal());
    }
}
