use jitlink::Error;
use pyo3::exceptions::{PyRuntimeError, PyTypeError, PyValueError};
use pyo3::PyErr;

/// Maps marshalling failures to `TypeError`/`ValueError` and engine failures to
/// `RuntimeError`, keeping the message.
pub(crate) fn to_py_err(err: Error) -> PyErr {
    let message = err.to_string();
    match err {
        Error::UnsupportedType { .. } | Error::DTypeMismatch { .. } => PyTypeError::new_err(message),
        Error::ShapeMismatch { .. }
        | Error::RankMismatch { .. }
        | Error::Marshal { .. }
        | Error::UnknownEngine { .. }
        | Error::Config { .. } => PyValueError::new_err(message),
        Error::NativeExecution { .. }
        | Error::MethodNotFound { .. }
        | Error::ArgumentMissing { .. }
        | Error::EngineLibrary { .. } => PyRuntimeError::new_err(message),
    }
}
