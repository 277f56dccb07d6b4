use jitlink::engine::MethodArgument;
use jitlink::{Module, Value};
use pyo3::exceptions::PyTypeError;
use pyo3::prelude::*;
use pyo3::types::{PyList, PyTuple};

use crate::engine::current_engine;
use crate::errors::to_py_err;
use crate::tensor::PyTensor;

/// Python-exposed compiled script module
#[pyclass(name = "Module")]
pub struct PyScriptModule {
    inner: Module,
}

/// Converts a call argument into a value tree.
///
/// Tensors are cloned through the engine so the Python object keeps its own handle.
fn to_value(obj: &Bound<'_, PyAny>) -> PyResult<Value> {
    if let Ok(tensor) = obj.downcast::<PyTensor>() {
        let tensor = tensor.borrow();
        return tensor.tensor().try_clone().map(Value::from).map_err(to_py_err);
    }
    if let Ok(tuple) = obj.downcast::<PyTuple>() {
        return tuple
            .iter()
            .map(|item| to_value(&item))
            .collect::<PyResult<Vec<_>>>()
            .map(Value::from);
    }
    if let Ok(list) = obj.downcast::<PyList>() {
        return list
            .iter()
            .map(|item| to_value(&item))
            .collect::<PyResult<Vec<_>>>()
            .map(Value::from);
    }
    Err(PyTypeError::new_err(format!(
        "unsupported argument type {}; expected Tensor or tuple",
        obj.get_type().name()?
    )))
}

fn to_python(py: Python<'_>, value: Value) -> PyResult<PyObject> {
    match value {
        Value::Tensor(tensor) => Ok(Py::new(py, PyTensor::new(tensor))?.into_py(py)),
        Value::Tuple(items) => {
            let items = items
                .into_iter()
                .map(|item| to_python(py, item))
                .collect::<PyResult<Vec<_>>>()?;
            Ok(PyTuple::new_bound(py, items).into_py(py))
        }
    }
}

fn schema(arguments: Vec<MethodArgument>) -> Vec<(String, String)> {
    arguments
        .into_iter()
        .map(|argument| (argument.name, argument.type_name))
        .collect()
}

impl PyScriptModule {
    fn call(&self, py: Python<'_>, name: &str, args: &Bound<'_, PyTuple>) -> PyResult<PyObject> {
        let values = args
            .iter()
            .map(|arg| to_value(&arg))
            .collect::<PyResult<Vec<_>>>()?;
        let result = self.inner.run_method(name, &values).map_err(to_py_err)?;
        to_python(py, result)
    }
}

#[pymethods]
impl PyScriptModule {
    /// Compile script source on the current engine
    #[staticmethod]
    fn compile(source: &str) -> PyResult<Self> {
        let engine = current_engine()?;
        let inner = Module::compile(&engine, source).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Load a module previously written with `save`
    #[staticmethod]
    fn load(path: &str) -> PyResult<Self> {
        let engine = current_engine()?;
        let inner = Module::load(&engine, path).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    fn save(&self, path: &str) -> PyResult<()> {
        self.inner.save(path).map_err(to_py_err)
    }

    fn method_names(&self) -> Vec<String> {
        self.inner.method_names()
    }

    /// Declared arguments of `name` as `(name, type)` pairs
    fn arguments(&self, name: &str) -> PyResult<Vec<(String, String)>> {
        let method = self.inner.method(name).map_err(to_py_err)?;
        method.arguments().map(schema).map_err(to_py_err)
    }

    /// Declared returns of `name` as `(name, type)` pairs
    fn returns(&self, name: &str) -> PyResult<Vec<(String, String)>> {
        let method = self.inner.method(name).map_err(to_py_err)?;
        method.returns().map(schema).map_err(to_py_err)
    }

    #[pyo3(signature = (name, *args))]
    fn run_method(&self, py: Python<'_>, name: &str, args: &Bound<'_, PyTuple>) -> PyResult<PyObject> {
        self.call(py, name, args)
    }

    #[pyo3(signature = (*args))]
    fn forward(&self, py: Python<'_>, args: &Bound<'_, PyTuple>) -> PyResult<PyObject> {
        self.call(py, "forward", args)
    }

    #[pyo3(signature = (*args))]
    fn __call__(&self, py: Python<'_>, args: &Bound<'_, PyTuple>) -> PyResult<PyObject> {
        self.call(py, "forward", args)
    }

    fn __repr__(&self) -> String {
        format!(
            "Module(engine={}, methods={:?})",
            self.inner.engine().name(),
            self.inner.method_names()
        )
    }
}
