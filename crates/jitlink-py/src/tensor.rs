use jitlink::{DType, Element, HostValue, Shape, Tensor};
use numpy::{PyArray, PyArrayDyn, PyArrayMethods, PyUntypedArrayMethods};
use pyo3::exceptions::{PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyFloat, PyList, PyLong, PyTuple};

use crate::engine::current_engine;
use crate::errors::to_py_err;

/// Python-exposed tensor owning a jitlink tensor handle
#[pyclass(name = "Tensor")]
pub struct PyTensor {
    inner: Tensor,
}

impl PyTensor {
    pub(crate) fn new(inner: Tensor) -> Self {
        Self { inner }
    }

    pub(crate) fn tensor(&self) -> &Tensor {
        &self.inner
    }
}

fn parse_dtype(name: &str) -> PyResult<DType> {
    Ok(match name {
        "uint8" | "byte" | "bool" => DType::Byte,
        "int8" | "char" => DType::Char,
        "int32" | "int" => DType::Int,
        "int64" | "long" => DType::Long,
        "float32" | "float" => DType::Float,
        "float64" | "double" => DType::Double,
        other => {
            return Err(PyTypeError::new_err(format!(
                "unsupported dtype: {other}. Supported types: uint8, int8, int32, int64, float32, float64"
            )))
        }
    })
}

fn dtype_name(dtype: DType) -> &'static str {
    match dtype {
        DType::Byte => "uint8",
        DType::Char => "int8",
        DType::Int => "int32",
        DType::Long => "int64",
        DType::Float => "float32",
        DType::Double => "float64",
    }
}

/// Converts a nested Python list/tuple into a host value.
///
/// Without an explicit dtype, `int` maps to int64 and `float` to float64.
fn to_host_value(obj: &Bound<'_, PyAny>, dtype: Option<DType>) -> PyResult<HostValue> {
    if let Ok(list) = obj.downcast::<PyList>() {
        return list
            .iter()
            .map(|item| to_host_value(&item, dtype))
            .collect::<PyResult<Vec<_>>>()
            .map(HostValue::List);
    }
    if let Ok(tuple) = obj.downcast::<PyTuple>() {
        return tuple
            .iter()
            .map(|item| to_host_value(&item, dtype))
            .collect::<PyResult<Vec<_>>>()
            .map(HostValue::List);
    }
    if obj.is_instance_of::<PyBool>() {
        let value: bool = obj.extract()?;
        return match dtype {
            None | Some(DType::Byte) => Ok(HostValue::Bool(value)),
            Some(other) => Err(PyTypeError::new_err(format!(
                "bool cannot be stored as {}",
                dtype_name(other)
            ))),
        };
    }
    if obj.is_instance_of::<PyLong>() || obj.is_instance_of::<PyFloat>() {
        let is_float = obj.is_instance_of::<PyFloat>();
        return Ok(match dtype.unwrap_or(if is_float { DType::Double } else { DType::Long }) {
            DType::Byte => HostValue::Byte(obj.extract()?),
            DType::Char => HostValue::Char(obj.extract()?),
            DType::Int => HostValue::Int(obj.extract()?),
            DType::Long => HostValue::Long(obj.extract()?),
            DType::Float => HostValue::Float(obj.extract::<f64>()? as f32),
            DType::Double => HostValue::Double(obj.extract()?),
        });
    }
    Err(PyTypeError::new_err(format!(
        "unsupported type {}",
        obj.get_type().name()?
    )))
}

fn to_python(py: Python<'_>, value: &HostValue) -> PyObject {
    match value {
        HostValue::Bool(v) => v.into_py(py),
        HostValue::Byte(v) => v.into_py(py),
        HostValue::Char(v) => v.into_py(py),
        HostValue::Int(v) => v.into_py(py),
        HostValue::Long(v) => v.into_py(py),
        HostValue::Float(v) => (*v as f64).into_py(py),
        HostValue::Double(v) => v.into_py(py),
        HostValue::List(items) => {
            PyList::new_bound(py, items.iter().map(|item| to_python(py, item))).into_py(py)
        }
    }
}

fn from_array<S>(arr: &Bound<'_, PyAny>) -> PyResult<Tensor>
where
    S: Element + numpy::Element,
{
    let array = arr.downcast::<PyArrayDyn<S>>()?;
    let shape = Shape::new(array.shape().to_vec());
    let data: Vec<S> = array.readonly().as_array().iter().copied().collect();
    let engine = current_engine()?;
    Tensor::from_flat(&engine, &data, &shape).map_err(to_py_err)
}

fn to_array<'py, S>(py: Python<'py>, tensor: &Tensor) -> PyResult<Bound<'py, PyAny>>
where
    S: Element + numpy::Element + jitlink::TensorData,
{
    let data = tensor.to_vec::<S>().map_err(to_py_err)?;
    Ok(PyArray::from_vec_bound(py, data)
        .reshape(tensor.shape().dims())?
        .into_any())
}

#[pymethods]
impl PyTensor {
    /// Create a Tensor from a nested list of numbers
    #[staticmethod]
    #[pyo3(signature = (data, dtype=None))]
    fn from_list(data: &Bound<'_, PyAny>, dtype: Option<&str>) -> PyResult<Self> {
        let dtype = dtype.map(parse_dtype).transpose()?;
        let value = to_host_value(data, dtype)?;
        let engine = current_engine()?;
        let tensor = match dtype {
            // An explicit dtype also covers bool and empty lists, which infer no dtype.
            Some(dtype) => {
                Tensor::from_host_value_with_shape(&engine, &value, &infer_shape(&value), dtype)
            }
            None => Tensor::from_host_value(&engine, &value),
        }
        .map_err(to_py_err)?;
        Ok(Self::new(tensor))
    }

    /// Create a Tensor from a NumPy array (always copies)
    #[staticmethod]
    fn from_numpy(arr: &Bound<'_, PyAny>) -> PyResult<Self> {
        let dtype_str = arr.getattr("dtype")?.str()?.extract::<String>()?;
        let tensor = match dtype_str.as_str() {
            "bool" => {
                let converted = arr.call_method1("astype", ("uint8",))?;
                from_array::<u8>(&converted)?
            }
            "uint8" => from_array::<u8>(arr)?,
            "int8" => from_array::<i8>(arr)?,
            "int32" => from_array::<i32>(arr)?,
            "int64" => from_array::<i64>(arr)?,
            "float32" => from_array::<f32>(arr)?,
            "float64" => from_array::<f64>(arr)?,
            other => {
                return Err(PyTypeError::new_err(format!(
                    "unsupported dtype: {other}. Supported types: bool, uint8, int8, int32, int64, float32, float64"
                )))
            }
        };
        Ok(Self::new(tensor))
    }

    /// Convert back to nested Python lists
    fn to_list(&self, py: Python<'_>) -> PyResult<PyObject> {
        let value = self.inner.host_value().map_err(to_py_err)?;
        Ok(to_python(py, &value))
    }

    /// Convert to a NumPy array (always copies)
    fn to_numpy<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyAny>> {
        match self.inner.dtype() {
            DType::Byte => to_array::<u8>(py, &self.inner),
            DType::Char => to_array::<i8>(py, &self.inner),
            DType::Int => to_array::<i32>(py, &self.inner),
            DType::Long => to_array::<i64>(py, &self.inner),
            DType::Float => to_array::<f32>(py, &self.inner),
            DType::Double => to_array::<f64>(py, &self.inner),
        }
    }

    /// Convert to NumPy array (convenience alias for to_numpy)
    fn numpy<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyAny>> {
        self.to_numpy(py)
    }

    fn clone(&self) -> PyResult<Self> {
        self.inner.try_clone().map(Self::new).map_err(to_py_err)
    }

    #[getter]
    fn shape(&self) -> Vec<usize> {
        self.inner.shape().dims().to_vec()
    }

    #[getter]
    fn dtype(&self) -> &'static str {
        dtype_name(self.inner.dtype())
    }

    #[getter]
    fn engine(&self) -> String {
        self.inner.engine().name().to_string()
    }

    fn __repr__(&self) -> String {
        format!(
            "Tensor(shape={:?}, dtype={}, engine={})",
            self.inner.shape().dims(),
            dtype_name(self.inner.dtype()),
            self.inner.engine().name()
        )
    }
}

fn infer_shape(value: &HostValue) -> Shape {
    let mut dims = Vec::new();
    let mut current = value;
    while let HostValue::List(items) = current {
        dims.push(items.len());
        match items.first() {
            Some(first) => current = first,
            None => break,
        }
    }
    Shape::new(dims)
}

/// Log shape, dtype and values of the given tensors
#[pyfunction]
pub fn print_tensors(tensors: Vec<PyRef<'_, PyTensor>>) -> PyResult<()> {
    if tensors.is_empty() {
        return Err(PyValueError::new_err("print_tensors needs at least one tensor"));
    }
    let refs: Vec<&Tensor> = tensors.iter().map(|tensor| tensor.tensor()).collect();
    jitlink::print_tensors(&refs);
    Ok(())
}
