use std::fmt;
use std::slice;
use std::sync::Arc;

use tracing::trace;

use crate::engine::{NativeEngine, TensorContext};
use crate::error::{Error, Result};

use super::buffer::RawBuffer;
use super::codec::{self, Encoder};
use super::data::{infer, TensorData};
use super::{DType, Element, HostValue, Shape};

/// A native tensor reference together with the host buffer it may be viewing.
///
/// Tensors built from host data own a zero-initialized buffer that the engine reads
/// without copying; tensors returned by the engine own only their context. Dropping a
/// tensor releases the context first and frees the buffer afterwards.
///
/// Handles are move-only. Copies go through [`Tensor::try_clone`], and a released handle
/// is gone:
///
/// ```compile_fail
/// fn use_after_release(tensor: jitlink::Tensor) {
///     tensor.release();
///     let _ = tensor.shape();
/// }
/// ```
///
/// ```compile_fail
/// fn duplicate(tensor: &jitlink::Tensor) -> jitlink::Tensor {
///     tensor.clone()
/// }
/// ```
pub struct Tensor {
    engine: Arc<dyn NativeEngine>,
    context: TensorContext,
    shape: Shape,
    dtype: DType,
    buffer: Option<RawBuffer>,
}

// SAFETY: the context and buffer are exclusively owned by this handle and engines are
// `Send + Sync`; the handle is not `Sync`, so no two threads use it at once.
unsafe impl Send for Tensor {}

impl Tensor {
    /// Encodes a typed host value into a new tensor, inferring shape and dtype.
    pub fn new<T>(engine: &Arc<dyn NativeEngine>, value: &T) -> Result<Self>
    where
        T: TensorData,
        T::Scalar: Element,
    {
        let (shape, dtype) = infer(value);
        Self::with_shape(engine, value, &shape, dtype)
    }

    /// Encodes a typed host value against an explicit shape and dtype.
    pub fn with_shape<T: TensorData>(
        engine: &Arc<dyn NativeEngine>,
        value: &T,
        shape: &Shape,
        dtype: DType,
    ) -> Result<Self> {
        let mut buffer = RawBuffer::zeroed(shape.byte_len(dtype)?)?;
        codec::encode_into(value, shape, dtype, Encoder::new(buffer.as_mut_slice()))?;
        Self::from_buffer(engine, buffer, shape.clone(), dtype)
    }

    pub fn from_host_value(engine: &Arc<dyn NativeEngine>, value: &HostValue) -> Result<Self> {
        let (shape, dtype) = value.infer()?;
        Self::from_host_value_with_shape(engine, value, &shape, dtype)
    }

    pub fn from_host_value_with_shape(
        engine: &Arc<dyn NativeEngine>,
        value: &HostValue,
        shape: &Shape,
        dtype: DType,
    ) -> Result<Self> {
        let mut buffer = RawBuffer::zeroed(shape.byte_len(dtype)?)?;
        codec::encode_host_value(value, shape, dtype, buffer.as_mut_slice())?;
        Self::from_buffer(engine, buffer, shape.clone(), dtype)
    }

    /// Builds a tensor of `shape` from a flat run in shape order.
    pub fn from_flat<S: Element>(
        engine: &Arc<dyn NativeEngine>,
        data: &[S],
        shape: &Shape,
    ) -> Result<Self> {
        if data.len() != shape.num_elements() {
            return Err(Error::ShapeMismatch {
                expected: shape.num_elements(),
                actual: data.len(),
            });
        }
        let mut buffer = RawBuffer::zeroed(shape.byte_len(S::DTYPE)?)?;
        let mut encoder = Encoder::new(buffer.as_mut_slice());
        encoder.write_run(data)?;
        encoder.finish()?;
        Self::from_buffer(engine, buffer, shape.clone(), S::DTYPE)
    }

    fn from_buffer(
        engine: &Arc<dyn NativeEngine>,
        buffer: RawBuffer,
        shape: Shape,
        dtype: DType,
    ) -> Result<Self> {
        let dims = shape.to_i64()?;
        // SAFETY: the buffer is sized for shape/dtype and is stored in the returned handle,
        // which frees it only after releasing the context.
        let context = unsafe { engine.new_tensor(buffer.as_ptr(), &dims, dtype) }
            .map_err(Error::from_native)?;
        trace!(engine = engine.name(), ?dims, ?dtype, bytes = buffer.len(), "created tensor view");
        Ok(Self {
            engine: Arc::clone(engine),
            context,
            shape,
            dtype,
            buffer: Some(buffer),
        })
    }

    /// Adopts an engine-owned context; the tensor owns no host buffer.
    ///
    /// On failure the context is released before the error is returned.
    ///
    /// # Safety
    /// `context` must be a live tensor of `engine` owned by nobody else.
    pub(crate) unsafe fn from_context(
        engine: Arc<dyn NativeEngine>,
        context: TensorContext,
    ) -> Result<Self> {
        let described = match engine.tensor_dtype(context) {
            Some(dtype) => Shape::from_i64(&engine.tensor_shape(context)).map(|s| (s, dtype)),
            None => Err(Error::unsupported("native tensor dtype")),
        };
        match described {
            Ok((shape, dtype)) => Ok(Self {
                engine,
                context,
                shape,
                dtype,
                buffer: None,
            }),
            Err(err) => {
                engine.release_tensor(context);
                Err(err)
            }
        }
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    pub(crate) fn context(&self) -> TensorContext {
        self.context
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }

    /// Whether this handle allocated the host buffer the engine is viewing.
    pub fn owns_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// The tensor's data as the engine exposes it.
    pub fn bytes(&self) -> Result<&[u8]> {
        let len = self.shape.byte_len(self.dtype)?;
        if len == 0 {
            return Ok(&[]);
        }
        // SAFETY: the context is live for as long as `self`.
        let data = unsafe { self.engine.tensor_data(self.context) };
        if data.is_null() {
            return Err(Error::marshal("engine returned a null tensor data pointer"));
        }
        // SAFETY: the engine guarantees `len` readable bytes until the context is released.
        Ok(unsafe { slice::from_raw_parts(data, len) })
    }

    /// Decodes the tensor into a typed nested value.
    pub fn value<T: TensorData>(&self) -> Result<T> {
        codec::decode(self.bytes()?, &self.shape, self.dtype)
    }

    /// Decodes the tensor into a dynamic host value nested `rank` levels deep.
    pub fn host_value(&self) -> Result<HostValue> {
        codec::decode_host_value(self.bytes()?, &self.shape, self.dtype)
    }

    /// Decodes the tensor as a flat run in shape order.
    pub fn to_vec<S: TensorData>(&self) -> Result<Vec<S>> {
        let flat = Shape::new(vec![self.num_elements()]);
        codec::decode(self.bytes()?, &flat, self.dtype)
    }

    /// Asks the engine for an independent copy.
    pub fn try_clone(&self) -> Result<Self> {
        // SAFETY: the context is live; the clone is a fresh context owned by the result.
        unsafe {
            let context = self
                .engine
                .clone_tensor(self.context)
                .map_err(Error::from_native)?;
            Self::from_context(Arc::clone(&self.engine), context)
        }
    }

    /// Releases the native reference and the buffer now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Tensor {
    fn drop(&mut self) {
        // SAFETY: the context is owned by this handle and released exactly once here.
        unsafe { self.engine.release_tensor(self.context) };
        trace!(owned_buffer = self.buffer.is_some(), "released tensor");
        drop(self.buffer.take());
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("engine", &self.engine.name())
            .field("shape", &self.shape.dims())
            .field("dtype", &self.dtype)
            .field("owns_buffer", &self.owns_buffer())
            .finish()
    }
}
