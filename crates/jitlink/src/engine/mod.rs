//! The native tensor engine interface consumed by the marshalling layer.
//!
//! An engine owns tensor storage views and compiled script modules. Everything it hands
//! out is an opaque context pointer; the core pairs every context it owns with exactly
//! one release call.
//!
//! Engines are selected by name through [`registry`], either an in-process
//! implementation registered by another crate or a shared library loaded through
//! [`dylib`].

pub mod dylib;
pub mod ffi;
pub mod registry;

use std::ffi::c_void;
use std::fmt;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::boundary::RawIValue;
use crate::tensor::DType;

pub use dylib::DylibEngine;
pub use registry::{create_engine, default_engine, has_engine, list_engines, register_engine};

/// Opaque engine tensor reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorContext(NonNull<c_void>);

impl TensorContext {
    pub fn new(ptr: NonNull<c_void>) -> Self {
        Self(ptr)
    }

    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Opaque engine module reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleContext(NonNull<c_void>);

impl ModuleContext {
    pub fn new(ptr: NonNull<c_void>) -> Self {
        Self(ptr)
    }

    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Failure text reported by an engine, carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError(String);

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }

    pub fn into_message(self) -> String {
        self.0
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for NativeError {}

/// One entry of a method's argument or return schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodArgument {
    pub name: String,
    pub type_name: String,
}

impl MethodArgument {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Operations the marshalling layer needs from a native tensor engine.
///
/// Methods taking contexts are `unsafe`: the caller guarantees every context was produced
/// by this same engine instance and has not been released.
pub trait NativeEngine: Send + Sync + fmt::Debug {
    /// Short engine identifier (e.g. "ref", "dylib").
    fn name(&self) -> &str;

    /// Creates a tensor viewing `data` without copying.
    ///
    /// # Safety
    /// `data` must hold `product(dims) * dtype.size_in_bytes()` bytes and stay valid and
    /// unmoved until the returned context is released.
    unsafe fn new_tensor(
        &self,
        data: NonNull<u8>,
        dims: &[i64],
        dtype: DType,
    ) -> Result<TensorContext, NativeError>;

    /// # Safety
    /// `tensor` must be a live context of this engine.
    unsafe fn tensor_shape(&self, tensor: TensorContext) -> Vec<i64>;

    /// Returns `None` when the engine's dtype has no mapping in [`DType`].
    ///
    /// # Safety
    /// `tensor` must be a live context of this engine.
    unsafe fn tensor_dtype(&self, tensor: TensorContext) -> Option<DType>;

    /// Read-only pointer to the tensor's contiguous native-endian data.
    ///
    /// # Safety
    /// `tensor` must be a live context of this engine. The pointer is valid until the
    /// context is released.
    unsafe fn tensor_data(&self, tensor: TensorContext) -> *const u8;

    /// Returns a new, independently owned tensor holding a copy of the data.
    ///
    /// # Safety
    /// `tensor` must be a live context of this engine.
    unsafe fn clone_tensor(&self, tensor: TensorContext) -> Result<TensorContext, NativeError>;

    /// # Safety
    /// `tensor` must be a live context of this engine; it is dead afterwards.
    unsafe fn release_tensor(&self, tensor: TensorContext);

    fn compile_script(&self, source: &str) -> Result<ModuleContext, NativeError>;

    fn load_module(&self, path: &Path) -> Result<ModuleContext, NativeError>;

    /// # Safety
    /// `module` must be a live module context of this engine.
    unsafe fn save_module(&self, module: ModuleContext, path: &Path) -> Result<(), NativeError>;

    /// # Safety
    /// `module` must be a live module context of this engine.
    unsafe fn method_names(&self, module: ModuleContext) -> Vec<String>;

    /// # Safety
    /// `module` must be a live module context of this engine.
    unsafe fn method_arguments(
        &self,
        module: ModuleContext,
        method: &str,
    ) -> Result<Vec<MethodArgument>, NativeError>;

    /// # Safety
    /// `module` must be a live module context of this engine.
    unsafe fn method_returns(
        &self,
        module: ModuleContext,
        method: &str,
    ) -> Result<Vec<MethodArgument>, NativeError>;

    /// Runs `method` with the given argument nodes.
    ///
    /// Argument nodes stay owned by the caller; the engine neither frees them nor keeps
    /// their tensor contexts past the call. The returned tree is owned by the caller:
    /// tuple records and arrays are `malloc`-allocated (see
    /// [`boundary::raw::alloc_tuple`](crate::boundary::raw::alloc_tuple)) and every
    /// tensor leaf is a fresh context to be released exactly once.
    ///
    /// # Safety
    /// `module` must be a live module context of this engine, and every argument node a
    /// well-formed tree whose tensor leaves are live contexts of this engine.
    unsafe fn run_method(
        &self,
        module: ModuleContext,
        method: &str,
        args: &[RawIValue],
    ) -> Result<RawIValue, NativeError>;

    /// # Safety
    /// `module` must be a live module context of this engine; it is dead afterwards.
    unsafe fn release_module(&self, module: ModuleContext);
}

/// Identity comparison on the engine allocation (vtable pointers are ignored).
pub(crate) fn same_engine(a: &Arc<dyn NativeEngine>, b: &Arc<dyn NativeEngine>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
