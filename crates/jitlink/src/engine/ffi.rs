//! C ABI shared by the shared-library engine loader and engine libraries exporting it.
//!
//! Every function reports failure through an out-parameter [`FfiError`] whose message
//! is `malloc`-allocated by the library and freed by the caller. Strings and arrays
//! returned by the library are `malloc`-allocated as well, so both sides must link the
//! same C allocator.

use std::ffi::{c_char, c_void, CStr, CString};
use std::mem::size_of;
use std::ptr;

use crate::boundary::RawIValue;

use super::{MethodArgument, NativeError};

#[repr(C)]
#[derive(Debug)]
pub struct FfiError {
    pub message: *mut c_char,
}

impl FfiError {
    pub fn none() -> Self {
        Self {
            message: ptr::null_mut(),
        }
    }

    /// Takes the reported message, if any, freeing the C string.
    ///
    /// # Safety
    /// `message` must be null or a NUL-terminated string allocated with `malloc`.
    pub unsafe fn take(&mut self) -> Option<NativeError> {
        let message = std::mem::replace(&mut self.message, ptr::null_mut());
        take_c_string(message).map(NativeError::new)
    }

    /// Like [`take`](Self::take), but always yields an error.
    ///
    /// # Safety
    /// As [`take`](Self::take).
    pub unsafe fn take_or(&mut self, fallback: &str) -> NativeError {
        self.take().unwrap_or_else(|| NativeError::new(fallback))
    }
}

/// Stores `message` in `err` (no-op for a null `err`).
///
/// # Safety
/// `err` must be null or point at a writable [`FfiError`] whose message is null.
pub unsafe fn set_error(err: *mut FfiError, message: &str) {
    if let Some(err) = err.as_mut() {
        err.message = alloc_c_string(message);
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiArgument {
    pub name: *mut c_char,
    pub type_name: *mut c_char,
}

pub type TensorNewFn = unsafe extern "C" fn(
    data: *mut u8,
    dims: *const i64,
    ndim: usize,
    dtype: u32,
    err: *mut FfiError,
) -> *mut c_void;
pub type TensorNdimFn = unsafe extern "C" fn(tensor: *mut c_void) -> usize;
pub type TensorDimsFn = unsafe extern "C" fn(tensor: *mut c_void, out: *mut i64);
pub type TensorDtypeFn = unsafe extern "C" fn(tensor: *mut c_void) -> u32;
pub type TensorDataFn = unsafe extern "C" fn(tensor: *mut c_void) -> *const u8;
pub type TensorCloneFn = unsafe extern "C" fn(tensor: *mut c_void, err: *mut FfiError) -> *mut c_void;
pub type TensorFreeFn = unsafe extern "C" fn(tensor: *mut c_void);
pub type ModuleCompileFn =
    unsafe extern "C" fn(source: *const c_char, err: *mut FfiError) -> *mut c_void;
pub type ModuleLoadFn = unsafe extern "C" fn(path: *const c_char, err: *mut FfiError) -> *mut c_void;
pub type ModuleSaveFn =
    unsafe extern "C" fn(module: *mut c_void, path: *const c_char, err: *mut FfiError) -> bool;
pub type ModuleFreeFn = unsafe extern "C" fn(module: *mut c_void);
pub type ModuleMethodNamesFn =
    unsafe extern "C" fn(module: *mut c_void, out_len: *mut usize) -> *mut *mut c_char;
pub type MethodSchemaFn = unsafe extern "C" fn(
    module: *mut c_void,
    method: *const c_char,
    out_len: *mut usize,
    err: *mut FfiError,
) -> *mut FfiArgument;
pub type MethodRunFn = unsafe extern "C" fn(
    module: *mut c_void,
    method: *const c_char,
    args: *const RawIValue,
    nargs: usize,
    out: *mut RawIValue,
    err: *mut FfiError,
) -> bool;

pub const SYM_TENSOR_NEW: &[u8] = b"jitlink_tensor_new\0";
pub const SYM_TENSOR_NDIM: &[u8] = b"jitlink_tensor_ndim\0";
pub const SYM_TENSOR_DIMS: &[u8] = b"jitlink_tensor_dims\0";
pub const SYM_TENSOR_DTYPE: &[u8] = b"jitlink_tensor_dtype\0";
pub const SYM_TENSOR_DATA: &[u8] = b"jitlink_tensor_data\0";
pub const SYM_TENSOR_CLONE: &[u8] = b"jitlink_tensor_clone\0";
pub const SYM_TENSOR_FREE: &[u8] = b"jitlink_tensor_free\0";
pub const SYM_MODULE_COMPILE: &[u8] = b"jitlink_module_compile\0";
pub const SYM_MODULE_LOAD: &[u8] = b"jitlink_module_load\0";
pub const SYM_MODULE_SAVE: &[u8] = b"jitlink_module_save\0";
pub const SYM_MODULE_FREE: &[u8] = b"jitlink_module_free\0";
pub const SYM_MODULE_METHOD_NAMES: &[u8] = b"jitlink_module_method_names\0";
pub const SYM_METHOD_ARGUMENTS: &[u8] = b"jitlink_method_arguments\0";
pub const SYM_METHOD_RETURNS: &[u8] = b"jitlink_method_returns\0";
pub const SYM_METHOD_RUN: &[u8] = b"jitlink_method_run\0";

/// Copies `text` into a `malloc`-allocated C string, cut at the first interior NUL.
///
/// Returns null when allocation fails.
pub fn alloc_c_string(text: &str) -> *mut c_char {
    let bytes = text.as_bytes();
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    // SAFETY: plain allocation of len + 1 bytes; checked for null below.
    let out = unsafe { libc::malloc(len + 1) } as *mut u8;
    if out.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: out holds len + 1 bytes and does not overlap `bytes`.
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), out, len);
        *out.add(len) = 0;
    }
    out as *mut c_char
}

/// Converts and frees a `malloc`-allocated C string.
///
/// # Safety
/// `ptr` must be null or a NUL-terminated string allocated with `malloc`; it is dead
/// afterwards.
pub unsafe fn take_c_string(ptr: *mut c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let text = CStr::from_ptr(ptr).to_string_lossy().into_owned();
    libc::free(ptr as *mut c_void);
    Some(text)
}

/// Copies `items` into a `malloc`-allocated array.
///
/// Returns `Some(null)` for an empty slice and `None` when allocation fails.
pub fn alloc_array<T: Copy>(items: &[T]) -> Option<*mut T> {
    if items.is_empty() {
        return Some(ptr::null_mut());
    }
    let bytes = items.len().checked_mul(size_of::<T>())?;
    // SAFETY: plain allocation of a non-zero size; checked for null below.
    let out = unsafe { libc::malloc(bytes) } as *mut T;
    if out.is_null() {
        return None;
    }
    // SAFETY: out has room for items.len() values and does not overlap `items`.
    unsafe { ptr::copy_nonoverlapping(items.as_ptr(), out, items.len()) };
    Some(out)
}

/// Converts and frees an array of C strings produced by a method-names export.
///
/// # Safety
/// `ptr` must be null or a `malloc`-allocated array of `len` strings each satisfying
/// [`take_c_string`].
pub unsafe fn take_string_array(ptr: *mut *mut c_char, len: usize) -> Vec<String> {
    if ptr.is_null() {
        return Vec::new();
    }
    let names = (0..len)
        .filter_map(|index| take_c_string(*ptr.add(index)))
        .collect();
    libc::free(ptr as *mut c_void);
    names
}

/// Converts and frees an argument schema array.
///
/// # Safety
/// `ptr` must be null or a `malloc`-allocated array of `len` arguments whose strings
/// satisfy [`take_c_string`].
pub unsafe fn take_argument_array(ptr: *mut FfiArgument, len: usize) -> Vec<MethodArgument> {
    if ptr.is_null() {
        return Vec::new();
    }
    let arguments = (0..len)
        .map(|index| {
            let entry = &*ptr.add(index);
            MethodArgument {
                name: take_c_string(entry.name).unwrap_or_default(),
                type_name: take_c_string(entry.type_name).unwrap_or_default(),
            }
        })
        .collect();
    libc::free(ptr as *mut c_void);
    arguments
}

/// Builds a C string for an argument, reporting interior NULs as engine errors.
pub fn c_string(text: &str) -> Result<CString, NativeError> {
    CString::new(text).map_err(|_| NativeError::new(format!("string contains a NUL byte: {text:?}")))
}
