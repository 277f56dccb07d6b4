//! `jitlink_*` C ABI over the reference engine.
//!
//! Build as a `cdylib` and point `JITLINK_ENGINE_LIB` at it to drive the reference
//! engine through `jitlink::engine::DylibEngine`. All strings and arrays returned here
//! are `malloc`-allocated and owned by the caller.

use std::ffi::{c_char, c_void, CStr};
use std::path::Path;
use std::ptr::{self, NonNull};
use std::slice;

use jitlink::boundary::RawIValue;
use jitlink::engine::ffi::{self, FfiArgument, FfiError};
use jitlink::engine::{MethodArgument, ModuleContext, NativeEngine, NativeError, TensorContext};
use jitlink::DType;
use jitlink_engine_ref::RefEngine;
use once_cell::sync::Lazy;

static ENGINE: Lazy<RefEngine> = Lazy::new(RefEngine::new);

/// The engine instance behind every export.
pub fn engine() -> &'static RefEngine {
    &ENGINE
}

unsafe fn read_str<'a>(text: *const c_char, what: &str) -> Result<&'a str, NativeError> {
    if text.is_null() {
        return Err(NativeError::new(format!("null {what}")));
    }
    CStr::from_ptr(text)
        .to_str()
        .map_err(|_| NativeError::new(format!("{what} is not valid UTF-8")))
}

unsafe fn report<T>(result: Result<T, NativeError>, err: *mut FfiError) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            ffi::set_error(err, error.message());
            None
        }
    }
}

fn argument_array(arguments: &[MethodArgument], out_len: *mut usize) -> Result<*mut FfiArgument, NativeError> {
    let entries: Vec<FfiArgument> = arguments
        .iter()
        .map(|argument| FfiArgument {
            name: ffi::alloc_c_string(&argument.name),
            type_name: ffi::alloc_c_string(&argument.type_name),
        })
        .collect();
    match ffi::alloc_array(&entries) {
        Some(array) => {
            if let Some(out_len) = unsafe { out_len.as_mut() } {
                *out_len = entries.len();
            }
            Ok(array)
        }
        None => {
            for entry in entries {
                // SAFETY: both strings were just allocated above and are owned here.
                unsafe {
                    ffi::take_c_string(entry.name);
                    ffi::take_c_string(entry.type_name);
                }
            }
            Err(NativeError::new("failed to allocate method schema"))
        }
    }
}

#[no_mangle]
/// # Safety
/// `data` must hold the bytes implied by `dims`/`dtype` until the tensor is freed, and
/// `dims` must point at `ndim` values.
pub unsafe extern "C" fn jitlink_tensor_new(
    data: *mut u8,
    dims: *const i64,
    ndim: usize,
    dtype: u32,
    err: *mut FfiError,
) -> *mut c_void {
    let result = (|| {
        let data = NonNull::new(data).ok_or_else(|| NativeError::new("null tensor data"))?;
        let dims = if ndim == 0 {
            &[][..]
        } else if dims.is_null() {
            return Err(NativeError::new("null tensor dims"));
        } else {
            slice::from_raw_parts(dims, ndim)
        };
        let dtype = DType::from_tag(dtype)
            .ok_or_else(|| NativeError::new(format!("unsupported dtype tag {dtype}")))?;
        ENGINE.new_tensor(data, dims, dtype)
    })();
    report(result, err).map_or(ptr::null_mut(), TensorContext::as_ptr)
}

#[no_mangle]
/// # Safety
/// `tensor` must be a live tensor of this library.
pub unsafe extern "C" fn jitlink_tensor_ndim(tensor: *mut c_void) -> usize {
    TensorContext::from_raw(tensor).map_or(0, |tensor| ENGINE.tensor_shape(tensor).len())
}

#[no_mangle]
/// # Safety
/// `tensor` must be a live tensor of this library and `out` must have room for
/// `jitlink_tensor_ndim(tensor)` values.
pub unsafe extern "C" fn jitlink_tensor_dims(tensor: *mut c_void, out: *mut i64) {
    let Some(tensor) = TensorContext::from_raw(tensor) else {
        return;
    };
    if out.is_null() {
        return;
    }
    let dims = ENGINE.tensor_shape(tensor);
    ptr::copy_nonoverlapping(dims.as_ptr(), out, dims.len());
}

#[no_mangle]
/// # Safety
/// `tensor` must be a live tensor of this library.
pub unsafe extern "C" fn jitlink_tensor_dtype(tensor: *mut c_void) -> u32 {
    TensorContext::from_raw(tensor)
        .and_then(|tensor| ENGINE.tensor_dtype(tensor))
        .map_or(0, DType::tag)
}

#[no_mangle]
/// # Safety
/// `tensor` must be a live tensor of this library.
pub unsafe extern "C" fn jitlink_tensor_data(tensor: *mut c_void) -> *const u8 {
    TensorContext::from_raw(tensor).map_or(ptr::null(), |tensor| ENGINE.tensor_data(tensor))
}

#[no_mangle]
/// # Safety
/// `tensor` must be a live tensor of this library.
pub unsafe extern "C" fn jitlink_tensor_clone(tensor: *mut c_void, err: *mut FfiError) -> *mut c_void {
    let result = TensorContext::from_raw(tensor)
        .ok_or_else(|| NativeError::new("null tensor"))
        .and_then(|tensor| ENGINE.clone_tensor(tensor));
    report(result, err).map_or(ptr::null_mut(), TensorContext::as_ptr)
}

#[no_mangle]
/// # Safety
/// `tensor` must be null or a live tensor of this library; it is dead afterwards.
pub unsafe extern "C" fn jitlink_tensor_free(tensor: *mut c_void) {
    if let Some(tensor) = TensorContext::from_raw(tensor) {
        ENGINE.release_tensor(tensor);
    }
}

#[no_mangle]
/// # Safety
/// `source` must be a NUL-terminated string.
pub unsafe extern "C" fn jitlink_module_compile(source: *const c_char, err: *mut FfiError) -> *mut c_void {
    let result = read_str(source, "script source").and_then(|source| ENGINE.compile_script(source));
    report(result, err).map_or(ptr::null_mut(), ModuleContext::as_ptr)
}

#[no_mangle]
/// # Safety
/// `path` must be a NUL-terminated string.
pub unsafe extern "C" fn jitlink_module_load(path: *const c_char, err: *mut FfiError) -> *mut c_void {
    let result = read_str(path, "module path").and_then(|path| ENGINE.load_module(Path::new(path)));
    report(result, err).map_or(ptr::null_mut(), ModuleContext::as_ptr)
}

#[no_mangle]
/// # Safety
/// `module` must be a live module of this library and `path` a NUL-terminated string.
pub unsafe extern "C" fn jitlink_module_save(
    module: *mut c_void,
    path: *const c_char,
    err: *mut FfiError,
) -> bool {
    let result = ModuleContext::from_raw(module)
        .ok_or_else(|| NativeError::new("null module"))
        .and_then(|module| {
            let path = read_str(path, "module path")?;
            ENGINE.save_module(module, Path::new(path))
        });
    report(result, err).is_some()
}

#[no_mangle]
/// # Safety
/// `module` must be null or a live module of this library; it is dead afterwards.
pub unsafe extern "C" fn jitlink_module_free(module: *mut c_void) {
    if let Some(module) = ModuleContext::from_raw(module) {
        ENGINE.release_module(module);
    }
}

#[no_mangle]
/// # Safety
/// `module` must be a live module of this library; `out_len` must be writable.
pub unsafe extern "C" fn jitlink_module_method_names(
    module: *mut c_void,
    out_len: *mut usize,
) -> *mut *mut c_char {
    let Some(module) = ModuleContext::from_raw(module) else {
        return ptr::null_mut();
    };
    let names: Vec<*mut c_char> = ENGINE
        .method_names(module)
        .iter()
        .map(|name| ffi::alloc_c_string(name))
        .collect();
    match ffi::alloc_array(&names) {
        Some(array) => {
            if let Some(out_len) = out_len.as_mut() {
                *out_len = names.len();
            }
            array
        }
        None => {
            for name in names {
                ffi::take_c_string(name);
            }
            ptr::null_mut()
        }
    }
}

#[no_mangle]
/// # Safety
/// `module` must be a live module of this library, `method` a NUL-terminated string and
/// `out_len` writable.
pub unsafe extern "C" fn jitlink_method_arguments(
    module: *mut c_void,
    method: *const c_char,
    out_len: *mut usize,
    err: *mut FfiError,
) -> *mut FfiArgument {
    let result = ModuleContext::from_raw(module)
        .ok_or_else(|| NativeError::new("null module"))
        .and_then(|module| ENGINE.method_arguments(module, read_str(method, "method name")?))
        .and_then(|arguments| argument_array(&arguments, out_len));
    report(result, err).unwrap_or(ptr::null_mut())
}

#[no_mangle]
/// # Safety
/// As [`jitlink_method_arguments`].
pub unsafe extern "C" fn jitlink_method_returns(
    module: *mut c_void,
    method: *const c_char,
    out_len: *mut usize,
    err: *mut FfiError,
) -> *mut FfiArgument {
    let result = ModuleContext::from_raw(module)
        .ok_or_else(|| NativeError::new("null module"))
        .and_then(|module| ENGINE.method_returns(module, read_str(method, "method name")?))
        .and_then(|returns| argument_array(&returns, out_len));
    report(result, err).unwrap_or(ptr::null_mut())
}

#[no_mangle]
/// # Safety
/// `module` must be a live module of this library, `method` a NUL-terminated string,
/// `args` must point at `nargs` well-formed nodes of this library's tensors and `out`
/// must be writable. On success the caller owns the tree written to `out`.
pub unsafe extern "C" fn jitlink_method_run(
    module: *mut c_void,
    method: *const c_char,
    args: *const RawIValue,
    nargs: usize,
    out: *mut RawIValue,
    err: *mut FfiError,
) -> bool {
    let result = (|| {
        let module = ModuleContext::from_raw(module).ok_or_else(|| NativeError::new("null module"))?;
        let method = read_str(method, "method name")?;
        if out.is_null() {
            return Err(NativeError::new("null result slot"));
        }
        let args = if nargs == 0 {
            &[][..]
        } else if args.is_null() {
            return Err(NativeError::new("null argument array"));
        } else {
            slice::from_raw_parts(args, nargs)
        };
        let value = ENGINE.run_method(module, method, args)?;
        out.write(value);
        Ok(())
    })();
    report(result, err).is_some()
}
