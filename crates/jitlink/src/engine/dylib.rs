//! Engine backed by a shared library exporting the `jitlink_*` C ABI.

use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

use libloading::Library;
use tracing::debug;

use crate::boundary::{RawIValue, IVALUE_TUPLE};
use crate::env::Config;
use crate::error::{Error, Result};
use crate::tensor::DType;

use super::ffi::{self, FfiError};
use super::{MethodArgument, ModuleContext, NativeEngine, NativeError, TensorContext};

struct EngineFns {
    tensor_new: ffi::TensorNewFn,
    tensor_ndim: ffi::TensorNdimFn,
    tensor_dims: ffi::TensorDimsFn,
    tensor_dtype: ffi::TensorDtypeFn,
    tensor_data: ffi::TensorDataFn,
    tensor_clone: ffi::TensorCloneFn,
    tensor_free: ffi::TensorFreeFn,
    module_compile: ffi::ModuleCompileFn,
    module_load: ffi::ModuleLoadFn,
    module_save: ffi::ModuleSaveFn,
    module_free: ffi::ModuleFreeFn,
    module_method_names: ffi::ModuleMethodNamesFn,
    method_arguments: ffi::MethodSchemaFn,
    method_returns: ffi::MethodSchemaFn,
    method_run: ffi::MethodRunFn,
}

pub struct DylibEngine {
    // Keeps the resolved function pointers valid.
    _lib: Library,
    fns: EngineFns,
    path: PathBuf,
}

impl fmt::Debug for DylibEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DylibEngine")
            .field("path", &self.path)
            .finish()
    }
}

impl DylibEngine {
    /// Loads the engine library at `path` and resolves every `jitlink_*` export.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        // SAFETY: loading runs the library's initializers; no symbols are invoked yet.
        let lib = unsafe { Library::new(&path) }.map_err(|source| Error::EngineLibrary {
            path: path.clone(),
            source,
        })?;
        let fns = EngineFns {
            tensor_new: load_symbol(&lib, &path, ffi::SYM_TENSOR_NEW)?,
            tensor_ndim: load_symbol(&lib, &path, ffi::SYM_TENSOR_NDIM)?,
            tensor_dims: load_symbol(&lib, &path, ffi::SYM_TENSOR_DIMS)?,
            tensor_dtype: load_symbol(&lib, &path, ffi::SYM_TENSOR_DTYPE)?,
            tensor_data: load_symbol(&lib, &path, ffi::SYM_TENSOR_DATA)?,
            tensor_clone: load_symbol(&lib, &path, ffi::SYM_TENSOR_CLONE)?,
            tensor_free: load_symbol(&lib, &path, ffi::SYM_TENSOR_FREE)?,
            module_compile: load_symbol(&lib, &path, ffi::SYM_MODULE_COMPILE)?,
            module_load: load_symbol(&lib, &path, ffi::SYM_MODULE_LOAD)?,
            module_save: load_symbol(&lib, &path, ffi::SYM_MODULE_SAVE)?,
            module_free: load_symbol(&lib, &path, ffi::SYM_MODULE_FREE)?,
            module_method_names: load_symbol(&lib, &path, ffi::SYM_MODULE_METHOD_NAMES)?,
            method_arguments: load_symbol(&lib, &path, ffi::SYM_METHOD_ARGUMENTS)?,
            method_returns: load_symbol(&lib, &path, ffi::SYM_METHOD_RETURNS)?,
            method_run: load_symbol(&lib, &path, ffi::SYM_METHOD_RUN)?,
        };
        debug!(path = %path.display(), "loaded engine library");
        Ok(Self {
            _lib: lib,
            fns,
            path,
        })
    }

    /// Opens the library named by `JITLINK_ENGINE_LIB`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let path = config.engine_lib.as_ref().ok_or_else(|| Error::Config {
            message: "JITLINK_ENGINE_LIB is not set; the dylib engine needs a library path"
                .to_string(),
        })?;
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    unsafe fn schema(
        &self,
        call: ffi::MethodSchemaFn,
        module: ModuleContext,
        method: &str,
    ) -> std::result::Result<Vec<MethodArgument>, NativeError> {
        let name = ffi::c_string(method)?;
        let mut err = FfiError::none();
        let mut len = 0usize;
        let entries = call(module.as_ptr(), name.as_ptr(), &mut len, &mut err);
        if let Some(error) = err.take() {
            return Err(error);
        }
        Ok(ffi::take_argument_array(entries, len))
    }
}

fn load_symbol<T: Copy>(lib: &Library, path: &Path, name: &'static [u8]) -> Result<T> {
    // SAFETY: the symbol types in `ffi` describe the exported jitlink ABI.
    let sym = unsafe { lib.get::<T>(name) }.map_err(|source| Error::EngineLibrary {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(*sym)
}

fn path_string(path: &Path) -> std::result::Result<std::ffi::CString, NativeError> {
    let text = path
        .to_str()
        .ok_or_else(|| NativeError::new(format!("path is not valid UTF-8: {}", path.display())))?;
    ffi::c_string(text)
}

impl NativeEngine for DylibEngine {
    fn name(&self) -> &str {
        "dylib"
    }

    unsafe fn new_tensor(
        &self,
        data: NonNull<u8>,
        dims: &[i64],
        dtype: DType,
    ) -> std::result::Result<TensorContext, NativeError> {
        let mut err = FfiError::none();
        let raw = (self.fns.tensor_new)(
            data.as_ptr(),
            dims.as_ptr(),
            dims.len(),
            dtype.tag(),
            &mut err,
        );
        TensorContext::from_raw(raw).ok_or_else(|| err.take_or("jitlink_tensor_new failed"))
    }

    unsafe fn tensor_shape(&self, tensor: TensorContext) -> Vec<i64> {
        let ndim = (self.fns.tensor_ndim)(tensor.as_ptr());
        let mut dims = vec![0i64; ndim];
        if ndim > 0 {
            (self.fns.tensor_dims)(tensor.as_ptr(), dims.as_mut_ptr());
        }
        dims
    }

    unsafe fn tensor_dtype(&self, tensor: TensorContext) -> Option<DType> {
        DType::from_tag((self.fns.tensor_dtype)(tensor.as_ptr()))
    }

    unsafe fn tensor_data(&self, tensor: TensorContext) -> *const u8 {
        (self.fns.tensor_data)(tensor.as_ptr())
    }

    unsafe fn clone_tensor(
        &self,
        tensor: TensorContext,
    ) -> std::result::Result<TensorContext, NativeError> {
        let mut err = FfiError::none();
        let raw = (self.fns.tensor_clone)(tensor.as_ptr(), &mut err);
        TensorContext::from_raw(raw).ok_or_else(|| err.take_or("jitlink_tensor_clone failed"))
    }

    unsafe fn release_tensor(&self, tensor: TensorContext) {
        (self.fns.tensor_free)(tensor.as_ptr());
    }

    fn compile_script(&self, source: &str) -> std::result::Result<ModuleContext, NativeError> {
        let source = ffi::c_string(source)?;
        let mut err = FfiError::none();
        // SAFETY: source is a valid C string for the duration of the call.
        unsafe {
            let raw = (self.fns.module_compile)(source.as_ptr(), &mut err);
            ModuleContext::from_raw(raw).ok_or_else(|| err.take_or("jitlink_module_compile failed"))
        }
    }

    fn load_module(&self, path: &Path) -> std::result::Result<ModuleContext, NativeError> {
        let path = path_string(path)?;
        let mut err = FfiError::none();
        // SAFETY: path is a valid C string for the duration of the call.
        unsafe {
            let raw = (self.fns.module_load)(path.as_ptr(), &mut err);
            ModuleContext::from_raw(raw).ok_or_else(|| err.take_or("jitlink_module_load failed"))
        }
    }

    unsafe fn save_module(
        &self,
        module: ModuleContext,
        path: &Path,
    ) -> std::result::Result<(), NativeError> {
        let path = path_string(path)?;
        let mut err = FfiError::none();
        if (self.fns.module_save)(module.as_ptr(), path.as_ptr(), &mut err) {
            Ok(())
        } else {
            Err(err.take_or("jitlink_module_save failed"))
        }
    }

    unsafe fn method_names(&self, module: ModuleContext) -> Vec<String> {
        let mut len = 0usize;
        let names = (self.fns.module_method_names)(module.as_ptr(), &mut len);
        ffi::take_string_array(names, len)
    }

    unsafe fn method_arguments(
        &self,
        module: ModuleContext,
        method: &str,
    ) -> std::result::Result<Vec<MethodArgument>, NativeError> {
        self.schema(self.fns.method_arguments, module, method)
    }

    unsafe fn method_returns(
        &self,
        module: ModuleContext,
        method: &str,
    ) -> std::result::Result<Vec<MethodArgument>, NativeError> {
        self.schema(self.fns.method_returns, module, method)
    }

    unsafe fn run_method(
        &self,
        module: ModuleContext,
        method: &str,
        args: &[RawIValue],
    ) -> std::result::Result<RawIValue, NativeError> {
        let name = ffi::c_string(method)?;
        let mut err = FfiError::none();
        let mut out = RawIValue {
            tag: IVALUE_TUPLE,
            data: ptr::null_mut::<c_void>(),
        };
        let ok = (self.fns.method_run)(
            module.as_ptr(),
            name.as_ptr(),
            args.as_ptr(),
            args.len(),
            &mut out,
            &mut err,
        );
        if ok {
            Ok(out)
        } else {
            Err(err.take_or("jitlink_method_run failed"))
        }
    }

    unsafe fn release_module(&self, module: ModuleContext) {
        (self.fns.module_free)(module.as_ptr());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_reports_the_path() {
        let path = std::env::temp_dir().join("jitlink-no-such-engine.so");
        let err = DylibEngine::open(&path).unwrap_err();
        match err {
            Error::EngineLibrary { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unset_library_path_is_a_config_error() {
        let config = Config {
            engine_lib: None,
            ..Config::default()
        };
        let err = DylibEngine::from_config(&config).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
