//! Compiled script modules and method invocation.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::boundary::{to_boundary, ArgNode, RawIValue, ResultNode};
use crate::engine::{MethodArgument, ModuleContext, NativeEngine};
use crate::error::{Error, Result};
use crate::value::Value;

/// A compiled or loaded engine module.
pub struct Module {
    engine: Arc<dyn NativeEngine>,
    context: ModuleContext,
}

// SAFETY: the module context is exclusively owned by this handle and engines are
// `Send + Sync`.
unsafe impl Send for Module {}

impl Module {
    pub fn compile(engine: &Arc<dyn NativeEngine>, source: &str) -> Result<Self> {
        debug!(engine = engine.name(), bytes = source.len(), "compiling script module");
        let context = engine.compile_script(source).map_err(Error::from_native)?;
        Ok(Self {
            engine: Arc::clone(engine),
            context,
        })
    }

    pub fn load(engine: &Arc<dyn NativeEngine>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(engine = engine.name(), path = %path.display(), "loading module");
        let context = engine.load_module(path).map_err(Error::from_native)?;
        Ok(Self {
            engine: Arc::clone(engine),
            context,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        debug!(engine = self.engine.name(), path = %path.display(), "saving module");
        // SAFETY: the module context is live for as long as `self`.
        unsafe { self.engine.save_module(self.context, path) }.map_err(Error::from_native)
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    pub fn method_names(&self) -> Vec<String> {
        // SAFETY: the module context is live for as long as `self`.
        unsafe { self.engine.method_names(self.context) }
    }

    /// Looks up a method by name.
    pub fn method(&self, name: &str) -> Result<Method<'_>> {
        if !self.method_names().iter().any(|candidate| candidate == name) {
            return Err(Error::MethodNotFound {
                message: format!("Method '{name}' is not defined."),
            });
        }
        Ok(Method {
            module: self,
            name: name.to_string(),
        })
    }

    /// Runs `name` without a schema lookup; unknown names are reported by the engine.
    pub fn run_method(&self, name: &str, args: &[Value]) -> Result<Value> {
        invoke(self, name, args)
    }

    pub fn forward(&self, args: &[Value]) -> Result<Value> {
        self.run_method("forward", args)
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        // SAFETY: the module context is owned by this handle and released exactly once.
        unsafe { self.engine.release_module(self.context) };
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("engine", &self.engine.name())
            .field("methods", &self.method_names())
            .finish()
    }
}

/// A named method of a [`Module`].
#[derive(Debug)]
pub struct Method<'m> {
    module: &'m Module,
    name: String,
}

impl Method<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> Result<Vec<MethodArgument>> {
        // SAFETY: the module context is live for the borrow of the module.
        unsafe {
            self.module
                .engine
                .method_arguments(self.module.context, &self.name)
        }
        .map_err(Error::from_native)
    }

    pub fn returns(&self) -> Result<Vec<MethodArgument>> {
        // SAFETY: the module context is live for the borrow of the module.
        unsafe {
            self.module
                .engine
                .method_returns(self.module.context, &self.name)
        }
        .map_err(Error::from_native)
    }

    pub fn run(&self, args: &[Value]) -> Result<Value> {
        invoke(self.module, &self.name, args)
    }
}

fn invoke(module: &Module, name: &str, args: &[Value]) -> Result<Value> {
    debug!(method = name, args = args.len(), "invoking method");
    let engine = &module.engine;
    let nodes = args
        .iter()
        .map(|arg| to_boundary(engine, arg))
        .collect::<Result<Vec<ArgNode<'_>>>>()?;
    let raws: Vec<RawIValue> = nodes.iter().map(ArgNode::as_raw).collect();
    // SAFETY: the module context is live and every argument node borrows a live value
    // of this engine until `nodes` is dropped below.
    let result = unsafe { engine.run_method(module.context, name, &raws) };
    drop(nodes);
    let raw = result.map_err(Error::from_native)?;
    // SAFETY: the engine hands ownership of the result tree to the caller.
    let node = unsafe { ResultNode::from_raw(Arc::clone(engine), raw) };
    node.into_value()
}
