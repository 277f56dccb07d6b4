use std::sync::{Arc, PoisonError, RwLock};

use jitlink::engine::registry;
use jitlink::NativeEngine;
use pyo3::prelude::*;

use crate::errors::to_py_err;

// Name and instance of the engine new tensors and modules are created on. Existing
// objects keep the engine they were created with.
static CURRENT_ENGINE: RwLock<Option<(String, Arc<dyn NativeEngine>)>> = RwLock::new(None);

/// Ensure built-in engines are registered
fn ensure_engines_registered() {
    jitlink_engine_ref::register_ref_engine();
}

/// Select the engine for subsequently created tensors and modules
#[pyfunction]
pub fn set_engine(name: &str) -> PyResult<()> {
    ensure_engines_registered();
    let engine = registry::create_engine(name).map_err(to_py_err)?;
    *CURRENT_ENGINE.write().unwrap_or_else(PoisonError::into_inner) = Some((name.to_string(), engine));
    Ok(())
}

/// Get the current engine name
#[pyfunction]
pub fn get_engine() -> String {
    CURRENT_ENGINE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .map(|(name, _)| name.clone())
        .unwrap_or_else(|| jitlink::config().engine.clone())
}

/// List all registered engines
#[pyfunction]
pub fn list_engines() -> Vec<String> {
    ensure_engines_registered();
    registry::list_engines()
}

/// The current engine, created from `JITLINK_ENGINE` on first use.
pub(crate) fn current_engine() -> PyResult<Arc<dyn NativeEngine>> {
    if let Some((_, engine)) = CURRENT_ENGINE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
    {
        return Ok(Arc::clone(engine));
    }
    ensure_engines_registered();
    let mut state = CURRENT_ENGINE.write().unwrap_or_else(PoisonError::into_inner);
    if let Some((_, engine)) = state.as_ref() {
        return Ok(Arc::clone(engine));
    }
    let engine = registry::default_engine().map_err(to_py_err)?;
    *state = Some((jitlink::config().engine.clone(), Arc::clone(&engine)));
    Ok(engine)
}
