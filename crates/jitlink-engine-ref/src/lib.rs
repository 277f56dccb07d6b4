//! Reference engine for jitlink: dense host tensors and a tiny script interpreter.

mod engine;
mod script;
mod tensor;

use std::sync::Arc;

use jitlink::NativeEngine;

pub use engine::RefEngine;
pub use script::{ScriptError, ScriptType};

/// Register the reference engine with the global engine registry as `"ref"`.
///
/// Called automatically on library load where supported, and safe to call again.
pub fn register_ref_engine() {
    jitlink::engine::register_engine("ref", || {
        Ok(Arc::new(RefEngine::new()) as Arc<dyn NativeEngine>)
    });
}

// Auto-register on library load
#[cfg(target_os = "linux")]
#[used]
#[link_section = ".init_array"]
static REGISTER_REF_ENGINE: extern "C" fn() = {
    extern "C" fn register() {
        register_ref_engine();
    }
    register
};
