//! Runtime engine registry for selecting engines by name.
//!
//! Engine crates register a constructor under a name; callers pick one with
//! [`create_engine`] or take the configured default with [`default_engine`]. The
//! shared-library engine is always available as `"dylib"`.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::env::config;
use crate::error::{Error, Result};

use super::{DylibEngine, NativeEngine};

/// Factory producing a fresh engine instance.
pub type EngineConstructor = Box<dyn Fn() -> Result<Arc<dyn NativeEngine>> + Send + Sync>;

struct EngineRegistry {
    engines: RwLock<HashMap<String, EngineConstructor>>,
}

impl EngineRegistry {
    fn new() -> Self {
        let registry = Self {
            engines: RwLock::new(HashMap::new()),
        };
        registry.register(
            "dylib".to_string(),
            Box::new(|| {
                let engine = DylibEngine::from_config(config())?;
                Ok(Arc::new(engine) as Arc<dyn NativeEngine>)
            }),
        );
        registry
    }

    fn register(&self, name: String, constructor: EngineConstructor) {
        self.engines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, constructor);
    }

    fn create(&self, name: &str) -> Option<Result<Arc<dyn NativeEngine>>> {
        let engines = self.engines.read().unwrap_or_else(PoisonError::into_inner);
        let constructor = engines.get(name)?;
        Some(constructor())
    }

    fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .engines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn contains(&self, name: &str) -> bool {
        self.engines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

static GLOBAL_REGISTRY: OnceLock<EngineRegistry> = OnceLock::new();

fn global_registry() -> &'static EngineRegistry {
    GLOBAL_REGISTRY.get_or_init(EngineRegistry::new)
}

/// Registers an engine constructor, replacing any previous one with the same name.
///
/// # Example
/// ```ignore
/// jitlink::engine::register_engine("my-engine", || {
///     Ok(std::sync::Arc::new(MyEngine::new()) as _)
/// });
/// ```
pub fn register_engine<F>(name: impl Into<String>, constructor: F)
where
    F: Fn() -> Result<Arc<dyn NativeEngine>> + Send + Sync + 'static,
{
    global_registry().register(name.into(), Box::new(constructor));
}

/// Creates an engine by name, failing with [`Error::UnknownEngine`] for unregistered names.
pub fn create_engine(name: &str) -> Result<Arc<dyn NativeEngine>> {
    global_registry()
        .create(name)
        .unwrap_or_else(|| {
            Err(Error::UnknownEngine {
                name: name.to_string(),
                available: list_engines(),
            })
        })
}

/// Registered engine names, sorted.
pub fn list_engines() -> Vec<String> {
    global_registry().list()
}

pub fn has_engine(name: &str) -> bool {
    global_registry().contains(name)
}

/// Creates the engine named by `JITLINK_ENGINE` (default `"ref"`).
pub fn default_engine() -> Result<Arc<dyn NativeEngine>> {
    create_engine(&config().engine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_engines_list_the_alternatives() {
        let err = create_engine("no-such-engine").unwrap_err();
        match err {
            Error::UnknownEngine { name, available } => {
                assert_eq!(name, "no-such-engine");
                assert!(available.contains(&"dylib".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn registered_constructors_are_invoked_on_create() {
        register_engine("registry-test-failing", || {
            Err(Error::Config {
                message: "constructor ran".to_string(),
            })
        });
        assert!(has_engine("registry-test-failing"));
        assert!(list_engines().windows(2).all(|pair| pair[0] <= pair[1]));
        let err = create_engine("registry-test-failing").unwrap_err();
        assert!(matches!(err, Error::Config { ref message } if message == "constructor ran"));
    }
}
