use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Name of the engine selected when `JITLINK_ENGINE` is unset.
pub const DEFAULT_ENGINE: &str = "ref";

/// Process configuration read from `JITLINK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Registry name of the default engine (`JITLINK_ENGINE`).
    pub engine: String,
    /// Shared library loaded by the `dylib` engine (`JITLINK_ENGINE_LIB`).
    pub engine_lib: Option<PathBuf>,
    /// Whether innermost numeric runs are copied as one block (`JITLINK_CODEC_FAST_PATH`).
    pub codec_fast_path: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: DEFAULT_ENGINE.to_string(),
            engine_lib: None,
            codec_fast_path: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            engine: non_empty("JITLINK_ENGINE")
                .map(|value| value.trim().to_string())
                .unwrap_or(defaults.engine),
            engine_lib: non_empty("JITLINK_ENGINE_LIB").map(PathBuf::from),
            codec_fast_path: non_empty("JITLINK_CODEC_FAST_PATH")
                .map(|value| parse_bool(&value))
                .unwrap_or(defaults.codec_fast_path),
        }
    }
}

/// Returns the process configuration, reading the environment on first use.
pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset_or_blank() {
        let cfg = Config::from_lookup(lookup(&[("JITLINK_ENGINE", "  ")]));
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.engine, "ref");
        assert!(cfg.codec_fast_path);
    }

    #[test]
    fn reads_engine_and_library_path() {
        let cfg = Config::from_lookup(lookup(&[
            ("JITLINK_ENGINE", "dylib"),
            ("JITLINK_ENGINE_LIB", "/opt/engine/libjitlink_c_runtime.so"),
            ("JITLINK_CODEC_FAST_PATH", "off"),
        ]));
        assert_eq!(cfg.engine, "dylib");
        assert_eq!(
            cfg.engine_lib,
            Some(PathBuf::from("/opt/engine/libjitlink_c_runtime.so"))
        );
        assert!(!cfg.codec_fast_path);
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool(value), "{value} should parse as true");
        }
        for value in ["0", "false", "no", "off", "maybe"] {
            assert!(!parse_bool(value), "{value} should parse as false");
        }
    }
}
