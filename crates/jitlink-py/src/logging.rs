use pyo3::prelude::*;
use tracing_subscriber::EnvFilter;

/// Install a stderr log subscriber filtered by `JITLINK_LOG` (default `info`).
///
/// Returns `False` when a subscriber was already installed.
#[pyfunction]
pub fn enable_logging() -> bool {
    let filter = EnvFilter::try_from_env("JITLINK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
