use pyo3::prelude::*;

mod engine;
mod errors;
mod logging;
mod module;
mod tensor;

#[pymodule]
fn _native(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Core types
    m.add_class::<tensor::PyTensor>()?;
    m.add_class::<module::PyScriptModule>()?;

    // Engine management
    m.add_function(wrap_pyfunction!(engine::set_engine, m)?)?;
    m.add_function(wrap_pyfunction!(engine::get_engine, m)?)?;
    m.add_function(wrap_pyfunction!(engine::list_engines, m)?)?;

    // Diagnostics
    m.add_function(wrap_pyfunction!(logging::enable_logging, m)?)?;
    m.add_function(wrap_pyfunction!(tensor::print_tensors, m)?)?;

    Ok(())
}
