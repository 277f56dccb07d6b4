//! Marshalling between host values and a native tensor engine.
//!
//! Host data (typed Rust containers or dynamic [`HostValue`] trees) is encoded into
//! flat native-endian buffers, wrapped in engine-owned tensor views, and carried across
//! the engine call boundary as [`Value`] trees. Results travel back the same way.

pub mod boundary;
mod debug;
pub mod engine;
mod env;
pub mod error;
pub mod module;
pub mod tensor;
pub mod value;

pub use debug::print_tensors;
pub use engine::NativeEngine;
pub use env::{config, Config};
pub use error::{Error, Result};
pub use module::{Method, Module};
pub use tensor::{DType, Element, HostValue, Scalar, Shape, Tensor, TensorData};
pub use value::Value;
