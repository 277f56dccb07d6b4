//! Host-side tensor representation and the binary codec feeding native buffers.
//!
//! [`TensorData`] describes statically nested Rust containers, [`HostValue`] describes
//! trees only known at runtime. Both infer a [`Shape`]/[`DType`] pair and encode into the
//! flat native-endian layout the engine reads; [`Tensor`] owns the resulting buffer
//! together with the engine's view over it.

mod buffer;
pub mod codec;
mod data;
pub mod dtype;
mod element;
mod handle;
mod host_value;
pub mod shape;

pub use codec::{native_endian, ByteOrder, Decoder, Encoder};
pub use data::{infer, TensorData};
pub use dtype::DType;
pub use element::{Element, Scalar};
pub use handle::Tensor;
pub use host_value::HostValue;
pub use shape::Shape;
