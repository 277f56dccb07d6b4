use tracing::info;

use crate::tensor::Tensor;

/// Logs shape, dtype and decoded values of each tensor at `info` level.
pub fn print_tensors(tensors: &[&Tensor]) {
    for (index, tensor) in tensors.iter().enumerate() {
        match tensor.host_value() {
            Ok(value) => info!(
                index,
                shape = ?tensor.shape().dims(),
                dtype = ?tensor.dtype(),
                ?value,
                "tensor"
            ),
            Err(err) => info!(
                index,
                shape = ?tensor.shape().dims(),
                dtype = ?tensor.dtype(),
                error = %err,
                "tensor (undecodable)"
            ),
        }
    }
}
