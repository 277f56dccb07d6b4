//! Lightweight wrapper for tensor shapes and dimension bookkeeping.

use crate::error::{Error, Result};
use crate::tensor::DType;

/// Stores the logical dimensions of a tensor, outermost first.
///
/// An empty dimension list describes a scalar (one element).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn new<D: Into<Vec<usize>>>(dims: D) -> Self {
        Shape { dims: dims.into() }
    }

    /// Shape of a rank-0 tensor.
    pub fn scalar() -> Self {
        Shape { dims: Vec::new() }
    }

    /// Builds a shape from the engine's signed dimension list.
    pub fn from_i64(dims: &[i64]) -> Result<Self> {
        let dims = dims
            .iter()
            .map(|&d| {
                usize::try_from(d)
                    .map_err(|_| Error::marshal(format!("engine reported negative dimension {d}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Shape { dims })
    }

    /// Borrow the raw dimension slice for downstream calculations.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Dimensions in the signed form the engine ABI expects.
    pub fn to_i64(&self) -> Result<Vec<i64>> {
        self.dims
            .iter()
            .map(|&d| {
                i64::try_from(d).map_err(|_| Error::marshal(format!("dimension {d} overflows i64")))
            })
            .collect()
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Computes the total number of elements implied by the shape.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Byte length of a dense buffer holding this shape at `dtype`, failing on overflow.
    pub fn byte_len(&self, dtype: DType) -> Result<usize> {
        self.dims
            .iter()
            .try_fold(dtype.size_in_bytes(), |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| {
                Error::marshal(format!(
                    "tensor of shape {:?} and dtype {:?} overflows addressable memory",
                    self.dims, dtype
                ))
            })
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims.to_vec())
    }
}
