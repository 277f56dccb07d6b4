use std::fmt;
use std::slice;

use jitlink::DType;

/// Where a tensor's bytes live.
pub(crate) enum Storage {
    /// Caller-owned memory handed over through `new_tensor`; never freed here.
    View { ptr: *const u8, len: usize },
    Owned(Vec<u8>),
}

/// Engine-side tensor: dense, row-major, native-endian.
pub(crate) struct RefTensor {
    pub(crate) dims: Vec<usize>,
    pub(crate) dtype: DType,
    pub(crate) storage: Storage,
}

impl fmt::Debug for RefTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefTensor")
            .field("dims", &self.dims)
            .field("dtype", &self.dtype)
            .field("view", &matches!(self.storage, Storage::View { .. }))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
}

impl BinaryOp {
    pub(crate) fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
        }
    }
}

impl RefTensor {
    pub(crate) fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        match &self.storage {
            // SAFETY: the creator of a view keeps `len` bytes alive until release.
            Storage::View { ptr, len } => unsafe { slice::from_raw_parts(*ptr, *len) },
            Storage::Owned(bytes) => bytes,
        }
    }

    /// A view sharing this tensor's bytes; valid while `self` is.
    pub(crate) fn view(&self) -> RefTensor {
        let bytes = self.bytes();
        RefTensor {
            dims: self.dims.clone(),
            dtype: self.dtype,
            storage: Storage::View {
                ptr: bytes.as_ptr(),
                len: bytes.len(),
            },
        }
    }

    pub(crate) fn to_owned_copy(&self) -> RefTensor {
        RefTensor {
            dims: self.dims.clone(),
            dtype: self.dtype,
            storage: Storage::Owned(self.bytes().to_vec()),
        }
    }

    /// Elementwise `lhs op rhs`; operands share a dtype and either a shape or one side
    /// holds a single element.
    pub(crate) fn binary(op: BinaryOp, lhs: &RefTensor, rhs: &RefTensor) -> Result<RefTensor, String> {
        if lhs.dtype != rhs.dtype {
            return Err(format!(
                "Operands of '{}' must have the same dtype, got {:?} and {:?}",
                op.symbol(),
                lhs.dtype,
                rhs.dtype
            ));
        }
        let dims = if lhs.dims == rhs.dims {
            lhs.dims.clone()
        } else if rhs.num_elements() == 1 && lhs.dims.len() >= rhs.dims.len() {
            lhs.dims.clone()
        } else if lhs.num_elements() == 1 {
            rhs.dims.clone()
        } else if rhs.num_elements() == 1 {
            lhs.dims.clone()
        } else {
            return Err(format!(
                "The size of tensor a {:?} must match the size of tensor b {:?} for '{}'",
                lhs.dims,
                rhs.dims,
                op.symbol()
            ));
        };
        let len: usize = dims.iter().product();
        let (a, b) = (lhs.bytes(), rhs.bytes());
        let bytes = match lhs.dtype {
            DType::Byte => elementwise::<u8>(op, a, b, len),
            DType::Char => elementwise::<i8>(op, a, b, len),
            DType::Int => elementwise::<i32>(op, a, b, len),
            DType::Long => elementwise::<i64>(op, a, b, len),
            DType::Float => elementwise::<f32>(op, a, b, len),
            DType::Double => elementwise::<f64>(op, a, b, len),
        };
        Ok(RefTensor {
            dims,
            dtype: lhs.dtype,
            storage: Storage::Owned(bytes),
        })
    }
}

trait Numeric: Copy {
    const WIDTH: usize;
    fn read(bytes: &[u8]) -> Self;
    fn extend(self, out: &mut Vec<u8>);
    fn apply(op: BinaryOp, a: Self, b: Self) -> Self;
}

macro_rules! int_numeric {
    ($($ty:ty),*) => {$(
        impl Numeric for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn read(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(raw)
            }

            fn extend(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            fn apply(op: BinaryOp, a: Self, b: Self) -> Self {
                match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                }
            }
        }
    )*};
}

macro_rules! float_numeric {
    ($($ty:ty),*) => {$(
        impl Numeric for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn read(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(raw)
            }

            fn extend(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            fn apply(op: BinaryOp, a: Self, b: Self) -> Self {
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                }
            }
        }
    )*};
}

int_numeric!(u8, i8, i32, i64);
float_numeric!(f32, f64);

fn element<T: Numeric>(bytes: &[u8], index: usize) -> T {
    // Single-element operands are broadcast.
    let index = if bytes.len() == T::WIDTH { 0 } else { index };
    T::read(&bytes[index * T::WIDTH..(index + 1) * T::WIDTH])
}

fn elementwise<T: Numeric>(op: BinaryOp, a: &[u8], b: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len * T::WIDTH);
    for index in 0..len {
        T::apply(op, element::<T>(a, index), element::<T>(b, index)).extend(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned_f32(dims: &[usize], values: &[f32]) -> RefTensor {
        RefTensor {
            dims: dims.to_vec(),
            dtype: DType::Float,
            storage: Storage::Owned(values.iter().flat_map(|v| v.to_ne_bytes()).collect()),
        }
    }

    fn f32_values(tensor: &RefTensor) -> Vec<f32> {
        tensor
            .bytes()
            .chunks_exact(4)
            .map(|chunk| f32::read(chunk))
            .collect()
    }

    #[test]
    fn same_shape_operands_combine_elementwise() {
        let a = owned_f32(&[2], &[1.0, 2.0]);
        let b = owned_f32(&[2], &[1.0, 2.0]);
        let sum = RefTensor::binary(BinaryOp::Add, &a, &b).unwrap();
        assert_eq!(sum.dims, vec![2]);
        assert_eq!(f32_values(&sum), vec![2.0, 4.0]);
    }

    #[test]
    fn single_element_operands_broadcast() {
        let a = owned_f32(&[3], &[1.0, 2.0, 3.0]);
        let k = owned_f32(&[], &[2.0]);
        let product = RefTensor::binary(BinaryOp::Mul, &a, &k).unwrap();
        assert_eq!(f32_values(&product), vec![2.0, 4.0, 6.0]);
        let diff = RefTensor::binary(BinaryOp::Sub, &k, &a).unwrap();
        assert_eq!(f32_values(&diff), vec![1.0, 0.0, -1.0]);
    }

    #[test]
    fn mismatched_operands_are_rejected() {
        let a = owned_f32(&[2], &[1.0, 2.0]);
        let b = owned_f32(&[3], &[1.0, 2.0, 3.0]);
        assert!(RefTensor::binary(BinaryOp::Add, &a, &b).is_err());

        let c = RefTensor {
            dims: vec![2],
            dtype: DType::Long,
            storage: Storage::Owned(vec![0; 16]),
        };
        let err = RefTensor::binary(BinaryOp::Add, &a, &c).unwrap_err();
        assert!(err.contains("same dtype"));
    }

    #[test]
    fn integer_arithmetic_wraps() {
        let a = RefTensor {
            dims: vec![1],
            dtype: DType::Byte,
            storage: Storage::Owned(vec![250]),
        };
        let b = RefTensor {
            dims: vec![1],
            dtype: DType::Byte,
            storage: Storage::Owned(vec![10]),
        };
        let sum = RefTensor::binary(BinaryOp::Add, &a, &b).unwrap();
        assert_eq!(sum.bytes(), &[4]);
    }
}
