//! Scalar element traits: the closed, compile-time table of encodable kinds.

use std::fmt;
use std::mem::size_of;
use std::ptr;

use super::codec::ByteOrder;
use super::{DType, HostValue};

mod sealed {
    pub trait Sealed {}
}

/// A fixed-width scalar the codec can write into and read from a tensor buffer.
///
/// Implemented for the six dtype-backed numeric types and for `bool`, which is stored as
/// a single `0`/`1` byte but has no dtype of its own.
pub trait Scalar: Copy + PartialEq + fmt::Debug + Send + Sync + sealed::Sealed + 'static {
    /// Encoded width in bytes.
    const WIDTH: usize;
    /// Rust type name used in diagnostics.
    const NAME: &'static str;

    /// Whether values of this type may be stored in a tensor of `dtype`.
    fn accepts(dtype: DType) -> bool;

    /// Writes `self` into `out` (exactly `WIDTH` bytes) using `order`.
    fn write(self, order: ByteOrder, out: &mut [u8]);

    /// Reads one value from `bytes` (exactly `WIDTH` bytes) using `order`.
    fn read(order: ByteOrder, bytes: &[u8]) -> Self;

    /// Views a run in its in-memory layout, for types whose layout is the encoding.
    #[doc(hidden)]
    fn run_as_bytes(run: &[Self]) -> Option<&[u8]>;

    /// Rebuilds a run from its in-memory layout, for types whose layout is the encoding.
    #[doc(hidden)]
    fn run_from_bytes(bytes: &[u8]) -> Option<Vec<Self>>;

    fn into_host(self) -> HostValue;

    fn from_host(value: &HostValue) -> Option<Self>;
}

/// A scalar with a dtype mapping; only these drive shape/dtype inference.
pub trait Element: Scalar {
    const DTYPE: DType;
}

macro_rules! numeric_element {
    ($ty:ty, $dtype:ident) => {
        impl sealed::Sealed for $ty {}

        impl Scalar for $ty {
            const WIDTH: usize = size_of::<$ty>();
            const NAME: &'static str = stringify!($ty);

            fn accepts(dtype: DType) -> bool {
                dtype == DType::$dtype
            }

            fn write(self, order: ByteOrder, out: &mut [u8]) {
                match order {
                    ByteOrder::Little => out.copy_from_slice(&self.to_le_bytes()),
                    ByteOrder::Big => out.copy_from_slice(&self.to_be_bytes()),
                }
            }

            fn read(order: ByteOrder, bytes: &[u8]) -> Self {
                let mut raw = [0u8; size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                match order {
                    ByteOrder::Little => <$ty>::from_le_bytes(raw),
                    ByteOrder::Big => <$ty>::from_be_bytes(raw),
                }
            }

            fn run_as_bytes(run: &[Self]) -> Option<&[u8]> {
                // SAFETY: numeric primitives have no padding and every byte is initialized.
                Some(unsafe {
                    std::slice::from_raw_parts(run.as_ptr() as *const u8, run.len() * Self::WIDTH)
                })
            }

            fn run_from_bytes(bytes: &[u8]) -> Option<Vec<Self>> {
                let len = bytes.len() / Self::WIDTH;
                let mut out: Vec<$ty> = Vec::with_capacity(len);
                // SAFETY: the destination has capacity for `len` elements, the source holds at
                // least `len * WIDTH` bytes, and every bit pattern is a valid value of this type.
                unsafe {
                    ptr::copy_nonoverlapping(
                        bytes.as_ptr(),
                        out.as_mut_ptr() as *mut u8,
                        len * Self::WIDTH,
                    );
                    out.set_len(len);
                }
                Some(out)
            }

            fn into_host(self) -> HostValue {
                HostValue::$dtype(self)
            }

            fn from_host(value: &HostValue) -> Option<Self> {
                match value {
                    HostValue::$dtype(v) => Some(*v),
                    _ => None,
                }
            }
        }

        impl Element for $ty {
            const DTYPE: DType = DType::$dtype;
        }
    };
}

numeric_element!(u8, Byte);
numeric_element!(i8, Char);
numeric_element!(i32, Int);
numeric_element!(i64, Long);
numeric_element!(f32, Float);
numeric_element!(f64, Double);

impl sealed::Sealed for bool {}

impl Scalar for bool {
    const WIDTH: usize = 1;
    const NAME: &'static str = "bool";

    fn accepts(dtype: DType) -> bool {
        dtype == DType::Byte
    }

    fn write(self, _order: ByteOrder, out: &mut [u8]) {
        out[0] = u8::from(self);
    }

    fn read(_order: ByteOrder, bytes: &[u8]) -> Self {
        bytes[0] == 1
    }

    fn run_as_bytes(_run: &[Self]) -> Option<&[u8]> {
        None
    }

    fn run_from_bytes(_bytes: &[u8]) -> Option<Vec<Self>> {
        None
    }

    fn into_host(self) -> HostValue {
        HostValue::Bool(self)
    }

    fn from_host(value: &HostValue) -> Option<Self> {
        match value {
            HostValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_dtypes_are_a_closed_table() {
        assert_eq!(<u8 as Element>::DTYPE, DType::Byte);
        assert_eq!(<i8 as Element>::DTYPE, DType::Char);
        assert_eq!(<i32 as Element>::DTYPE, DType::Int);
        assert_eq!(<i64 as Element>::DTYPE, DType::Long);
        assert_eq!(<f32 as Element>::DTYPE, DType::Float);
        assert_eq!(<f64 as Element>::DTYPE, DType::Double);
        for dtype in DType::ALL {
            let width_matches = match dtype {
                DType::Byte => u8::WIDTH,
                DType::Char => i8::WIDTH,
                DType::Int => i32::WIDTH,
                DType::Long => i64::WIDTH,
                DType::Float => f32::WIDTH,
                DType::Double => f64::WIDTH,
            };
            assert_eq!(width_matches, dtype.size_in_bytes());
        }
    }

    #[test]
    fn explicit_order_matches_std_conversions() {
        let mut out = [0u8; 4];
        1.5f32.write(ByteOrder::Little, &mut out);
        assert_eq!(out, 1.5f32.to_le_bytes());
        1.5f32.write(ByteOrder::Big, &mut out);
        assert_eq!(out, 1.5f32.to_be_bytes());
        assert_eq!(f32::read(ByteOrder::Big, &out), 1.5);
    }

    #[test]
    fn bool_bytes_are_zero_or_one_and_decode_never_panics() {
        let mut out = [7u8; 1];
        true.write(ByteOrder::Little, &mut out);
        assert_eq!(out, [1]);
        false.write(ByteOrder::Little, &mut out);
        assert_eq!(out, [0]);
        assert!(bool::read(ByteOrder::Little, &[1]));
        assert!(!bool::read(ByteOrder::Little, &[0]));
        assert!(!bool::read(ByteOrder::Little, &[0xff]));
        assert!(bool::accepts(DType::Byte));
        assert!(!bool::accepts(DType::Char));
    }
}
