//! Compile-time description of nested host containers.

use crate::error::{Error, Result};

use super::codec::{Decoder, Encoder};
use super::{DType, Element, Scalar, Shape};

/// A statically nested container of scalars (`f32`, `Vec<f32>`, `[[i64; 3]; 2]`, ...).
///
/// The nesting depth is known at compile time (`RANK`); dimension sizes are taken from
/// the value itself and verified against the target shape while encoding.
pub trait TensorData: Sized {
    type Scalar: Scalar;

    /// Number of nested sequence levels above the scalar.
    const RANK: usize;

    /// Appends this value's dimensions, following the first element at each level.
    ///
    /// An empty sequence contributes `0` for itself and for every nested level.
    fn collect_shape(&self, dims: &mut Vec<usize>);

    fn encode(&self, shape: &[usize], encoder: &mut Encoder<'_>) -> Result<()>;

    fn decode(shape: &[usize], decoder: &mut Decoder<'_>) -> Result<Self>;

    #[doc(hidden)]
    fn encode_run(_run: &[Self], _encoder: &mut Encoder<'_>) -> Result<bool> {
        Ok(false)
    }

    #[doc(hidden)]
    fn decode_run(_len: usize, _decoder: &mut Decoder<'_>) -> Result<Option<Vec<Self>>> {
        Ok(None)
    }
}

/// Infers shape and dtype of a typed host value.
///
/// Only the first element at each level is inspected; uniformity is checked on encode.
pub fn infer<T>(value: &T) -> (Shape, DType)
where
    T: TensorData,
    T::Scalar: Element,
{
    let mut dims = Vec::with_capacity(T::RANK);
    value.collect_shape(&mut dims);
    (Shape::new(dims), <T::Scalar as Element>::DTYPE)
}

macro_rules! scalar_data {
    ($($ty:ty),*) => {$(
        impl TensorData for $ty {
            type Scalar = $ty;
            const RANK: usize = 0;

            fn collect_shape(&self, _dims: &mut Vec<usize>) {}

            fn encode(&self, shape: &[usize], encoder: &mut Encoder<'_>) -> Result<()> {
                if !shape.is_empty() {
                    return Err(Error::RankMismatch {
                        expected: shape.len(),
                        actual: 0,
                    });
                }
                encoder.write_scalar(*self)
            }

            fn decode(shape: &[usize], decoder: &mut Decoder<'_>) -> Result<Self> {
                if !shape.is_empty() {
                    return Err(Error::RankMismatch {
                        expected: shape.len(),
                        actual: 0,
                    });
                }
                decoder.read_scalar()
            }

            fn encode_run(run: &[Self], encoder: &mut Encoder<'_>) -> Result<bool> {
                encoder.write_run(run)?;
                Ok(true)
            }

            fn decode_run(len: usize, decoder: &mut Decoder<'_>) -> Result<Option<Vec<Self>>> {
                decoder.read_run(len).map(Some)
            }
        }
    )*};
}

scalar_data!(u8, i8, i32, i64, f32, f64, bool);

fn split_dim(shape: &[usize], rank: usize) -> Result<(usize, &[usize])> {
    shape
        .split_first()
        .map(|(&dim, rest)| (dim, rest))
        .ok_or(Error::RankMismatch {
            expected: 0,
            actual: rank,
        })
}

fn encode_seq<T: TensorData>(
    items: &[T],
    shape: &[usize],
    encoder: &mut Encoder<'_>,
) -> Result<()> {
    let (dim, rest) = split_dim(shape, T::RANK + 1)?;
    if items.len() != dim {
        return Err(Error::ShapeMismatch {
            expected: dim,
            actual: items.len(),
        });
    }
    if rest.is_empty() && T::encode_run(items, encoder)? {
        return Ok(());
    }
    items.iter().try_for_each(|item| item.encode(rest, encoder))
}

fn decode_seq<T: TensorData>(shape: &[usize], decoder: &mut Decoder<'_>) -> Result<Vec<T>> {
    let (dim, rest) = split_dim(shape, T::RANK + 1)?;
    if rest.is_empty() {
        if let Some(run) = T::decode_run(dim, decoder)? {
            return Ok(run);
        }
    }
    (0..dim).map(|_| T::decode(rest, decoder)).collect()
}

fn collect_seq<T: TensorData>(items: &[T], dims: &mut Vec<usize>) {
    dims.push(items.len());
    match items.first() {
        Some(first) => first.collect_shape(dims),
        None => dims.extend(std::iter::repeat(0).take(T::RANK)),
    }
}

impl<T: TensorData> TensorData for Vec<T> {
    type Scalar = T::Scalar;
    const RANK: usize = T::RANK + 1;

    fn collect_shape(&self, dims: &mut Vec<usize>) {
        collect_seq(self, dims);
    }

    fn encode(&self, shape: &[usize], encoder: &mut Encoder<'_>) -> Result<()> {
        encode_seq(self, shape, encoder)
    }

    fn decode(shape: &[usize], decoder: &mut Decoder<'_>) -> Result<Self> {
        decode_seq(shape, decoder)
    }
}

impl<T: TensorData, const N: usize> TensorData for [T; N] {
    type Scalar = T::Scalar;
    const RANK: usize = T::RANK + 1;

    fn collect_shape(&self, dims: &mut Vec<usize>) {
        collect_seq(self.as_slice(), dims);
    }

    fn encode(&self, shape: &[usize], encoder: &mut Encoder<'_>) -> Result<()> {
        encode_seq(self.as_slice(), shape, encoder)
    }

    fn decode(shape: &[usize], decoder: &mut Decoder<'_>) -> Result<Self> {
        let items = decode_seq::<T>(shape, decoder)?;
        let actual = items.len();
        items.try_into().map_err(|_| Error::ShapeMismatch {
            expected: N,
            actual,
        })
    }
}
