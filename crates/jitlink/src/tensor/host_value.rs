//! Dynamically typed host values whose nesting is only known at runtime.

use crate::error::{Error, Result};

use super::codec::{Decoder, Encoder};
use super::{DType, Shape};

/// A scalar or an arbitrarily nested list of host values.
///
/// This is the runtime mirror of [`TensorData`](super::TensorData) for callers (such as
/// language bindings) that cannot name the nesting depth statically.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Bool(bool),
    Byte(u8),
    Char(i8),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    List(Vec<HostValue>),
}

impl HostValue {
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<HostValue>,
    {
        HostValue::List(items.into_iter().map(Into::into).collect())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            HostValue::Bool(_) => "bool",
            HostValue::Byte(_) => "u8",
            HostValue::Char(_) => "i8",
            HostValue::Int(_) => "i32",
            HostValue::Long(_) => "i64",
            HostValue::Float(_) => "f32",
            HostValue::Double(_) => "f64",
            HostValue::List(_) => "list",
        }
    }

    /// Dtype of a scalar; `None` for lists and for kinds without a mapping.
    pub fn scalar_dtype(&self) -> Option<DType> {
        match self {
            HostValue::Byte(_) => Some(DType::Byte),
            HostValue::Char(_) => Some(DType::Char),
            HostValue::Int(_) => Some(DType::Int),
            HostValue::Long(_) => Some(DType::Long),
            HostValue::Float(_) => Some(DType::Float),
            HostValue::Double(_) => Some(DType::Double),
            HostValue::Bool(_) | HostValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[HostValue]> {
        match self {
            HostValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Infers shape and dtype by following the first element at each level.
    ///
    /// An empty list has no element to follow, so its dtype cannot be inferred; use an
    /// explicit shape/dtype for empty data.
    pub fn infer(&self) -> Result<(Shape, DType)> {
        let mut dims = Vec::new();
        let mut current = self;
        loop {
            match current {
                HostValue::List(items) => {
                    dims.push(items.len());
                    match items.first() {
                        Some(first) => current = first,
                        None => {
                            return Err(Error::unsupported(
                                "empty list (element type cannot be inferred)",
                            ))
                        }
                    }
                }
                scalar => {
                    let dtype = scalar
                        .scalar_dtype()
                        .ok_or_else(|| Error::unsupported(scalar.kind_name()))?;
                    return Ok((Shape::new(dims), dtype));
                }
            }
        }
    }

    pub(crate) fn encode(
        &self,
        shape: &[usize],
        dtype: DType,
        encoder: &mut Encoder<'_>,
    ) -> Result<()> {
        match (self, shape.split_first()) {
            (HostValue::List(items), Some((&dim, rest))) => {
                if items.len() != dim {
                    return Err(Error::ShapeMismatch {
                        expected: dim,
                        actual: items.len(),
                    });
                }
                items
                    .iter()
                    .try_for_each(|item| item.encode(rest, dtype, encoder))
            }
            (HostValue::List(_), None) => Err(Error::RankMismatch {
                expected: 0,
                actual: self.depth(),
            }),
            (_, Some(_)) => Err(Error::RankMismatch {
                expected: shape.len(),
                actual: 0,
            }),
            (scalar, None) => scalar.encode_leaf(dtype, encoder),
        }
    }

    fn encode_leaf(&self, dtype: DType, encoder: &mut Encoder<'_>) -> Result<()> {
        match (dtype, self) {
            (DType::Byte, HostValue::Byte(v)) => encoder.write_scalar(*v),
            (DType::Byte, HostValue::Bool(v)) => encoder.write_scalar(*v),
            (DType::Char, HostValue::Char(v)) => encoder.write_scalar(*v),
            (DType::Int, HostValue::Int(v)) => encoder.write_scalar(*v),
            (DType::Long, HostValue::Long(v)) => encoder.write_scalar(*v),
            (DType::Float, HostValue::Float(v)) => encoder.write_scalar(*v),
            (DType::Double, HostValue::Double(v)) => encoder.write_scalar(*v),
            (expected, other) => Err(Error::DTypeMismatch {
                expected,
                actual: other.kind_name().to_string(),
            }),
        }
    }

    pub(crate) fn decode(shape: &[usize], dtype: DType, decoder: &mut Decoder<'_>) -> Result<Self> {
        let Some((&dim, rest)) = shape.split_first() else {
            return Self::decode_leaf(dtype, decoder);
        };
        if rest.is_empty() {
            let items = match dtype {
                DType::Byte => wrap(decoder.read_run::<u8>(dim)?, HostValue::Byte),
                DType::Char => wrap(decoder.read_run::<i8>(dim)?, HostValue::Char),
                DType::Int => wrap(decoder.read_run::<i32>(dim)?, HostValue::Int),
                DType::Long => wrap(decoder.read_run::<i64>(dim)?, HostValue::Long),
                DType::Float => wrap(decoder.read_run::<f32>(dim)?, HostValue::Float),
                DType::Double => wrap(decoder.read_run::<f64>(dim)?, HostValue::Double),
            };
            return Ok(HostValue::List(items));
        }
        (0..dim)
            .map(|_| Self::decode(rest, dtype, decoder))
            .collect::<Result<Vec<_>>>()
            .map(HostValue::List)
    }

    fn decode_leaf(dtype: DType, decoder: &mut Decoder<'_>) -> Result<Self> {
        Ok(match dtype {
            DType::Byte => HostValue::Byte(decoder.read_scalar()?),
            DType::Char => HostValue::Char(decoder.read_scalar()?),
            DType::Int => HostValue::Int(decoder.read_scalar()?),
            DType::Long => HostValue::Long(decoder.read_scalar()?),
            DType::Float => HostValue::Float(decoder.read_scalar()?),
            DType::Double => HostValue::Double(decoder.read_scalar()?),
        })
    }

    /// Nesting depth following first elements (0 for scalars).
    pub fn depth(&self) -> usize {
        self.as_list()
            .map_or(0, |items| 1 + items.first().map_or(0, HostValue::depth))
    }
}

fn wrap<S>(run: Vec<S>, f: impl Fn(S) -> HostValue) -> Vec<HostValue> {
    run.into_iter().map(f).collect()
}

macro_rules! host_from {
    ($($ty:ty => $variant:ident),*) => {$(
        impl From<$ty> for HostValue {
            fn from(value: $ty) -> Self {
                HostValue::$variant(value)
            }
        }
    )*};
}

host_from!(bool => Bool, u8 => Byte, i8 => Char, i32 => Int, i64 => Long, f32 => Float, f64 => Double);

impl<V: Into<HostValue>> From<Vec<V>> for HostValue {
    fn from(items: Vec<V>) -> Self {
        HostValue::list(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::codec::{decode_host_value, encode, encode_host_value};

    #[test]
    fn infers_nested_lists() {
        let value = HostValue::from(vec![vec![1.0f32, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]);
        assert_eq!(value.infer().unwrap(), (Shape::from([3, 2]), DType::Float));
        assert_eq!(HostValue::Long(4).infer().unwrap(), (Shape::scalar(), DType::Long));
    }

    #[test]
    fn unsupported_kinds_fail_inference() {
        let err = HostValue::from(vec![true, false]).infer().unwrap_err();
        assert!(matches!(err, Error::UnsupportedType { ref type_name } if type_name == "bool"));
        let err = HostValue::List(Vec::new()).infer().unwrap_err();
        assert!(matches!(err, Error::UnsupportedType { .. }));
    }

    #[test]
    fn dynamic_encoding_matches_typed_encoding() {
        let typed = vec![vec![1i64, 2], vec![3, 4]];
        let dynamic = HostValue::from(typed.clone());
        let shape = Shape::from([2, 2]);
        let mut out = vec![0u8; 32];
        encode_host_value(&dynamic, &shape, DType::Long, &mut out).unwrap();
        assert_eq!(out, encode(&typed, &shape, DType::Long).unwrap());
        assert_eq!(decode_host_value(&out, &shape, DType::Long).unwrap(), dynamic);
    }

    #[test]
    fn mixed_kinds_fail_with_dtype_mismatch() {
        let value = HostValue::List(vec![HostValue::Float(1.0), HostValue::Double(2.0)]);
        let mut out = vec![0u8; 8];
        let err = encode_host_value(&value, &Shape::from([2]), DType::Float, &mut out).unwrap_err();
        assert!(matches!(err, Error::DTypeMismatch { expected: DType::Float, .. }));
    }

    #[test]
    fn ragged_dynamic_lists_fail() {
        let value = HostValue::List(vec![
            HostValue::from(vec![1i32, 2]),
            HostValue::from(vec![3i32]),
        ]);
        let (shape, dtype) = value.infer().unwrap();
        let mut out = vec![0u8; shape.byte_len(dtype).unwrap()];
        let err = encode_host_value(&value, &shape, dtype, &mut out).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn zero_dims_decode_to_nested_empties() {
        let shape = Shape::from([2, 0]);
        let value = decode_host_value(&[], &shape, DType::Int).unwrap();
        assert_eq!(
            value,
            HostValue::List(vec![HostValue::List(vec![]), HostValue::List(vec![])])
        );
    }
}
