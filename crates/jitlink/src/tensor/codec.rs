//! Binary tensor codec: nested host values to flat native-endian buffers and back.
//!
//! Values are walked in shape order (outermost dimension first). Every sequence is
//! checked against its shape dimension while writing, so ragged input fails with
//! [`Error::ShapeMismatch`] instead of being truncated or padded.

use once_cell::sync::Lazy;

use crate::env::config;
use crate::error::{Error, Result};

use super::data::TensorData;
use super::{DType, HostValue, Scalar, Shape};

/// Byte order used for every element written to or read from a tensor buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

static NATIVE_ENDIAN: Lazy<ByteOrder> = Lazy::new(detect_native_endian);

fn detect_native_endian() -> ByteOrder {
    let pattern: u16 = 0xABCD;
    if pattern.to_ne_bytes() == [0xCD, 0xAB] {
        ByteOrder::Little
    } else {
        ByteOrder::Big
    }
}

/// Process-wide byte order, detected once on first use.
pub fn native_endian() -> ByteOrder {
    *NATIVE_ENDIAN
}

/// Sequential writer over a destination tensor buffer.
pub struct Encoder<'a> {
    buf: &'a mut [u8],
    pos: usize,
    order: ByteOrder,
    fast_path: bool,
}

impl<'a> Encoder<'a> {
    /// Creates an encoder using the native byte order and the configured fast path.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            order: native_endian(),
            fast_path: config().codec_fast_path,
        }
    }

    /// Enables or disables block copies for innermost numeric runs.
    pub fn with_fast_path(mut self, enabled: bool) -> Self {
        self.fast_path = enabled;
        self
    }

    fn take(&mut self, len: usize) -> Result<&mut [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                Error::marshal(format!(
                    "encode overran tensor buffer of {} bytes at offset {}",
                    self.buf.len(),
                    self.pos
                ))
            })?;
        let start = self.pos;
        self.pos = end;
        Ok(&mut self.buf[start..end])
    }

    pub fn write_scalar<S: Scalar>(&mut self, value: S) -> Result<()> {
        let order = self.order;
        value.write(order, self.take(S::WIDTH)?);
        Ok(())
    }

    /// Writes an innermost run, as one block when the fast path applies.
    pub fn write_run<S: Scalar>(&mut self, run: &[S]) -> Result<()> {
        if self.fast_path {
            if let Some(bytes) = S::run_as_bytes(run) {
                self.take(bytes.len())?.copy_from_slice(bytes);
                return Ok(());
            }
        }
        for &value in run {
            self.write_scalar(value)?;
        }
        Ok(())
    }

    /// Verifies that the whole destination was written.
    pub fn finish(self) -> Result<usize> {
        if self.pos != self.buf.len() {
            return Err(Error::marshal(format!(
                "encoded {} bytes into a tensor buffer of {} bytes",
                self.pos,
                self.buf.len()
            )));
        }
        Ok(self.pos)
    }
}

/// Sequential reader over a source tensor buffer.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    order: ByteOrder,
    fast_path: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            order: native_endian(),
            fast_path: config().codec_fast_path,
        }
    }

    pub fn with_fast_path(mut self, enabled: bool) -> Self {
        self.fast_path = enabled;
        self
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                Error::marshal(format!(
                    "tensor buffer of {} bytes ended at offset {} while decoding",
                    self.buf.len(),
                    self.pos
                ))
            })?;
        let buf = self.buf;
        let start = self.pos;
        self.pos = end;
        Ok(&buf[start..end])
    }

    pub fn read_scalar<S: Scalar>(&mut self) -> Result<S> {
        let order = self.order;
        Ok(S::read(order, self.take(S::WIDTH)?))
    }

    /// Reads an innermost run of `len` values.
    pub fn read_run<S: Scalar>(&mut self, len: usize) -> Result<Vec<S>> {
        let byte_len = len
            .checked_mul(S::WIDTH)
            .ok_or_else(|| Error::marshal("decoded run length overflows"))?;
        if self.fast_path {
            let bytes = self.take(byte_len)?;
            if let Some(run) = S::run_from_bytes(bytes) {
                return Ok(run);
            }
            self.pos -= byte_len;
        }
        (0..len).map(|_| self.read_scalar()).collect()
    }

    pub fn finish(self) -> Result<()> {
        if self.pos != self.buf.len() {
            return Err(Error::marshal(format!(
                "decoded {} of {} tensor buffer bytes",
                self.pos,
                self.buf.len()
            )));
        }
        Ok(())
    }
}

fn check_rank(shape: &Shape, rank: usize) -> Result<()> {
    if shape.rank() != rank {
        return Err(Error::RankMismatch {
            expected: shape.rank(),
            actual: rank,
        });
    }
    Ok(())
}

/// Most empty lists a decode may build for a shape holding no elements.
const MAX_EMPTY_LISTS: usize = 1 << 20;

/// Rejects zero-element shapes whose outer dimensions would build implausibly many
/// empty lists from an empty buffer.
fn check_empty_nesting(shape: &Shape) -> Result<()> {
    let dims = shape.dims();
    let Some(first_zero) = dims.iter().position(|&dim| dim == 0) else {
        return Ok(());
    };
    let lists = dims[..first_zero]
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim));
    match lists {
        Some(count) if count <= MAX_EMPTY_LISTS => Ok(()),
        _ => Err(Error::marshal(format!(
            "shape {dims:?} holds no elements but nests too many empty lists to decode"
        ))),
    }
}

fn check_scalar<S: Scalar>(dtype: DType) -> Result<()> {
    if !S::accepts(dtype) {
        return Err(Error::DTypeMismatch {
            expected: dtype,
            actual: S::NAME.to_string(),
        });
    }
    Ok(())
}

fn check_len(out: &[u8], shape: &Shape, dtype: DType) -> Result<()> {
    let expected = shape.byte_len(dtype)?;
    if out.len() != expected {
        return Err(Error::marshal(format!(
            "tensor buffer holds {} bytes but shape {:?} of {:?} needs {}",
            out.len(),
            shape.dims(),
            dtype,
            expected
        )));
    }
    Ok(())
}

/// Encodes `value` as `shape`/`dtype` into `out`, which must be exactly the tensor's size.
pub fn encode_into<T: TensorData>(
    value: &T,
    shape: &Shape,
    dtype: DType,
    mut encoder: Encoder<'_>,
) -> Result<()> {
    check_scalar::<T::Scalar>(dtype)?;
    check_rank(shape, T::RANK)?;
    value.encode(shape.dims(), &mut encoder)?;
    encoder.finish().map(|_| ())
}

/// Encodes `value` into a freshly allocated byte vector.
pub fn encode<T: TensorData>(value: &T, shape: &Shape, dtype: DType) -> Result<Vec<u8>> {
    let mut out = vec![0u8; shape.byte_len(dtype)?];
    encode_into(value, shape, dtype, Encoder::new(&mut out))?;
    Ok(out)
}

/// Decodes a buffer written for `shape`/`dtype` back into a nested value.
pub fn decode<T: TensorData>(bytes: &[u8], shape: &Shape, dtype: DType) -> Result<T> {
    decode_from(shape, dtype, Decoder::new(bytes))
}

pub fn decode_from<T: TensorData>(
    shape: &Shape,
    dtype: DType,
    mut decoder: Decoder<'_>,
) -> Result<T> {
    check_scalar::<T::Scalar>(dtype)?;
    check_rank(shape, T::RANK)?;
    check_empty_nesting(shape)?;
    let value = T::decode(shape.dims(), &mut decoder)?;
    decoder.finish()?;
    Ok(value)
}

/// Encodes a dynamic host value; every leaf must match `dtype`.
pub fn encode_host_value(
    value: &HostValue,
    shape: &Shape,
    dtype: DType,
    out: &mut [u8],
) -> Result<()> {
    check_len(out, shape, dtype)?;
    let mut encoder = Encoder::new(out);
    value.encode(shape.dims(), dtype, &mut encoder)?;
    encoder.finish().map(|_| ())
}

/// Decodes a buffer into a dynamic host value nested `shape.rank()` levels deep.
pub fn decode_host_value(bytes: &[u8], shape: &Shape, dtype: DType) -> Result<HostValue> {
    check_len(bytes, shape, dtype)?;
    check_empty_nesting(shape)?;
    let mut decoder = Decoder::new(bytes);
    let value = HostValue::decode(shape.dims(), dtype, &mut decoder)?;
    decoder.finish()?;
    Ok(value)
}
