//! Enumerates the element types that may cross the engine boundary.

use serde::{Deserialize, Serialize};

/// Element type of a native tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// Unsigned 8-bit integer (`u8`).
    Byte,
    /// Signed 8-bit integer (`i8`).
    Char,
    /// Signed 32-bit integer (`i32`).
    Int,
    /// Signed 64-bit integer (`i64`).
    Long,
    /// 32-bit IEEE-754 float (`f32`).
    Float,
    /// 64-bit IEEE-754 float (`f64`).
    Double,
}

impl DType {
    pub const ALL: [DType; 6] = [
        DType::Byte,
        DType::Char,
        DType::Int,
        DType::Long,
        DType::Float,
        DType::Double,
    ];

    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Byte | DType::Char => 1,
            DType::Int | DType::Float => 4,
            DType::Long | DType::Double => 8,
        }
    }

    /// Produces the stable tag used when crossing the C boundary.
    ///
    /// Tags 3 and 6 are reserved by the engine ABI for 16-bit types this layer does not
    /// carry; 0 means "unknown".
    pub fn tag(self) -> u32 {
        match self {
            DType::Byte => 1,
            DType::Char => 2,
            DType::Int => 4,
            DType::Long => 5,
            DType::Float => 7,
            DType::Double => 8,
        }
    }

    /// Reconstructs a `DType` from its boundary tag.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(DType::Byte),
            2 => Some(DType::Char),
            4 => Some(DType::Int),
            5 => Some(DType::Long),
            7 => Some(DType::Float),
            8 => Some(DType::Double),
            _ => None,
        }
    }
}
