use core::fmt::Display;

use serde::{Deserialize, Serialize};

/// Element type of a tensor or an index variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ElemType {
    /// 32-bit IEEE float.
    F32,
    /// Brain float, 8 bits of exponent and 7 bits of mantissa.
    BF16,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 8-bit integer.
    S8,
    /// Signed 32-bit integer.
    S32,
    /// Integer used for loop variables and offsets.
    Index,
}

impl ElemType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            ElemType::F32 | ElemType::S32 => 4,
            ElemType::BF16 => 2,
            ElemType::U8 | ElemType::S8 => 1,
            ElemType::Index => 8,
        }
    }

    /// Whether the type is one of the quantized 8-bit integer types.
    pub fn is_int8(&self) -> bool {
        matches!(self, ElemType::U8 | ElemType::S8)
    }

    /// Whether the type is a floating point type.
    pub fn is_float(&self) -> bool {
        matches!(self, ElemType::F32 | ElemType::BF16)
    }

    /// The type products of this type are accumulated in.
    pub fn accumulator(&self) -> ElemType {
        match self {
            ElemType::U8 | ElemType::S8 | ElemType::S32 => ElemType::S32,
            _ => ElemType::F32,
        }
    }
}

impl Display for ElemType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ElemType::F32 => f.write_str("f32"),
            ElemType::BF16 => f.write_str("bf16"),
            ElemType::U8 => f.write_str("u8"),
            ElemType::S8 => f.write_str("s8"),
            ElemType::S32 => f.write_str("s32"),
            ElemType::Index => f.write_str("index"),
        }
    }
}
