//! Tensor element types and their mapping to engine type codes.

use std::borrow::Cow;

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;
use crate::value::TensorData;

/// Semantic element type of a tensor.
///
/// Discriminants are the engine's `ONNXTensorElementDataType` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    /// Element type of non-tensor nodes.
    Undefined = 0,
    Float32 = 1,
    Uint8 = 2,
    Int8 = 3,
    Uint16 = 4,
    Int16 = 5,
    Int32 = 6,
    Int64 = 7,
    String = 8,
    Bool = 9,
    Float16 = 10,
    Float64 = 11,
    Uint32 = 12,
    Uint64 = 13,
    BFloat16 = 16,
}

impl ElementType {
    /// Maps an engine type code. Complex and 8-bit float types are rejected.
    pub fn from_code(code: i32) -> Result<Self, InferenceError> {
        Ok(match code {
            0 => Self::Undefined,
            1 => Self::Float32,
            2 => Self::Uint8,
            3 => Self::Int8,
            4 => Self::Uint16,
            5 => Self::Int16,
            6 => Self::Int32,
            7 => Self::Int64,
            8 => Self::String,
            9 => Self::Bool,
            10 => Self::Float16,
            11 => Self::Float64,
            12 => Self::Uint32,
            13 => Self::Uint64,
            16 => Self::BFloat16,
            other => return Err(InferenceError::UnsupportedElementType(other)),
        })
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Width of one element in bytes. Zero for strings and undefined.
    pub fn width(self) -> usize {
        match self {
            Self::Undefined | Self::String => 0,
            Self::Uint8 | Self::Int8 | Self::Bool => 1,
            Self::Uint16 | Self::Int16 | Self::Float16 | Self::BFloat16 => 2,
            Self::Float32 | Self::Int32 | Self::Uint32 => 4,
            Self::Int64 | Self::Float64 | Self::Uint64 => 8,
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Rust types that can be exchanged with the engine without conversion.
pub trait Element: sealed::Sealed + Copy + Send + Sync + 'static {
    const TYPE: ElementType;

    #[doc(hidden)]
    fn into_data(data: Cow<'_, [Self]>) -> TensorData<'_>;

    #[doc(hidden)]
    fn from_data<'d>(data: &'d TensorData<'_>) -> Option<&'d [Self]>;
}

macro_rules! impl_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Element for $ty {
                const TYPE: ElementType = ElementType::$variant;

                fn into_data(data: Cow<'_, [Self]>) -> TensorData<'_> {
                    TensorData::$variant(data)
                }

                fn from_data<'d>(data: &'d TensorData<'_>) -> Option<&'d [Self]> {
                    match data {
                        TensorData::$variant(d) => Some(&**d),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_element! {
    f32 => Float32,
    f64 => Float64,
    i8 => Int8,
    u8 => Uint8,
    i16 => Int16,
    u16 => Uint16,
    i32 => Int32,
    u32 => Uint32,
    i64 => Int64,
    u64 => Uint64,
    bool => Bool,
    f16 => Float16,
    bf16 => BFloat16,
}
