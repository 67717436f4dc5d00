//! GGUF tensor data types and quantization formats
//!
//! Each quantized format packs a fixed number of elements (`block_size`)
//! into a fixed number of bytes (`type_size`). Native types have a block
//! size of 1 and a type size equal to the element size.
//!
//! Types without a size entry here (the IQ*/TQ*/MXFP4 families beyond
//! `IQ4_NL`) still parse in tensor-info tables; reading them fails with
//! `UnsupportedQuant`.

use crate::dtype::DType;

/// Data type or quantization format of a GGUF tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum TensorType {
    /// 32-bit float
    F32,
    /// 16-bit float
    F16,
    /// 4-bit legacy quantization, symmetric
    Q4_0,
    /// 4-bit legacy quantization with per-block min
    Q4_1,
    /// 5-bit legacy quantization, symmetric
    Q5_0,
    /// 5-bit legacy quantization with per-block min
    Q5_1,
    /// 8-bit legacy quantization
    Q8_0,
    /// 8-bit legacy quantization with block sum
    Q8_1,
    /// 2-bit K-quantization
    Q2_K,
    /// 3-bit K-quantization
    Q3_K,
    /// 4-bit K-quantization
    Q4_K,
    /// 5-bit K-quantization
    Q5_K,
    /// 6-bit K-quantization
    Q6_K,
    /// 8-bit K-quantization
    Q8_K,
    /// 2.06-bit importance-matrix quantization
    IQ2_XXS,
    /// 2.31-bit importance-matrix quantization
    IQ2_XS,
    /// 3.06-bit importance-matrix quantization
    IQ3_XXS,
    /// 1.56-bit importance-matrix quantization
    IQ1_S,
    /// 4-bit non-linear importance-matrix quantization
    IQ4_NL,
    /// 3.44-bit importance-matrix quantization
    IQ3_S,
    /// 2.5-bit importance-matrix quantization
    IQ2_S,
    /// 4.25-bit importance-matrix quantization
    IQ4_XS,
    /// 8-bit signed integer
    I8,
    /// 16-bit signed integer
    I16,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 64-bit float
    F64,
    /// 1.75-bit importance-matrix quantization
    IQ1_M,
    /// Brain float 16
    BF16,
    /// 1.69-bit ternary quantization
    TQ1_0,
    /// 2.06-bit ternary quantization
    TQ2_0,
    /// 4-bit microscaling float
    MXFP4,
    /// Type tag not in the enumerated set; accepted at parse, rejected on read
    Unknown(u32),
}

impl TensorType {
    /// Map a wire type tag to a tensor type
    #[must_use]
    pub fn from_u32(tag: u32) -> Self {
        match tag {
            0 => TensorType::F32,
            1 => TensorType::F16,
            2 => TensorType::Q4_0,
            3 => TensorType::Q4_1,
            6 => TensorType::Q5_0,
            7 => TensorType::Q5_1,
            8 => TensorType::Q8_0,
            9 => TensorType::Q8_1,
            10 => TensorType::Q2_K,
            11 => TensorType::Q3_K,
            12 => TensorType::Q4_K,
            13 => TensorType::Q5_K,
            14 => TensorType::Q6_K,
            15 => TensorType::Q8_K,
            16 => TensorType::IQ2_XXS,
            17 => TensorType::IQ2_XS,
            18 => TensorType::IQ3_XXS,
            19 => TensorType::IQ1_S,
            20 => TensorType::IQ4_NL,
            21 => TensorType::IQ3_S,
            22 => TensorType::IQ2_S,
            23 => TensorType::IQ4_XS,
            24 => TensorType::I8,
            25 => TensorType::I16,
            26 => TensorType::I32,
            27 => TensorType::I64,
            28 => TensorType::F64,
            29 => TensorType::IQ1_M,
            30 => TensorType::BF16,
            34 => TensorType::TQ1_0,
            35 => TensorType::TQ2_0,
            39 => TensorType::MXFP4,
            other => TensorType::Unknown(other),
        }
    }

    /// Human-readable format name
    #[must_use]
    pub fn name(self) -> String {
        match self {
            TensorType::F32 => "F32".to_string(),
            TensorType::F16 => "F16".to_string(),
            TensorType::Q4_0 => "Q4_0".to_string(),
            TensorType::Q4_1 => "Q4_1".to_string(),
            TensorType::Q5_0 => "Q5_0".to_string(),
            TensorType::Q5_1 => "Q5_1".to_string(),
            TensorType::Q8_0 => "Q8_0".to_string(),
            TensorType::Q8_1 => "Q8_1".to_string(),
            TensorType::Q2_K => "Q2_K".to_string(),
            TensorType::Q3_K => "Q3_K".to_string(),
            TensorType::Q4_K => "Q4_K".to_string(),
            TensorType::Q5_K => "Q5_K".to_string(),
            TensorType::Q6_K => "Q6_K".to_string(),
            TensorType::Q8_K => "Q8_K".to_string(),
            TensorType::IQ2_XXS => "IQ2_XXS".to_string(),
            TensorType::IQ2_XS => "IQ2_XS".to_string(),
            TensorType::IQ3_XXS => "IQ3_XXS".to_string(),
            TensorType::IQ1_S => "IQ1_S".to_string(),
            TensorType::IQ4_NL => "IQ4_NL".to_string(),
            TensorType::IQ3_S => "IQ3_S".to_string(),
            TensorType::IQ2_S => "IQ2_S".to_string(),
            TensorType::IQ4_XS => "IQ4_XS".to_string(),
            TensorType::I8 => "I8".to_string(),
            TensorType::I16 => "I16".to_string(),
            TensorType::I32 => "I32".to_string(),
            TensorType::I64 => "I64".to_string(),
            TensorType::F64 => "F64".to_string(),
            TensorType::IQ1_M => "IQ1_M".to_string(),
            TensorType::BF16 => "BF16".to_string(),
            TensorType::TQ1_0 => "TQ1_0".to_string(),
            TensorType::TQ2_0 => "TQ2_0".to_string(),
            TensorType::MXFP4 => "MXFP4".to_string(),
            TensorType::Unknown(tag) => format!("unknown({tag})"),
        }
    }

    /// Number of elements per quantization block (1 for native types)
    #[must_use]
    pub fn block_size(self) -> usize {
        match self {
            TensorType::F32
            | TensorType::F16
            | TensorType::BF16
            | TensorType::F64
            | TensorType::I8
            | TensorType::I16
            | TensorType::I32
            | TensorType::I64 => 1,
            TensorType::Q4_0
            | TensorType::Q4_1
            | TensorType::Q5_0
            | TensorType::Q5_1
            | TensorType::Q8_0
            | TensorType::Q8_1
            | TensorType::IQ4_NL
            | TensorType::MXFP4 => 32,
            TensorType::Q2_K
            | TensorType::Q3_K
            | TensorType::Q4_K
            | TensorType::Q5_K
            | TensorType::Q6_K
            | TensorType::Q8_K
            | TensorType::IQ2_XXS
            | TensorType::IQ2_XS
            | TensorType::IQ3_XXS
            | TensorType::IQ1_S
            | TensorType::IQ3_S
            | TensorType::IQ2_S
            | TensorType::IQ4_XS
            | TensorType::IQ1_M
            | TensorType::TQ1_0
            | TensorType::TQ2_0 => 256,
            TensorType::Unknown(_) => 0,
        }
    }

    /// Number of bytes per block (element size for native types; 0 when the
    /// format's layout is not described here)
    #[must_use]
    pub fn type_size(self) -> usize {
        match self {
            TensorType::I8 => 1,
            TensorType::F16 | TensorType::BF16 | TensorType::I16 => 2,
            TensorType::F32 | TensorType::I32 => 4,
            TensorType::F64 | TensorType::I64 => 8,
            // Legacy quants (block size 32):
            TensorType::Q4_0 | TensorType::IQ4_NL => 2 + 32 / 2,
            TensorType::Q4_1 => 2 + 2 + 32 / 2,
            TensorType::Q5_0 => 2 + 4 + 32 / 2,
            TensorType::Q5_1 => 2 + 2 + 4 + 32 / 2,
            TensorType::Q8_0 => 2 + 32,
            TensorType::Q8_1 => 2 + 2 + 32,
            // K-quants (block size 256):
            TensorType::Q2_K => 256 / 4 + 256 / 16 + 2 + 2,
            TensorType::Q3_K => 256 / 4 + 256 / 8 + 12 + 2,
            TensorType::Q4_K => 2 + 2 + 12 + 256 / 2,
            TensorType::Q5_K => 2 + 2 + 12 + 256 / 2 + 256 / 8,
            TensorType::Q6_K => 256 / 2 + 256 / 4 + 256 / 16 + 2,
            TensorType::Q8_K => 4 + 256 + 256 / 16 * 2,
            _ => 0,
        }
    }

    /// Whether the format requires dequantization before use as floats
    #[must_use]
    pub fn is_quantized(self) -> bool {
        !matches!(
            self,
            TensorType::F32
                | TensorType::F16
                | TensorType::BF16
                | TensorType::F64
                | TensorType::I8
                | TensorType::I16
                | TensorType::I32
                | TensorType::I64
        )
    }

    /// Engine dtype for this format; quantized types dequantize to `F32`
    #[must_use]
    pub fn dtype(self) -> DType {
        match self {
            TensorType::F32 => DType::F32,
            TensorType::F16 => DType::F16,
            TensorType::BF16 => DType::BF16,
            TensorType::F64 => DType::F64,
            TensorType::I8 => DType::I8,
            TensorType::I16 => DType::I16,
            TensorType::I32 => DType::I32,
            TensorType::I64 => DType::I64,
            _ => DType::F32,
        }
    }
}
