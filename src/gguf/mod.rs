//! GGUF (GPT-Generated Unified Format) parser
//!
//! Reader for the GGUF binary format used by llama.cpp, Ollama, and
//! compatible tools, with on-the-fly dequantization of quantized weights.
//!
//! Format specification: <https://github.com/ggerganov/ggml/blob/master/docs/gguf.md>
//!
//! ## Format Overview
//!
//! ```text
//! GGUF := {
//!   magic: "GGUF" (4 bytes)
//!   version: u32 LE (>= 2)
//!   tensor_count: u64 LE
//!   kv_count: u64 LE
//!   kv_pairs: kv_count x (string key, u32 type tag, value)
//!   tensor_infos: tensor_count x (string name, u32 n_dims,
//!                                 u64 dims[n_dims], u32 type, u64 offset)
//!   padding to alignment (default 32)
//!   tensor_data
//! }
//! ```
//!
//! Strings are a u64 length followed by that many bytes. Tensor offsets are
//! relative to the start of the aligned data region. Dimensions are stored
//! innermost-first; the engine reverses them at the boundary.

mod dequant;
mod metadata;
mod model;
mod reader;
mod tensor_type;

pub use dequant::{dequant_func, f16_to_f32, DequantFn};
pub use metadata::{KeyValue, Value};
pub use model::{GgufModel, GgufTensorIter};
pub use reader::TensorReader;
pub use tensor_type::TensorType;

use std::collections::HashMap;
use std::path::Path;

use crate::error::{CargarError, Result};

/// GGUF magic bytes
pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";

/// Minimum supported format version
pub const MIN_SUPPORTED_VERSION: u32 = 2;

/// Default tensor-data alignment, overridable via `general.alignment`
pub const DEFAULT_ALIGNMENT: u64 = 32;

/// Sanity bound for a single string on the wire
const MAX_STRING_LEN: u64 = 1 << 20;

/// Information about a single tensor in a GGUF file
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    /// Tensor name
    pub name: String,
    /// Dimensions in GGUF native order (innermost first)
    pub shape: Vec<u64>,
    /// Data type or quantization format
    pub tensor_type: TensorType,
    /// Byte offset within the tensor-data region
    pub offset: u64,
}

impl TensorInfo {
    /// Total number of elements (1 for a 0-dim shape)
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Bytes this tensor occupies in the file (0 for unknown formats)
    #[must_use]
    pub fn num_bytes(&self) -> u64 {
        let block = self.tensor_type.block_size() as u64;
        let bytes = self.tensor_type.type_size() as u64;
        if block == 0 || bytes == 0 {
            return 0;
        }
        self.num_elements() / block * bytes
    }

    /// Shape in the engine convention (outermost first)
    #[must_use]
    pub fn engine_shape(&self) -> Vec<usize> {
        let mut dims: Vec<usize> = self
            .shape
            .iter()
            .map(|&d| usize::try_from(d).unwrap_or(usize::MAX))
            .collect();
        dims.reverse();
        dims
    }
}

/// A parsed GGUF file: metadata and tensor directory, without tensor data
#[derive(Debug, Clone)]
pub struct GgufFile {
    /// Format version (2 or 3 in the wild)
    pub version: u32,
    /// Tensor-data alignment in bytes
    pub alignment: u64,
    /// Metadata key-value pairs in file order
    pub key_values: Vec<KeyValue>,
    /// Tensor directory in file order
    pub tensor_infos: Vec<TensorInfo>,
    /// Absolute byte offset of the aligned tensor-data region
    data_offset: u64,

    kv_by_key: HashMap<String, usize>,
    tensor_by_name: HashMap<String, usize>,
}

/// Little-endian pull parser over a byte slice
struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| CargarError::MalformedHeader {
            reason: "offset overflow".to_string(),
        })?;
        if end > self.data.len() {
            return Err(CargarError::MalformedHeader {
                reason: format!(
                    "unexpected end of file at byte {} (wanted {n} more)",
                    self.pos
                ),
            });
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u64()?;
        if len > MAX_STRING_LEN {
            return Err(CargarError::MalformedHeader {
                reason: format!("string length {len} exceeds 1 MiB limit"),
            });
        }
        let bytes = self.take(usize::try_from(len).expect("bounded by 1 MiB"))?;
        String::from_utf8(bytes.to_vec()).map_err(|e| CargarError::MalformedHeader {
            reason: format!("invalid UTF-8 in string: {e}"),
        })
    }
}

/// Read a value with the given wire type tag; arrays recurse
#[allow(clippy::cast_possible_wrap)]
fn read_value(r: &mut ByteReader<'_>, key: &str, type_tag: u32) -> Result<Value> {
    match type_tag {
        0 => Ok(Value::U8(r.u8()?)),
        1 => Ok(Value::I8(r.u8()? as i8)),
        2 => Ok(Value::U16(r.u16()?)),
        3 => Ok(Value::I16(r.u16()? as i16)),
        4 => Ok(Value::U32(r.u32()?)),
        5 => Ok(Value::I32(r.u32()? as i32)),
        6 => Ok(Value::F32(f32::from_le_bytes(r.u32()?.to_le_bytes()))),
        7 => Ok(Value::Bool(r.u8()? != 0)),
        8 => Ok(Value::String(r.string()?)),
        9 => {
            let elem_type = r.u32()?;
            let count = r.u64()?;
            let mut elements = Vec::new();
            for _ in 0..count {
                elements.push(read_value(r, key, elem_type)?);
            }
            Ok(Value::Array(elements))
        },
        10 => Ok(Value::U64(r.u64()?)),
        11 => Ok(Value::I64(r.u64()? as i64)),
        12 => Ok(Value::F64(f64::from_le_bytes(r.u64()?.to_le_bytes()))),
        other => Err(CargarError::UnknownValueType {
            key: key.to_string(),
            type_tag: other,
        }),
    }
}

/// Round `pos` up to the next multiple of `alignment`
fn align_up(pos: u64, alignment: u64) -> u64 {
    pos + (alignment - pos % alignment) % alignment
}

impl GgufFile {
    /// Parse a GGUF file's metadata and tensor directory from disk
    ///
    /// The file is mapped only for the duration of the parse; tensor data is
    /// not read.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The file cannot be opened or mapped (`Io`)
    /// - The magic is wrong or the stream is truncated (`MalformedHeader`)
    /// - The version is below 2 (`UnsupportedVersion`)
    /// - A metadata value carries an unknown type tag (`UnknownValueType`)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| CargarError::io(format!("open {}", path.display()), &e))?;
        // SAFETY: read-only mapping, released when this function returns.
        let mmap = unsafe {
            memmap2::Mmap::map(&file)
                .map_err(|e| CargarError::io(format!("mmap {}", path.display()), &e))?
        };
        Self::from_bytes(&mmap)
    }

    /// Parse a GGUF image from bytes
    ///
    /// # Errors
    ///
    /// As [`GgufFile::open`], minus the I/O failures.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);

        let magic = r.take(4)?;
        if magic != GGUF_MAGIC {
            return Err(CargarError::MalformedHeader {
                reason: format!("invalid magic {magic:02X?}, expected \"GGUF\""),
            });
        }

        let version = r.u32()?;
        if version < MIN_SUPPORTED_VERSION {
            return Err(CargarError::UnsupportedVersion {
                version,
                minimum: MIN_SUPPORTED_VERSION,
            });
        }

        let tensor_count = r.u64()?;
        let kv_count = r.u64()?;

        let mut key_values = Vec::with_capacity(usize::try_from(kv_count).unwrap_or(0));
        for _ in 0..kv_count {
            let key = r.string()?;
            let type_tag = r.u32()?;
            let value = read_value(&mut r, &key, type_tag)?;
            key_values.push(KeyValue { key, value });
        }

        let mut tensor_infos = Vec::with_capacity(usize::try_from(tensor_count).unwrap_or(0));
        for _ in 0..tensor_count {
            let name = r.string()?;
            let n_dims = r.u32()?;
            let mut shape = Vec::with_capacity(n_dims as usize);
            for _ in 0..n_dims {
                shape.push(r.u64()?);
            }
            let tensor_type = TensorType::from_u32(r.u32()?);
            let offset = r.u64()?;
            tensor_infos.push(TensorInfo {
                name,
                shape,
                tensor_type,
                offset,
            });
        }

        let mut alignment = DEFAULT_ALIGNMENT;
        if let Some(kv) = key_values.iter().find(|kv| kv.key == "general.alignment") {
            let a = kv.value.as_uint();
            if a > 0 {
                alignment = a;
            }
        }
        let data_offset = align_up(r.pos as u64, alignment);

        let kv_by_key = key_values
            .iter()
            .enumerate()
            .map(|(i, kv)| (kv.key.clone(), i))
            .collect();
        let tensor_by_name = tensor_infos
            .iter()
            .enumerate()
            .map(|(i, ti)| (ti.name.clone(), i))
            .collect();

        Ok(Self {
            version,
            alignment,
            key_values,
            tensor_infos,
            data_offset,
            kv_by_key,
            tensor_by_name,
        })
    }

    /// Absolute byte offset where tensor data begins
    #[must_use]
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Look up a metadata key-value pair
    #[must_use]
    pub fn get_key_value(&self, key: &str) -> Option<&KeyValue> {
        self.kv_by_key.get(key).map(|&i| &self.key_values[i])
    }

    /// Look up a tensor by name
    #[must_use]
    pub fn get_tensor_info(&self, name: &str) -> Option<&TensorInfo> {
        self.tensor_by_name.get(name).map(|&i| &self.tensor_infos[i])
    }

    /// Model architecture string (`general.architecture`), or `""`
    #[must_use]
    pub fn architecture(&self) -> &str {
        self.get_key_value("general.architecture")
            .map_or("", |kv| kv.value.as_str())
    }

    /// Names of all tensors in file order
    #[must_use]
    pub fn tensor_names(&self) -> Vec<&str> {
        self.tensor_infos.iter().map(|ti| ti.name.as_str()).collect()
    }
}
