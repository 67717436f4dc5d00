//! Safetensors parser
//!
//! Reader for the Safetensors format used by `HuggingFace` for safe,
//! zero-copy tensor storage, including sharded (multi-file) checkpoints.
//!
//! Format specification: <https://github.com/huggingface/safetensors>
//!
//! ## Format Overview
//!
//! ```text
//! Safetensors := HEADER_LEN HEADER TENSOR_DATA
//!
//! HEADER_LEN := u64 (little-endian)
//!
//! HEADER := JSON {
//!   "tensor_name": {
//!     "dtype": "F32" | "F16" | "BF16" | ...,
//!     "shape": [dim1, dim2, ...],
//!     "data_offsets": [start, end]
//!   },
//!   "__metadata__": { "key": "value", ... },
//!   ...
//! }
//! ```
//!
//! `data_offsets` are relative to the start of the tensor-data region, which
//! begins immediately after the header at byte `8 + header_len`.

mod model;
mod reader;

pub use model::{FileInfo, SafetensorsModel, ShardIndex, TensorIter};
pub use reader::MmapReader;

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::dtype::DType;
use crate::error::{CargarError, Result};

/// Maximum accepted header length (sanity bound against corrupt files)
pub const MAX_HEADER_LEN: u64 = 100 * 1024 * 1024;

/// Metadata for a single tensor, immutable after parse
#[derive(Debug, Clone, PartialEq)]
pub struct TensorMetadata {
    /// Tensor name (the header map key)
    pub name: String,
    /// Element type
    pub dtype: DType,
    /// Shape, outermost dimension first
    pub shape: Vec<usize>,
    /// Byte range `[start, end)` within the tensor-data region
    pub data_offsets: [u64; 2],
}

impl TensorMetadata {
    /// Number of bytes this tensor's data occupies
    #[must_use]
    pub fn byte_len(&self) -> usize {
        usize::try_from(self.data_offsets[1].saturating_sub(self.data_offsets[0])).unwrap_or(0)
    }

    /// Number of elements (1 for a 0-dim shape)
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Parsed Safetensors file header
#[derive(Debug, Clone, Default)]
pub struct Header {
    /// Tensor name to metadata
    pub tensors: HashMap<String, TensorMetadata>,
    /// Free-form `__metadata__` mapping, if present
    pub metadata: HashMap<String, String>,
}

/// JSON shape of one tensor entry (internal)
#[derive(Debug, Deserialize)]
struct RawTensorMetadata {
    dtype: String,
    shape: Vec<usize>,
    data_offsets: [u64; 2],
}

impl Header {
    /// Parse the header of a `.safetensors` file
    ///
    /// Returns the header and the absolute byte offset at which the
    /// tensor-data region begins (`8 + header_len`).
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The file cannot be opened or read (`Io`)
    /// - The declared header length exceeds 100 MiB (`HeaderTooLarge`)
    /// - The header is not valid JSON of the expected shape (`MalformedJson`)
    /// - A tensor declares an unknown dtype (`UnknownDType`)
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<(Self, u64)> {
        let path = path.as_ref();
        let mut file = std::fs::File::open(path)
            .map_err(|e| CargarError::io(format!("open {}", path.display()), &e))?;

        let mut len_buf = [0u8; 8];
        file.read_exact(&mut len_buf)
            .map_err(|e| CargarError::io(format!("read header length of {}", path.display()), &e))?;
        let header_len = u64::from_le_bytes(len_buf);

        if header_len > MAX_HEADER_LEN {
            return Err(CargarError::HeaderTooLarge {
                len: header_len,
                max: MAX_HEADER_LEN,
            });
        }

        let mut json_bytes = vec![0u8; usize::try_from(header_len).expect("bounded by 100 MiB")];
        file.read_exact(&mut json_bytes)
            .map_err(|e| CargarError::io(format!("read header of {}", path.display()), &e))?;

        let header = Self::from_json_bytes(&json_bytes)?;
        Ok((header, 8 + header_len))
    }

    /// Parse header JSON bytes (without the length prefix)
    ///
    /// # Errors
    ///
    /// Returns `MalformedJson` or `UnknownDType` as in [`Header::parse`].
    pub fn from_json_bytes(json_bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_slice(json_bytes).map_err(|e| CargarError::MalformedJson {
                context: "safetensors header".to_string(),
                reason: e.to_string(),
            })?;

        let map = value.as_object().ok_or_else(|| CargarError::MalformedJson {
            context: "safetensors header".to_string(),
            reason: "expected JSON object".to_string(),
        })?;

        let mut tensors = HashMap::new();
        let mut metadata = HashMap::new();

        for (name, entry) in map {
            if name == "__metadata__" {
                if let Some(obj) = entry.as_object() {
                    for (k, v) in obj {
                        if let Some(s) = v.as_str() {
                            metadata.insert(k.clone(), s.to_string());
                        }
                    }
                }
                continue;
            }

            let raw: RawTensorMetadata =
                serde_json::from_value(entry.clone()).map_err(|e| CargarError::MalformedJson {
                    context: "safetensors header".to_string(),
                    reason: format!("tensor '{name}': {e}"),
                })?;

            tensors.insert(
                name.clone(),
                TensorMetadata {
                    name: name.clone(),
                    dtype: DType::from_safetensors(&raw.dtype)?,
                    shape: raw.shape,
                    data_offsets: raw.data_offsets,
                },
            );
        }

        Ok(Self { tensors, metadata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_safetensors(json: &str, data: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("test");
        let json_bytes = json.as_bytes();
        file.write_all(&(json_bytes.len() as u64).to_le_bytes())
            .expect("test");
        file.write_all(json_bytes).expect("test");
        file.write_all(data).expect("test");
        file.flush().expect("test");
        file
    }

    #[test]
    fn test_parse_empty_header() {
        let file = write_safetensors("{}", &[]);
        let (header, data_offset) = Header::parse(file.path()).expect("test");
        assert_eq!(header.tensors.len(), 0);
        assert_eq!(data_offset, 8 + 2);
    }

    #[test]
    fn test_parse_single_tensor() {
        let json = r#"{"weight":{"dtype":"F32","shape":[2,3],"data_offsets":[0,24]}}"#;
        let file = write_safetensors(json, &[0u8; 24]);

        let (header, _) = Header::parse(file.path()).expect("test");
        let meta = header.tensors.get("weight").expect("test");
        assert_eq!(meta.dtype, DType::F32);
        assert_eq!(meta.shape, vec![2, 3]);
        assert_eq!(meta.data_offsets, [0, 24]);
        assert_eq!(meta.byte_len(), 24);
    }

    #[test]
    fn test_parse_metadata_key() {
        let json = r#"{"__metadata__":{"format":"pt"},"w":{"dtype":"I8","shape":[4],"data_offsets":[0,4]}}"#;
        let file = write_safetensors(json, &[0u8; 4]);

        let (header, _) = Header::parse(file.path()).expect("test");
        assert_eq!(header.metadata.get("format").map(String::as_str), Some("pt"));
        assert_eq!(header.tensors.len(), 1);
    }

    #[test]
    fn test_header_too_large() {
        let mut file = tempfile::NamedTempFile::new().expect("test");
        file.write_all(&(MAX_HEADER_LEN + 1).to_le_bytes())
            .expect("test");
        file.flush().expect("test");

        let result = Header::parse(file.path());
        assert!(matches!(result, Err(CargarError::HeaderTooLarge { .. })));
    }

    #[test]
    fn test_malformed_json() {
        let file = write_safetensors("not json!!", &[]);
        let result = Header::parse(file.path());
        assert!(matches!(result, Err(CargarError::MalformedJson { .. })));
    }

    #[test]
    fn test_unknown_dtype_rejected() {
        let json = r#"{"w":{"dtype":"F8_E5M2","shape":[1],"data_offsets":[0,1]}}"#;
        let file = write_safetensors(json, &[0u8; 1]);
        let result = Header::parse(file.path());
        assert!(matches!(result, Err(CargarError::UnknownDType { .. })));
    }

    #[test]
    fn test_truncated_header_is_io_error() {
        let mut file = tempfile::NamedTempFile::new().expect("test");
        file.write_all(&100u64.to_le_bytes()).expect("test");
        file.write_all(b"{}").expect("test");
        file.flush().expect("test");

        let result = Header::parse(file.path());
        assert!(matches!(result, Err(CargarError::Io { .. })));
    }

    #[test]
    fn test_scalar_tensor_element_count() {
        let json = r#"{"s":{"dtype":"F32","shape":[],"data_offsets":[0,4]}}"#;
        let file = write_safetensors(json, &[0u8; 4]);
        let (header, _) = Header::parse(file.path()).expect("test");
        assert_eq!(header.tensors.get("s").expect("test").num_elements(), 1);
    }
}
