//! Error types for Cargar
//!
//! This module defines all error types used throughout the library.
//!
//! Parse-time errors (bad magic, malformed JSON, unsupported version) are
//! fatal for the file being parsed. Per-tensor read errors do not invalidate
//! the reader: another tensor from the same file may still be readable.

use thiserror::Error;

/// Result type alias for Cargar operations
pub type Result<T> = std::result::Result<T, CargarError>;

/// Error type for all Cargar operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CargarError {
    /// Underlying file, mmap, or read failure
    #[error("I/O error: {context}: {source_msg}")]
    Io {
        /// What was being attempted
        context: String,
        /// Stringified OS error
        source_msg: String,
    },

    /// Non-JSON structural failure in a binary header
    #[error("Malformed header: {reason}")]
    MalformedHeader {
        /// Reason for rejection
        reason: String,
    },

    /// JSON header or descriptor failed to parse
    #[error("Malformed JSON in {context}: {reason}")]
    MalformedJson {
        /// Which JSON document failed
        context: String,
        /// Parser error message
        reason: String,
    },

    /// Safetensors header length exceeds the sanity bound
    #[error("Header length {len} exceeds maximum of {max} bytes")]
    HeaderTooLarge {
        /// Declared header length
        len: u64,
        /// Maximum accepted length
        max: u64,
    },

    /// GGUF version below the minimum supported
    #[error("Unsupported GGUF version {version} (minimum {minimum})")]
    UnsupportedVersion {
        /// Version found in the file
        version: u32,
        /// Minimum accepted version
        minimum: u32,
    },

    /// Safetensors dtype string not in the enumerated set
    #[error("Unknown dtype '{dtype}'")]
    UnknownDType {
        /// The unrecognized dtype string
        dtype: String,
    },

    /// GGUF metadata value type tag not in the enumerated set
    #[error("Unknown GGUF value type {type_tag} for key '{key}'")]
    UnknownValueType {
        /// Key whose value could not be read
        key: String,
        /// The unrecognized wire type tag
        type_tag: u32,
    },

    /// Quantization format with no dequantizer; returned on read, not parse
    #[error("Unsupported quantization type {type_name} for tensor '{tensor}'")]
    UnsupportedQuant {
        /// Tensor being read
        tensor: String,
        /// Name of the quantization format
        type_name: String,
    },

    /// Tensor name not present in the header or weight map
    #[error("Tensor '{0}' not found")]
    TensorNotFound(String),

    /// Weight map points at a shard whose header lacks the tensor
    #[error("Inconsistent index: tensor '{tensor}' not in shard '{shard}'")]
    InconsistentIndex {
        /// Tensor named by the index
        tensor: String,
        /// Shard file the index pointed at
        shard: String,
    },

    /// Tensor dtype x shape does not match its data_offsets span
    #[error("Size mismatch for tensor '{tensor}': expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Tensor being read
        tensor: String,
        /// Bytes implied by dtype and shape
        expected: usize,
        /// Bytes covered by data_offsets
        actual: usize,
    },

    /// Requested special-token slot was never populated
    #[error("Special token {0} not configured")]
    NotConfigured(String),
}

impl CargarError {
    /// Wrap an I/O error with a short context string.
    pub(crate) fn io(context: impl Into<String>, err: &std::io::Error) -> Self {
        CargarError::Io {
            context: context.into(),
            source_msg: err.to_string(),
        }
    }
}
