//! # Cargar
//!
//! Cargar (Spanish: "to load") makes pretrained transformer artifacts
//! published on a model hub usable by a native numeric runtime. It reads
//! three on-disk formats and produces two kinds of runtime objects:
//!
//! - **Safetensors** (`.safetensors`, single-file or sharded) and **GGUF**
//!   (`.gguf`, with on-the-fly dequantization of legacy and K-quant block
//!   formats) become dense [`Tensor`]s with a native dtype and shape.
//! - **Tokenizer descriptors** (`tokenizer.json`) and SentencePiece
//!   segmenters become tokenizers that map text to id sequences and back,
//!   with byte-span provenance into the original input.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cargar::{hub::LocalRepo, safetensors::SafetensorsModel};
//!
//! let repo = LocalRepo::new("/models/bert-base-uncased");
//! let model = SafetensorsModel::load(repo)?;
//! for named in model.iter_tensors() {
//!     let named = named?;
//!     println!("{}: {:?}", named.name, named.tensor.shape());
//! }
//! ```
//!
//! ## Design
//!
//! - Multi-gigabyte shards are memory-mapped and read tensor-by-tensor in
//!   file-offset order; the archive is never materialized whole.
//! - Loaded models and tokenizers are immutable after construction and safe
//!   to share across threads for reads.
//! - The hub client (downloads, caching, auth) lives behind the
//!   [`hub::ModelStore`] trait; the numeric runtime's contract is the
//!   [`Tensor`] value type's mutable-bytes view.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod dtype;
pub mod error;
pub mod gguf;
pub mod hub;
pub mod safetensors;
pub mod tensor;
pub mod tokenizer;

// Re-exports for convenience
pub use dtype::DType;
pub use error::{CargarError, Result};
pub use tensor::{NamedTensor, Tensor};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.contains('.'));
    }
}
