//! Runtime tensor value type
//!
//! Models the minimal contract Cargar requires from a numeric runtime:
//! `Tensor::new(dtype, dims)` allocates zeroed storage, and `mutable_bytes`
//! exposes the storage for zero-copy fill by readers. Tensors returned to
//! callers own copies of their bytes; the mmap they were read from is safe
//! to drop afterwards.
//!
//! Shapes are outermost-first. The element count of a 0-dim shape is 1.
//! Storage is always little-endian, matching both on-disk formats.

use crate::dtype::DType;
use crate::error::{CargarError, Result};

/// A dense tensor with a native dtype, shape, and owned byte storage
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl Tensor {
    /// Allocate a zeroed tensor for the given dtype and shape
    ///
    /// # Examples
    ///
    /// ```
    /// use cargar::{DType, Tensor};
    ///
    /// let t = Tensor::new(DType::F32, vec![2, 3]);
    /// assert_eq!(t.byte_len(), 24);
    /// assert_eq!(t.num_elements(), 6);
    /// ```
    #[must_use]
    pub fn new(dtype: DType, shape: Vec<usize>) -> Self {
        let len = shape.iter().product::<usize>() * dtype.element_size();
        Self {
            dtype,
            shape,
            data: vec![0u8; len],
        }
    }

    /// Build an f32 tensor from already-computed values
    ///
    /// Used by the GGUF dequantizer, whose output type is always f32.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `values.len()` does not match the shape's
    /// element count.
    #[must_use]
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Self {
        debug_assert_eq!(values.len(), shape.iter().product::<usize>());
        let mut data = Vec::with_capacity(values.len() * 4);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        Self {
            dtype: DType::F32,
            shape,
            data,
        }
    }

    /// Element type
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Shape, outermost dimension first
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Total number of elements (1 for a 0-dim shape)
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Storage size in bytes
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Read-only view of the raw storage (little-endian elements)
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable view of the raw storage, for zero-copy fill by readers
    pub fn mutable_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Decode the storage as f32 values
    ///
    /// # Errors
    ///
    /// Returns `SizeMismatch` if the dtype is not `F32`.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        if self.dtype != DType::F32 {
            return Err(CargarError::SizeMismatch {
                tensor: String::new(),
                expected: self.num_elements() * 4,
                actual: self.data.len(),
            });
        }
        Ok(self
            .data
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}

/// A tensor together with the name it was stored under
#[derive(Debug, Clone)]
pub struct NamedTensor {
    /// Tensor name as it appears in the source file
    pub name: String,
    /// The loaded tensor
    pub tensor: Tensor,
}
