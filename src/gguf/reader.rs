//! Memory-mapped GGUF tensor reader with on-the-fly dequantization

use std::path::Path;

use memmap2::Mmap;

use super::dequant::dequant_func;
use super::{GgufFile, TensorInfo};
use crate::error::{CargarError, Result};
use crate::tensor::Tensor;

/// Memory-mapped reader for the tensor data of one GGUF file
///
/// The reader exclusively owns its mapping, released on drop. Returned
/// tensors own copies of their data: native types are copied straight from
/// the map, quantized types are expanded to f32 in the tensor's own storage.
pub struct TensorReader<'a> {
    mmap: Mmap,
    file: &'a GgufFile,
}

impl<'a> TensorReader<'a> {
    /// Map a GGUF file for tensor reading
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be opened or mapped.
    pub fn open<P: AsRef<Path>>(path: P, file: &'a GgufFile) -> Result<Self> {
        let path = path.as_ref();
        let f = std::fs::File::open(path)
            .map_err(|e| CargarError::io(format!("open {}", path.display()), &e))?;
        // SAFETY: read-only mapping; see MmapReader for the caveats.
        let mmap = unsafe {
            Mmap::map(&f).map_err(|e| CargarError::io(format!("mmap {}", path.display()), &e))?
        };
        Ok(Self { mmap, file })
    }

    /// Copy bytes from an absolute file offset
    fn read_at(&self, buf: &mut [u8], abs_offset: u64) -> Result<()> {
        let start = usize::try_from(abs_offset).map_err(|_| CargarError::Io {
            context: "read_at".to_string(),
            source_msg: format!("offset {abs_offset} exceeds addressable range"),
        })?;
        let end = start.checked_add(buf.len()).ok_or_else(|| CargarError::Io {
            context: "read_at".to_string(),
            source_msg: "offset overflow".to_string(),
        })?;
        if end > self.mmap.len() {
            return Err(CargarError::Io {
                context: "read_at".to_string(),
                source_msg: format!(
                    "range [{start}, {end}) exceeds file size {}",
                    self.mmap.len()
                ),
            });
        }
        buf.copy_from_slice(&self.mmap[start..end]);
        Ok(())
    }

    /// Read a tensor by name, dequantizing quantized formats to f32
    ///
    /// Native types (F32, F16, BF16, integer widths) are copied directly
    /// into the tensor's storage; the shape is reversed to the engine's
    /// outermost-first convention.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The name is not in the tensor directory (`TensorNotFound`)
    /// - The format has no dequantizer (`UnsupportedQuant`)
    /// - The element count is not a whole number of blocks (`SizeMismatch`)
    /// - The data range lies outside the file (`Io`)
    pub fn read_tensor(&self, name: &str) -> Result<Tensor> {
        let info = self
            .file
            .get_tensor_info(name)
            .ok_or_else(|| CargarError::TensorNotFound(name.to_string()))?;

        let tensor_offset = self.file.data_offset() + info.offset;

        if !info.tensor_type.is_quantized() {
            let mut tensor = Tensor::new(info.tensor_type.dtype(), info.engine_shape());
            self.read_at(tensor.mutable_bytes(), tensor_offset)?;
            return Ok(tensor);
        }

        let dequant = dequant_func(info.tensor_type).ok_or_else(|| CargarError::UnsupportedQuant {
            tensor: name.to_string(),
            type_name: info.tensor_type.name(),
        })?;

        let block_size = info.tensor_type.block_size();
        let type_size = info.tensor_type.type_size();
        let n_elements = usize::try_from(info.num_elements()).map_err(|_| CargarError::Io {
            context: format!("read tensor {name}"),
            source_msg: "element count exceeds addressable range".to_string(),
        })?;
        if n_elements % block_size != 0 {
            return Err(CargarError::SizeMismatch {
                tensor: name.to_string(),
                expected: n_elements.next_multiple_of(block_size),
                actual: n_elements,
            });
        }
        let n_blocks = n_elements / block_size;

        let mut raw = vec![0u8; n_blocks * type_size];
        self.read_at(&mut raw, tensor_offset)?;

        let mut values = vec![0.0f32; n_elements];
        for b in 0..n_blocks {
            let src = &raw[b * type_size..(b + 1) * type_size];
            dequant(src, &mut values[b * block_size..(b + 1) * block_size]);
        }
        Ok(Tensor::from_f32(info.engine_shape(), &values))
    }

    /// Read the raw on-disk bytes of a tensor without dequantization
    ///
    /// # Errors
    ///
    /// Returns `TensorNotFound` or the underlying read error.
    pub fn read_tensor_raw(&self, name: &str) -> Result<(Vec<u8>, &TensorInfo)> {
        let info = self
            .file
            .get_tensor_info(name)
            .ok_or_else(|| CargarError::TensorNotFound(name.to_string()))?;

        let len = usize::try_from(info.num_bytes()).map_err(|_| CargarError::Io {
            context: format!("read raw tensor {name}"),
            source_msg: "tensor size exceeds addressable range".to_string(),
        })?;
        let mut buf = vec![0u8; len];
        self.read_at(&mut buf, self.file.data_offset() + info.offset)?;
        Ok((buf, info))
    }
}
