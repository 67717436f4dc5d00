//! Memory-mapped Safetensors tensor reader

use std::path::Path;

use memmap2::Mmap;

use super::Header;
use crate::error::{CargarError, Result};
use crate::tensor::Tensor;

/// Memory-mapped reader for one `.safetensors` file
///
/// The reader exclusively owns the underlying mapping; it is released when
/// the reader is dropped. Tensors returned by [`MmapReader::read_tensor`]
/// own copies of their bytes, so the reader may be dropped immediately
/// afterwards.
#[derive(Debug)]
pub struct MmapReader {
    mmap: Mmap,
    header: Header,
    data_offset: u64,
}

impl MmapReader {
    /// Open a `.safetensors` file: parse its header and map it into memory
    ///
    /// # Errors
    ///
    /// Returns error if the header cannot be parsed or the mapping fails.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let (header, data_offset) = Header::parse(path)?;

        let file = std::fs::File::open(path)
            .map_err(|e| CargarError::io(format!("open {}", path.display()), &e))?;
        // SAFETY: the mapping is only read, never written. Concurrent
        // truncation of the file by another process would be undefined
        // behavior, as with every mmap-based reader.
        let mmap = unsafe {
            Mmap::map(&file).map_err(|e| CargarError::io(format!("mmap {}", path.display()), &e))?
        };

        Ok(Self {
            mmap,
            header,
            data_offset,
        })
    }

    /// Parsed header of the mapped file
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Absolute byte offset of the tensor-data region
    #[must_use]
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Copy `buf.len()` bytes starting at an absolute file offset
    ///
    /// # Errors
    ///
    /// Returns `Io` if the range `[abs_offset, abs_offset + buf.len())`
    /// falls outside the mapped file.
    pub fn read_at(&self, buf: &mut [u8], abs_offset: u64) -> Result<()> {
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

    /// Read one tensor by name into freshly allocated storage
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The name is not in the header (`TensorNotFound`)
    /// - dtype x shape does not match the data_offsets span (`SizeMismatch`)
    /// - The data range is outside the file (`Io`)
    pub fn read_tensor(&self, name: &str) -> Result<Tensor> {
        let meta = self
            .header
            .tensors
            .get(name)
            .ok_or_else(|| CargarError::TensorNotFound(name.to_string()))?;

        let mut tensor = Tensor::new(meta.dtype, meta.shape.clone());
        let expected = meta.byte_len();
        if tensor.byte_len() != expected {
            return Err(CargarError::SizeMismatch {
                tensor: name.to_string(),
                expected: tensor.byte_len(),
                actual: expected,
            });
        }

        let abs = self.data_offset + meta.data_offsets[0];
        self.read_at(tensor.mutable_bytes(), abs)?;
        Ok(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;
    use std::io::Write;

    fn fixture(json: &str, data: &[u8]) -> tempfile::NamedTempFile {
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
    fn test_read_tensor_bytes_verbatim() {
        let json = r#"{"w":{"dtype":"F32","shape":[2],"data_offsets":[0,8]}}"#;
        let mut data = Vec::new();
        data.extend_from_slice(&1.0f32.to_le_bytes());
        data.extend_from_slice(&2.0f32.to_le_bytes());
        let file = fixture(json, &data);

        let reader = MmapReader::open(file.path()).expect("test");
        let tensor = reader.read_tensor("w").expect("test");
        assert_eq!(tensor.dtype(), DType::F32);
        assert_eq!(tensor.shape(), &[2]);
        assert_eq!(tensor.to_f32_vec().expect("test"), vec![1.0, 2.0]);
    }

    #[test]
    fn test_read_second_tensor_at_offset() {
        let json = r#"{
            "a":{"dtype":"U8","shape":[4],"data_offsets":[0,4]},
            "b":{"dtype":"U8","shape":[4],"data_offsets":[4,8]}
        }"#;
        let file = fixture(json, &[1, 2, 3, 4, 5, 6, 7, 8]);

        let reader = MmapReader::open(file.path()).expect("test");
        let b = reader.read_tensor("b").expect("test");
        assert_eq!(b.bytes(), &[5, 6, 7, 8]);
    }

    #[test]
    fn test_tensor_not_found() {
        let file = fixture("{}", &[]);
        let reader = MmapReader::open(file.path()).expect("test");
        assert!(matches!(
            reader.read_tensor("missing"),
            Err(CargarError::TensorNotFound(_))
        ));
    }

    #[test]
    fn test_size_mismatch() {
        // Shape says 2 f32 (8 bytes) but offsets cover only 4.
        let json = r#"{"w":{"dtype":"F32","shape":[2],"data_offsets":[0,4]}}"#;
        let file = fixture(json, &[0u8; 4]);

        let reader = MmapReader::open(file.path()).expect("test");
        assert!(matches!(
            reader.read_tensor("w"),
            Err(CargarError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_read_at_out_of_bounds() {
        let file = fixture("{}", &[]);
        let reader = MmapReader::open(file.path()).expect("test");
        let mut buf = [0u8; 16];
        assert!(reader.read_at(&mut buf, 1_000_000).is_err());
    }

    #[test]
    fn test_tensor_owns_copy_after_reader_drop() {
        let json = r#"{"w":{"dtype":"I8","shape":[2],"data_offsets":[0,2]}}"#;
        let file = fixture(json, &[7, 9]);

        let tensor = {
            let reader = MmapReader::open(file.path()).expect("test");
            reader.read_tensor("w").expect("test")
        };
        assert_eq!(tensor.bytes(), &[7, 9]);
    }
}
