//! GGUF model loading and bulk tensor iteration

use std::path::{Path, PathBuf};

use super::{GgufFile, KeyValue, TensorInfo, TensorReader};
use crate::error::{CargarError, Result};
use crate::hub::ModelStore;
use crate::tensor::{NamedTensor, Tensor};

/// A GGUF model backed by a local file
///
/// # Examples
///
/// ```rust,ignore
/// let model = GgufModel::open("/models/phi-2-q4_k_m.gguf")?;
/// println!("architecture: {}", model.architecture());
/// for named in model.iter_tensors()? {
///     let named = named?;
///     println!("{}: {:?}", named.name, named.tensor.shape());
/// }
/// ```
#[derive(Debug)]
pub struct GgufModel {
    file: GgufFile,
    path: PathBuf,
}

impl GgufModel {
    /// Parse a local GGUF file
    ///
    /// # Errors
    ///
    /// Returns the parse error of [`GgufFile::open`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = GgufFile::open(&path)?;
        Ok(Self { file, path })
    }

    /// Download and parse the first `.gguf` file of a repository
    ///
    /// # Errors
    ///
    /// Returns `Io` if the repository has no `.gguf` file or the download
    /// fails, otherwise the parse error.
    pub fn from_repo<S: ModelStore>(repo: &S) -> Result<Self> {
        let filename = repo
            .list_files()?
            .into_iter()
            .find(|f| f.ends_with(".gguf"))
            .ok_or_else(|| CargarError::Io {
                context: "load gguf model".to_string(),
                source_msg: "no .gguf file found in repository".to_string(),
            })?;
        log::debug!("loading gguf file {filename}");
        let local = repo.download(&filename)?;
        Self::open(local)
    }

    /// Parsed file metadata and tensor directory
    #[must_use]
    pub fn file(&self) -> &GgufFile {
        &self.file
    }

    /// Local path of the `.gguf` file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Model architecture string (`general.architecture`), or `""`
    #[must_use]
    pub fn architecture(&self) -> &str {
        self.file.architecture()
    }

    /// Look up a metadata key-value pair
    #[must_use]
    pub fn get_key_value(&self, key: &str) -> Option<&KeyValue> {
        self.file.get_key_value(key)
    }

    /// Names of all tensors in file order
    #[must_use]
    pub fn tensor_names(&self) -> Vec<&str> {
        self.file.tensor_names()
    }

    /// Look up a tensor's metadata without reading its data
    #[must_use]
    pub fn get_tensor_info(&self, name: &str) -> Option<&TensorInfo> {
        self.file.get_tensor_info(name)
    }

    /// Read one tensor by name, dequantizing if needed
    ///
    /// Opens the file's mmap for the duration of the read only; prefer
    /// [`GgufModel::iter_tensors`] for bulk loading.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`TensorReader::read_tensor`].
    pub fn get_tensor(&self, name: &str) -> Result<Tensor> {
        let reader = TensorReader::open(&self.path, &self.file)?;
        reader.read_tensor(name)
    }

    /// Iterate over all tensors in ascending data-offset order
    ///
    /// One mmap is held for the whole iteration and released on drop, so a
    /// caller that stops consuming early leaks nothing.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be mapped.
    pub fn iter_tensors(&self) -> Result<GgufTensorIter<'_>> {
        let reader = TensorReader::open(&self.path, &self.file)?;

        let mut names: Vec<(u64, String)> = self
            .file
            .tensor_infos
            .iter()
            .map(|ti| (ti.offset, ti.name.clone()))
            .collect();
        names.sort_by_key(|(offset, _)| *offset);

        Ok(GgufTensorIter {
            reader,
            names: names.into_iter().map(|(_, name)| name).collect(),
            next: 0,
            failed: false,
        })
    }
}

/// Iterator over all tensors of a GGUF file, sorted by data offset
///
/// Yields `Err` once on the first failure and then terminates.
pub struct GgufTensorIter<'a> {
    reader: TensorReader<'a>,
    names: Vec<String>,
    next: usize,
    failed: bool,
}

impl Iterator for GgufTensorIter<'_> {
    type Item = Result<NamedTensor>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.names.len() {
            return None;
        }
        let name = self.names[self.next].clone();
        self.next += 1;
        match self.reader.read_tensor(&name) {
            Ok(tensor) => Some(Ok(NamedTensor { name, tensor })),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            },
        }
    }
}
