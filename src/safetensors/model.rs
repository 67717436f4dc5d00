//! Safetensors model loading, single-file and sharded
//!
//! A checkpoint is either one `.safetensors` file or several shards tied
//! together by an index JSON (`model.safetensors.index.json`) whose
//! `weight_map` sends each tensor name to its shard file. Loading a
//! single-file checkpoint synthesizes an equivalent index, so the rest of
//! the code never distinguishes the two layouts.

use std::collections::HashMap;

use serde::Deserialize;

use super::{Header, MmapReader, TensorMetadata};
use crate::error::{CargarError, Result};
use crate::hub::ModelStore;
use crate::tensor::{NamedTensor, Tensor};

/// Index file basenames that mark a sharded checkpoint
const INDEX_BASENAMES: [&str; 2] = [
    "model.safetensors.index.json",
    "pytorch_model.safetensors.index.json",
];

/// Parsed shard index (`model.safetensors.index.json`)
///
/// For single-file checkpoints an equivalent index is synthesized with every
/// tensor mapped to that one file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShardIndex {
    /// Free-form checkpoint metadata
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Tensor name to shard file basename
    #[serde(default)]
    pub weight_map: HashMap<String, String>,
}

/// Header of one `.safetensors` file in a repository
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Repository file name
    pub filename: String,
    /// Parsed header
    pub header: Header,
}

/// A Safetensors checkpoint, possibly split across multiple shard files
///
/// # Examples
///
/// ```rust,ignore
/// let repo = LocalRepo::new("/models/llama");
/// let model = SafetensorsModel::load(repo)?;
/// for named in model.iter_tensors() {
///     let named = named?;
///     println!("{}: {:?}", named.name, named.tensor.shape());
/// }
/// ```
#[derive(Debug)]
pub struct SafetensorsModel<S: ModelStore> {
    repo: S,
    index: ShardIndex,
}

impl<S: ModelStore> SafetensorsModel<S> {
    /// Detect whether the repository holds a sharded checkpoint
    ///
    /// Returns the index file name if one of the known index basenames is
    /// present, `None` for a single-file layout.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the repository listing fails.
    pub fn detect_sharded(repo: &S) -> Result<Option<String>> {
        for filename in repo.list_files()? {
            let base = filename.rsplit('/').next().unwrap_or(&filename);
            if INDEX_BASENAMES.contains(&base) {
                return Ok(Some(filename));
            }
        }
        Ok(None)
    }

    /// Load the checkpoint layout from a repository
    ///
    /// Sharded checkpoints parse only the index here; shard headers are
    /// parsed lazily when their tensors are read. Single-file checkpoints
    /// parse the one header and synthesize the weight map from it.
    ///
    /// # Errors
    ///
    /// Returns error if the repository has no `.safetensors` file, or the
    /// index/header fails to parse.
    pub fn load(repo: S) -> Result<Self> {
        let index = match Self::detect_sharded(&repo)? {
            Some(index_file) => {
                log::debug!("sharded checkpoint, index file {index_file}");
                let local = repo.download(&index_file)?;
                let bytes = std::fs::read(&local)
                    .map_err(|e| CargarError::io(format!("read {}", local.display()), &e))?;
                serde_json::from_slice::<ShardIndex>(&bytes).map_err(|e| {
                    CargarError::MalformedJson {
                        context: index_file,
                        reason: e.to_string(),
                    }
                })?
            },
            None => {
                let filename = repo
                    .list_files()?
                    .into_iter()
                    .find(|f| f.ends_with(".safetensors"))
                    .ok_or_else(|| CargarError::Io {
                        context: "load safetensors model".to_string(),
                        source_msg: "no .safetensors file found in repository".to_string(),
                    })?;
                log::debug!("single-file checkpoint {filename}");
                let local = repo.download(&filename)?;
                let (header, _) = Header::parse(&local)?;
                let weight_map = header
                    .tensors
                    .keys()
                    .map(|name| (name.clone(), filename.clone()))
                    .collect();
                ShardIndex {
                    metadata: serde_json::Map::new(),
                    weight_map,
                }
            },
        };

        Ok(Self { repo, index })
    }

    /// The shard index (synthesized for single-file checkpoints)
    #[must_use]
    pub fn index(&self) -> &ShardIndex {
        &self.index
    }

    /// All tensor names in the checkpoint
    #[must_use]
    pub fn tensor_names(&self) -> Vec<&str> {
        self.index.weight_map.keys().map(String::as_str).collect()
    }

    /// Shard file holding a tensor
    ///
    /// # Errors
    ///
    /// Returns `TensorNotFound` if the name is not in the weight map.
    pub fn tensor_filename(&self, name: &str) -> Result<&str> {
        self.index
            .weight_map
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| CargarError::TensorNotFound(name.to_string()))
    }

    /// Open a reader for one shard file
    fn open_shard(&self, filename: &str) -> Result<MmapReader> {
        let local = self.repo.download(filename)?;
        MmapReader::open(local)
    }

    /// Parse the header of one `.safetensors` file in the repository
    ///
    /// # Errors
    ///
    /// Returns error on download or parse failure.
    pub fn file_header(&self, filename: &str) -> Result<Header> {
        let local = self.repo.download(filename)?;
        let (header, _) = Header::parse(local)?;
        Ok(header)
    }

    /// Headers of every `.safetensors` file in the repository
    ///
    /// # Errors
    ///
    /// Returns error on download or parse failure of any file.
    pub fn safetensor_files(&self) -> Result<Vec<FileInfo>> {
        let mut infos = Vec::new();
        for filename in self.repo.list_files()? {
            if !filename.ends_with(".safetensors") {
                continue;
            }
            let header = self.file_header(&filename)?;
            infos.push(FileInfo { filename, header });
        }
        Ok(infos)
    }

    /// Metadata for one tensor, without reading its data
    ///
    /// # Errors
    ///
    /// Returns `TensorNotFound` for names absent from the weight map, and
    /// `InconsistentIndex` when the declared shard's header lacks the name.
    pub fn tensor_metadata(&self, name: &str) -> Result<TensorMetadata> {
        let filename = self.tensor_filename(name)?.to_string();
        let header = self.file_header(&filename)?;
        header
            .tensors
            .get(name)
            .cloned()
            .ok_or(CargarError::InconsistentIndex {
                tensor: name.to_string(),
                shard: filename,
            })
    }

    /// Read one tensor by name
    ///
    /// Opens the shard's mmap for the duration of the read only. For bulk
    /// loading prefer [`SafetensorsModel::iter_tensors`], which opens each
    /// shard once.
    ///
    /// # Errors
    ///
    /// Returns `TensorNotFound`, `InconsistentIndex`, or the underlying
    /// read error.
    pub fn get_tensor(&self, name: &str) -> Result<Tensor> {
        let filename = self.tensor_filename(name)?.to_string();
        let reader = self.open_shard(&filename)?;
        match reader.read_tensor(name) {
            Err(CargarError::TensorNotFound(tensor)) => Err(CargarError::InconsistentIndex {
                tensor,
                shard: filename,
            }),
            other => other,
        }
    }

    /// Iterate over every tensor, grouped by shard
    ///
    /// Each shard's mmap is opened once; within a shard, tensors are read
    /// in ascending `data_offsets[0]` order so a cold load touches the file
    /// sequentially. The mapping is released at each shard boundary and on
    /// drop, so abandoning the iterator mid-way leaks no file descriptor.
    #[must_use]
    pub fn iter_tensors(&self) -> TensorIter<'_, S> {
        let mut by_shard: HashMap<&str, Vec<String>> = HashMap::new();
        for (tensor, shard) in &self.index.weight_map {
            by_shard.entry(shard).or_default().push(tensor.clone());
        }
        let mut shards: Vec<(String, Vec<String>)> = by_shard
            .into_iter()
            .map(|(shard, names)| (shard.to_string(), names))
            .collect();
        // No cross-shard order is promised; sort for reproducibility.
        shards.sort_by(|a, b| a.0.cmp(&b.0));
        shards.reverse(); // Consumed by pop().

        TensorIter {
            model: self,
            shards,
            current: None,
            failed: false,
        }
    }
}

/// Iterator over all tensors of a checkpoint, one shard mmap at a time
///
/// Yields `Err` once on the first failure and then terminates.
pub struct TensorIter<'a, S: ModelStore> {
    model: &'a SafetensorsModel<S>,
    /// Remaining shards, consumed from the back
    shards: Vec<(String, Vec<String>)>,
    current: Option<(MmapReader, std::vec::IntoIter<String>)>,
    failed: bool,
}

impl<S: ModelStore> TensorIter<'_, S> {
    /// Open the next shard and sort its tensor names by data offset
    fn advance_shard(&mut self) -> Result<bool> {
        let Some((filename, names)) = self.shards.pop() else {
            return Ok(false);
        };

        let reader = self.model.open_shard(&filename)?;
        let mut ordered: Vec<(u64, String)> = Vec::with_capacity(names.len());
        for name in names {
            let meta = reader.header().tensors.get(&name).ok_or_else(|| {
                CargarError::InconsistentIndex {
                    tensor: name.clone(),
                    shard: filename.clone(),
                }
            })?;
            ordered.push((meta.data_offsets[0], name));
        }
        ordered.sort_by_key(|(offset, _)| *offset);

        let names: Vec<String> = ordered.into_iter().map(|(_, name)| name).collect();
        self.current = Some((reader, names.into_iter()));
        Ok(true)
    }
}

impl<S: ModelStore> Iterator for TensorIter<'_, S> {
    type Item = Result<NamedTensor>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some((reader, names)) = &mut self.current {
                if let Some(name) = names.next() {
                    return match reader.read_tensor(&name) {
                        Ok(tensor) => Some(Ok(NamedTensor { name, tensor })),
                        Err(e) => {
                            self.failed = true;
                            Some(Err(e))
                        },
                    };
                }
                // Shard exhausted: release its mmap before opening the next.
                self.current = None;
            }
            match self.advance_shard() {
                Ok(true) => {},
                Ok(false) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::LocalRepo;
    use std::io::Write;
    use std::path::Path;

    fn write_shard(dir: &Path, name: &str, json: &str, data: &[u8]) {
        let mut file = std::fs::File::create(dir.join(name)).expect("test");
        let json_bytes = json.as_bytes();
        file.write_all(&(json_bytes.len() as u64).to_le_bytes())
            .expect("test");
        file.write_all(json_bytes).expect("test");
        file.write_all(data).expect("test");
    }

    #[test]
    fn test_detect_not_sharded() {
        let dir = tempfile::tempdir().expect("test");
        write_shard(dir.path(), "model.safetensors", "{}", &[]);

        let repo = LocalRepo::new(dir.path());
        assert_eq!(SafetensorsModel::detect_sharded(&repo).expect("test"), None);
    }

    #[test]
    fn test_detect_sharded() {
        let dir = tempfile::tempdir().expect("test");
        std::fs::write(
            dir.path().join("model.safetensors.index.json"),
            br#"{"metadata":{},"weight_map":{}}"#,
        )
        .expect("test");

        let repo = LocalRepo::new(dir.path());
        assert_eq!(
            SafetensorsModel::detect_sharded(&repo).expect("test"),
            Some("model.safetensors.index.json".to_string())
        );
    }

    #[test]
    fn test_single_file_synthesizes_weight_map() {
        let dir = tempfile::tempdir().expect("test");
        let json = r#"{
            "a":{"dtype":"F32","shape":[1],"data_offsets":[0,4]},
            "b":{"dtype":"F32","shape":[1],"data_offsets":[4,8]}
        }"#;
        write_shard(dir.path(), "model.safetensors", json, &[0u8; 8]);

        let model = SafetensorsModel::load(LocalRepo::new(dir.path())).expect("test");
        assert_eq!(model.index().weight_map.len(), 2);
        assert_eq!(
            model.tensor_filename("a").expect("test"),
            "model.safetensors"
        );
        assert_eq!(
            model.tensor_filename("b").expect("test"),
            "model.safetensors"
        );
    }

    #[test]
    fn test_get_tensor_single_file() {
        let dir = tempfile::tempdir().expect("test");
        let json = r#"{"w":{"dtype":"F32","shape":[2],"data_offsets":[0,8]}}"#;
        let mut data = Vec::new();
        data.extend_from_slice(&3.0f32.to_le_bytes());
        data.extend_from_slice(&4.0f32.to_le_bytes());
        write_shard(dir.path(), "model.safetensors", json, &data);

        let model = SafetensorsModel::load(LocalRepo::new(dir.path())).expect("test");
        let tensor = model.get_tensor("w").expect("test");
        assert_eq!(tensor.to_f32_vec().expect("test"), vec![3.0, 4.0]);
    }

    #[test]
    fn test_missing_tensor() {
        let dir = tempfile::tempdir().expect("test");
        write_shard(dir.path(), "model.safetensors", "{}", &[]);

        let model = SafetensorsModel::load(LocalRepo::new(dir.path())).expect("test");
        assert!(matches!(
            model.get_tensor("nope"),
            Err(CargarError::TensorNotFound(_))
        ));
    }

    #[test]
    fn test_inconsistent_index() {
        let dir = tempfile::tempdir().expect("test");
        std::fs::write(
            dir.path().join("model.safetensors.index.json"),
            br#"{"metadata":{},"weight_map":{"ghost":"shard-00001.safetensors"}}"#,
        )
        .expect("test");
        write_shard(dir.path(), "shard-00001.safetensors", "{}", &[]);

        let model = SafetensorsModel::load(LocalRepo::new(dir.path())).expect("test");
        assert!(matches!(
            model.get_tensor("ghost"),
            Err(CargarError::InconsistentIndex { .. })
        ));
    }

    #[test]
    fn test_missing_shard_file_is_io_error() {
        let dir = tempfile::tempdir().expect("test");
        std::fs::write(
            dir.path().join("model.safetensors.index.json"),
            br#"{"metadata":{},"weight_map":{"w":"gone.safetensors"}}"#,
        )
        .expect("test");

        let model = SafetensorsModel::load(LocalRepo::new(dir.path())).expect("test");
        assert!(matches!(
            model.get_tensor("w"),
            Err(CargarError::Io { .. })
        ));
    }

    #[test]
    fn test_iter_tensors_offset_order_within_shard() {
        let dir = tempfile::tempdir().expect("test");
        // Names chosen so alphabetical order differs from offset order.
        let json = r#"{
            "z_first":{"dtype":"U8","shape":[1],"data_offsets":[0,1]},
            "a_last":{"dtype":"U8","shape":[1],"data_offsets":[2,3]},
            "m_mid":{"dtype":"U8","shape":[1],"data_offsets":[1,2]}
        }"#;
        write_shard(dir.path(), "model.safetensors", json, &[10, 20, 30]);

        let model = SafetensorsModel::load(LocalRepo::new(dir.path())).expect("test");
        let names: Vec<String> = model
            .iter_tensors()
            .map(|r| r.expect("test").name)
            .collect();
        assert_eq!(names, vec!["z_first", "m_mid", "a_last"]);
    }

    #[test]
    fn test_iter_tensors_two_shards() {
        let dir = tempfile::tempdir().expect("test");
        std::fs::write(
            dir.path().join("model.safetensors.index.json"),
            br#"{
                "metadata":{"total_size":"6"},
                "weight_map":{
                    "a0":"model-00001-of-00002.safetensors",
                    "a1":"model-00001-of-00002.safetensors",
                    "a2":"model-00001-of-00002.safetensors",
                    "b0":"model-00002-of-00002.safetensors",
                    "b1":"model-00002-of-00002.safetensors",
                    "b2":"model-00002-of-00002.safetensors"
                }
            }"#,
        )
        .expect("test");

        let shard_json = |names: [&str; 3]| {
            format!(
                r#"{{
                    "{}":{{"dtype":"U8","shape":[1],"data_offsets":[0,1]}},
                    "{}":{{"dtype":"U8","shape":[1],"data_offsets":[1,2]}},
                    "{}":{{"dtype":"U8","shape":[1],"data_offsets":[2,3]}}
                }}"#,
                names[0], names[1], names[2]
            )
        };
        write_shard(
            dir.path(),
            "model-00001-of-00002.safetensors",
            &shard_json(["a0", "a1", "a2"]),
            &[1, 2, 3],
        );
        write_shard(
            dir.path(),
            "model-00002-of-00002.safetensors",
            &shard_json(["b0", "b1", "b2"]),
            &[4, 5, 6],
        );

        let model = SafetensorsModel::load(LocalRepo::new(dir.path())).expect("test");
        let names: Vec<String> = model
            .iter_tensors()
            .map(|r| r.expect("test").name)
            .collect();
        // Shard A's three in offset order, then shard B's three.
        assert_eq!(names, vec!["a0", "a1", "a2", "b0", "b1", "b2"]);
    }

    #[test]
    fn test_iter_stops_after_error() {
        let dir = tempfile::tempdir().expect("test");
        std::fs::write(
            dir.path().join("model.safetensors.index.json"),
            br#"{"weight_map":{"w":"gone.safetensors"}}"#,
        )
        .expect("test");

        let model = SafetensorsModel::load(LocalRepo::new(dir.path())).expect("test");
        let mut iter = model.iter_tensors();
        assert!(iter.next().expect("one item").is_err());
        assert!(iter.next().is_none());
    }
}
