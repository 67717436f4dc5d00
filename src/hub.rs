//! Model store contract
//!
//! The download/caching side of a model hub is an external collaborator.
//! Cargar consumes only this minimal interface: list the file names in a
//! repository, and resolve one of them to a local path. An HTTP client,
//! file locking, and authentication all live behind an implementation of
//! [`ModelStore`].
//!
//! [`LocalRepo`] implements the contract over a plain directory, which makes
//! the loaders usable on already-downloaded checkpoints and testable without
//! a network.

use std::path::{Path, PathBuf};

use crate::error::{CargarError, Result};

/// Source of model repository files
///
/// Calls may block arbitrarily (a remote implementation downloads on
/// `download`); Cargar does not impose a timeout.
pub trait ModelStore {
    /// File names available in the repository, relative to its root
    ///
    /// # Errors
    ///
    /// Returns `Io` if the listing cannot be obtained.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Resolve a repository file to a local filesystem path
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be fetched or does not exist.
    fn download(&self, name: &str) -> Result<PathBuf>;
}

/// A model repository rooted at a local directory
///
/// # Examples
///
/// ```rust,ignore
/// let repo = LocalRepo::new("/models/bert-base-uncased");
/// let model = SafetensorsModel::load(&repo)?;
/// ```
#[derive(Debug, Clone)]
pub struct LocalRepo {
    root: PathBuf,
}

impl LocalRepo {
    /// Create a repository view over a directory
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Directory this repository is rooted at
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ModelStore for LocalRepo {
    fn list_files(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| CargarError::io(format!("list {}", self.root.display()), &e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| CargarError::io(format!("list {}", self.root.display()), &e))?;
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        // Directory iteration order is filesystem-dependent; sort for
        // deterministic "first matching file" selection.
        names.sort();
        Ok(names)
    }

    fn download(&self, name: &str) -> Result<PathBuf> {
        let path = self.root.join(name);
        if !path.is_file() {
            return Err(CargarError::Io {
                context: format!("download {name}"),
                source_msg: format!("{} not found", path.display()),
            });
        }
        Ok(path)
    }
}
