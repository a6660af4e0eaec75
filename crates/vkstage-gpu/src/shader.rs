//! SPIR-V loading.
//!
//! Desktop builds read shaders from the filesystem; platforms that ship
//! shaders inside an application package register them with a
//! [`MemoryShaderLoader`] instead.

use crate::error::{GpuError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

/// Source of SPIR-V words for a shader path.
pub trait ShaderLoader {
    /// Load the SPIR-V words stored under `path`.
    fn load(&self, path: &Path) -> Result<Vec<u32>>;
}

/// Reads SPIR-V files from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileShaderLoader;

impl ShaderLoader for FileShaderLoader {
    fn load(&self, path: &Path) -> Result<Vec<u32>> {
        let mut file = File::open(path).map_err(|source| GpuError::ShaderLoad {
            path: path.to_path_buf(),
            source,
        })?;
        let words = ash::util::read_spv(&mut file).map_err(|source| GpuError::ShaderLoad {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Loaded {} SPIR-V words from {}", words.len(), path.display());
        Ok(words)
    }
}

/// Serves SPIR-V from packaged assets held in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryShaderLoader {
    assets: HashMap<PathBuf, Vec<u8>>,
}

impl MemoryShaderLoader {
    /// Create an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register raw SPIR-V bytes under `path`.
    pub fn insert(&mut self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        self.assets.insert(path.into(), bytes.into());
    }

    /// Register SPIR-V words under `path`.
    pub fn insert_words(&mut self, path: impl Into<PathBuf>, words: &[u32]) {
        self.insert(path, bytemuck::cast_slice::<u32, u8>(words).to_vec());
    }

    /// Builder form of [`insert_words`](Self::insert_words).
    #[must_use]
    pub fn with_words(mut self, path: impl Into<PathBuf>, words: &[u32]) -> Self {
        self.insert_words(path, words);
        self
    }
}

impl ShaderLoader for MemoryShaderLoader {
    fn load(&self, path: &Path) -> Result<Vec<u32>> {
        let bytes = self.assets.get(path).ok_or_else(|| GpuError::ShaderLoad {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "asset not packaged"),
        })?;
        ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|source| GpuError::ShaderLoad {
            path: path.to_path_buf(),
            source,
        })
    }
}
