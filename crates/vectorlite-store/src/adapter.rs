use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use vectorlite_core::{Result, VectorLiteError};

/// Byte-level I/O surface the engine consumes. Keys are opaque strings:
/// path-like on disk, object names for object stores. Concrete backends are
/// injected at construction.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Full contents of `key`. Fails with `NotFound` if absent.
    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Overwrite `key`, creating it if absent.
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Concatenate onto `key`, creating it empty first if absent.
    async fn append(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Overwrite `key` such that the new contents become visible atomically
    /// (rename-into-place semantics on disk).
    async fn atomic_write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Remove `key`. Optional; the default is a no-op and missing keys are
    /// not an error.
    async fn del(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// In-memory adapter: a keyed byte map. The reference backend for tests and
/// for fully ephemeral databases.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.files.lock().contains_key(key)
    }

    pub fn len_of(&self, key: &str) -> Option<usize> {
        self.files.lock().get(key).map(Vec::len)
    }

    /// Direct mutable access for fault-injection tests.
    pub fn corrupt<F: FnOnce(&mut Vec<u8>)>(&self, key: &str, f: F) -> bool {
        let mut files = self.files.lock();
        match files.get_mut(key) {
            Some(bytes) => {
                f(bytes);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| VectorLiteError::NotFound(key.to_string()))
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.files.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn append(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.files
            .lock()
            .entry(key.to_string())
            .or_default()
            .extend_from_slice(bytes);
        Ok(())
    }

    async fn atomic_write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        // The map swap is already atomic under the lock.
        self.write(key, bytes).await
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.files.lock().remove(key);
        Ok(())
    }
}

/// Disk adapter rooted at a directory. `atomic_write` stages into a `.tmp`
/// sibling and renames into place.
#[derive(Debug)]
pub struct FileAdapter {
    root: PathBuf,
}

impl FileAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let traversal = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || traversal {
            return Err(VectorLiteError::InvalidArgument(format!(
                "storage key '{key}' must be a relative path without traversal"
            )));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl StorageAdapter for FileAdapter {
    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VectorLiteError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn append(&self, key: &str, bytes: &[u8]) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    async fn atomic_write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
