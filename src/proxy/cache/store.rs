use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs as async_fs;
use tokio::fs::File as AsyncFile;

use super::CacheKey;

#[derive(Debug, Error)]
#[error("cache root {path} is unavailable: {source}")]
pub struct CacheRootUnavailable {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error)]
pub enum CacheWriteError {
    #[error("failed to create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create cache file {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A cache entry opened for reading.
#[derive(Debug)]
pub struct CachedFile {
    pub file: AsyncFile,
    pub len: u64,
}

#[derive(Debug)]
pub enum Lookup {
    Hit(CachedFile),
    Miss,
    /// The entry could not be opened for a reason other than absence. Callers treat this as a
    /// miss.
    IoError(io::Error),
}

impl Lookup {
    pub fn label(&self) -> &'static str {
        match self {
            Lookup::Hit(_) => "hit",
            Lookup::Miss => "miss",
            Lookup::IoError(_) => "error",
        }
    }
}

/// Filesystem-backed entry store. The directory tree under `root` is the only index.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        key.resolve(&self.root)
    }

    /// Fails when the root no longer exists or is not a directory.
    pub async fn ensure_root(&self) -> Result<(), CacheRootUnavailable> {
        match async_fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(CacheRootUnavailable {
                path: self.root.clone(),
                source: io::Error::other("not a directory"),
            }),
            Err(source) => Err(CacheRootUnavailable {
                path: self.root.clone(),
                source,
            }),
        }
    }

    pub async fn lookup(&self, path: &Path) -> Lookup {
        let file = match AsyncFile::open(path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Lookup::Miss,
            Err(err) => return Lookup::IoError(err),
        };
        match file.metadata().await {
            Ok(meta) if meta.is_file() => Lookup::Hit(CachedFile {
                file,
                len: meta.len(),
            }),
            Ok(_) => Lookup::IoError(io::Error::other("cache path is not a regular file")),
            Err(err) => Lookup::IoError(err),
        }
    }

    /// Creates parent directories and creates (or truncates) the entry file for writing.
    pub async fn create_entry(&self, path: &Path) -> Result<AsyncFile, CacheWriteError> {
        if let Some(parent) = path.parent() {
            async_fs::create_dir_all(parent)
                .await
                .map_err(|source| CacheWriteError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        AsyncFile::create(path)
            .await
            .map_err(|source| CacheWriteError::CreateFile {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn store(dir: &TempDir) -> CacheStore {
        CacheStore::new(dir.path().to_path_buf())
    }

    #[tokio::test]
    async fn absent_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = CacheKey::from_request_path("/depot/1/chunk/missing");
        let lookup = store.lookup(&store.entry_path(&key)).await;
        assert!(matches!(lookup, Lookup::Miss));
        assert_eq!(lookup.label(), "miss");
    }

    #[tokio::test]
    async fn existing_entry_is_a_hit() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = store(&dir);
        let key = CacheKey::from_request_path("/depot/1/chunk/present");
        let path = store.entry_path(&key);
        std::fs::create_dir_all(path.parent().unwrap())?;
        std::fs::write(&path, b"chunk bytes")?;

        match store.lookup(&path).await {
            Lookup::Hit(mut cached) => {
                assert_eq!(cached.len, 11);
                let mut contents = Vec::new();
                cached.file.read_to_end(&mut contents).await?;
                assert_eq!(contents, b"chunk bytes");
            }
            other => panic!("expected hit, got {}", other.label()),
        }
        Ok(())
    }

    #[tokio::test]
    async fn directory_at_entry_path_is_an_io_error() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = store(&dir);
        let key = CacheKey::from_request_path("/depot/1");
        let path = store.entry_path(&key);
        std::fs::create_dir_all(&path)?;

        let lookup = store.lookup(&path).await;
        assert!(matches!(lookup, Lookup::IoError(_)));
        assert_eq!(lookup.label(), "error");
        Ok(())
    }

    #[tokio::test]
    async fn create_entry_builds_parent_directories() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = store(&dir);
        let key = CacheKey::from_request_path("/depot/730/manifest/99/5");
        let path = store.entry_path(&key);

        let mut file = store.create_entry(&path).await?;
        file.write_all(b"zip").await?;
        file.flush().await?;

        assert_eq!(path, dir.path().join("depots").join("730").join("99.zip"));
        assert_eq!(std::fs::read(&path)?, b"zip");
        Ok(())
    }

    #[tokio::test]
    async fn create_entry_truncates_existing_file() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = store(&dir);
        let path = dir.path().join("entry");
        std::fs::write(&path, b"previous contents")?;

        let mut file = store.create_entry(&path).await?;
        file.write_all(b"new").await?;
        file.flush().await?;
        assert_eq!(std::fs::read(&path)?, b"new");
        Ok(())
    }

    #[tokio::test]
    async fn create_entry_reports_directory_failures() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = store(&dir);
        std::fs::write(dir.path().join("depots"), b"a file, not a directory")?;
        let key = CacheKey::from_request_path("/depot/1/chunk/a");

        let err = store
            .create_entry(&store.entry_path(&key))
            .await
            .expect_err("parent is a regular file");
        assert!(matches!(err, CacheWriteError::CreateDir { .. }), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn create_entry_reports_file_failures() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = store(&dir);
        let path = dir.path().join("occupied");
        std::fs::create_dir_all(&path)?;

        let err = store
            .create_entry(&path)
            .await
            .expect_err("entry path is a directory");
        assert!(matches!(err, CacheWriteError::CreateFile { .. }), "{err}");
        Ok(())
    }

    #[tokio::test]
    async fn ensure_root_detects_missing_root() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path().join("gone"));
        let err = store.ensure_root().await.expect_err("root is missing");
        assert!(err.to_string().contains("unavailable"));

        let present = CacheStore::new(dir.path().to_path_buf());
        assert!(present.ensure_root().await.is_ok());
        assert_eq!(present.root(), dir.path());
    }
}
