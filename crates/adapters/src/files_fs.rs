//! Bundle files in a local directory

use async_trait::async_trait;
use articles2kindle_domain::{BundleFiles, FileError, StoredFile};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

fn io_error(path: &Path, source: std::io::Error) -> FileError {
    FileError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// One file per bundle under a single directory
#[derive(Debug, Clone)]
pub struct FsBundleFiles {
    dir: PathBuf,
}

impl FsBundleFiles {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, FileError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `name.ext`, then `name (2).ext`, `name (3).ext`, ...
    async fn free_path(&self, file_name: &str) -> Result<PathBuf, FileError> {
        let requested = Path::new(file_name);
        let stem = requested
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = requested
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut candidate = self.dir.join(file_name);
        let mut n = 1;
        while fs::try_exists(&candidate)
            .await
            .map_err(|e| io_error(&candidate, e))?
        {
            n += 1;
            candidate = self.dir.join(format!("{} ({}){}", stem, n, extension));
        }
        Ok(candidate)
    }
}

#[async_trait]
impl BundleFiles for FsBundleFiles {
    /// Stage under a hidden temp name, then rename into place
    async fn write(&self, file_name: &str, bytes: &[u8]) -> Result<StoredFile, FileError> {
        let staging = self.dir.join(format!(".{}.partial", Uuid::new_v4()));

        let staged = async {
            let mut file = fs::File::create(&staging).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;
        if let Err(e) = staged {
            let _ = fs::remove_file(&staging).await;
            return Err(io_error(&staging, e));
        }

        let path = match self.free_path(file_name).await {
            Ok(path) => path,
            Err(e) => {
                let _ = fs::remove_file(&staging).await;
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(io_error(&path, e));
        }

        let size = fs::metadata(&path)
            .await
            .map_err(|e| io_error(&path, e))?
            .len();

        tracing::debug!(path = %path.display(), size, "Wrote bundle file");
        Ok(StoredFile { path, size })
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, FileError> {
        fs::read(path).await.map_err(|e| io_error(path, e))
    }

    async fn size(&self, path: &Path) -> Result<Option<u64>, FileError> {
        match fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(path, e)),
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    async fn remove(&self, path: &Path) -> Result<(), FileError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(path, e)),
        }
    }
}
