use anyhow::{Context, Result};
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;
    async fn write(&self, path: &Path, content: &[u8]) -> Result<()>;
    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn read_to_string(&self, path: &Path) -> Result<String> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes).with_context(|| format!("{:?} is not valid UTF-8", path))
    }
}

/// Sibling an artifact is produced at before it is moved into place, so a
/// half-written file never carries the final name. The extension is kept for
/// tools that pick the format from it.
pub fn staging_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}.part.{}", stem, ext.to_string_lossy()),
        None => format!("{}.part", stem),
    };
    path.with_file_name(name)
}

/// Runs `produce` against the staging path for `path`, then renames the
/// result into place. On failure the staging file is removed and `path` is
/// left untouched.
pub async fn write_staged<F, Fut>(path: &Path, produce: F) -> Result<()>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let staging = staging_path(path);
    let result = match produce(staging.clone()).await {
        Ok(()) => tokio::fs::rename(&staging, path)
            .await
            .with_context(|| format!("Failed to move {:?} into place", path)),
        Err(e) => Err(e),
    };
    if result.is_err() {
        tokio::fs::remove_file(&staging).await.ok();
    }
    result
}

/// Local filesystem storage. Writes create missing parent directories.
pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))
    }

    async fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        write_staged(path, |staging| async move {
            tokio::fs::write(&staging, content)
                .await
                .with_context(|| format!("Failed to write {:?}", staging))
        })
        .await
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_parent_directories() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("nested").join("deeper").join("file.txt");
        let storage = NativeStorage::new();

        assert!(!storage.exists(&path).await?);
        storage.write(&path, b"hello").await?;
        assert!(storage.exists(&path).await?);
        assert_eq!(storage.read_to_string(&path).await?, "hello");
        assert!(!staging_path(&path).exists());
        Ok(())
    }

    #[test]
    fn test_staging_path_keeps_extension() {
        assert_eq!(
            staging_path(Path::new("data/video/story_video.mp4")),
            PathBuf::from("data/video/story_video.part.mp4")
        );
        assert_eq!(
            staging_path(Path::new("data/story.pdf")),
            PathBuf::from("data/story.part.pdf")
        );
        assert_eq!(staging_path(Path::new("data/raw")), PathBuf::from("data/raw.part"));
    }

    #[tokio::test]
    async fn test_failed_producer_leaves_no_artifact() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("story_video.mp4");

        let result = write_staged(&path, |staging| async move {
            tokio::fs::write(&staging, b"truncated").await?;
            Err::<(), _>(anyhow::anyhow!("ffmpeg exited with status 1"))
        })
        .await;

        assert!(result.is_err());
        assert!(!path.exists());
        assert!(!staging_path(&path).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_content() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("1.jpg");
        let storage = NativeStorage::new();
        storage.write(&path, b"first").await?;

        let result = write_staged(&path, |_| async { Err::<(), _>(anyhow::anyhow!("connection reset")) }).await;

        assert!(result.is_err());
        assert_eq!(storage.read(&path).await?, b"first".to_vec());
        Ok(())
    }
}
