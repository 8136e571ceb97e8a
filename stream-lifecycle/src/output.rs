use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// The directory a transcoder writes its manifest and segments into.
///
/// Only one subprocess writes here at a time; every other component reads.
#[derive(Debug, Clone)]
pub struct OutputDir {
    dir: PathBuf,
    manifest_name: String,
}

impl OutputDir {
    pub fn new(dir: impl Into<PathBuf>, manifest_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            manifest_name: manifest_name.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Last path component, which is also the URL segment it is served under
    pub fn dir_name(&self) -> Option<&str> {
        self.dir.file_name().and_then(|n| n.to_str())
    }

    pub fn manifest_name(&self) -> &str {
        &self.manifest_name
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(&self.manifest_name)
    }

    /// Create the directory if needed and delete stream files left behind by
    /// a previous transcoder. Returns the number of files removed.
    pub async fn prepare(&self) -> io::Result<usize> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_stream_file(&path) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::debug!("Could not remove stale {}: {}", path.display(), e),
                }
            }
        }
        Ok(removed)
    }

    /// A manifest counts as ready once it exists and is non-empty
    pub async fn manifest_ready(&self) -> bool {
        tokio::fs::metadata(self.manifest_path())
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false)
    }

    /// Time since the manifest was last rewritten
    pub async fn manifest_age(&self) -> Option<Duration> {
        let modified = tokio::fs::metadata(self.manifest_path())
            .await
            .and_then(|m| m.modified())
            .ok()?;
        Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default(),
        )
    }

    /// Remove all stream files. The directory itself is kept.
    pub async fn cleanup(&self) -> io::Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        self.prepare().await.map(|_| ())
    }
}

/// Manifests and MPEG-TS segments are the only files the transcoder produces
pub fn is_stream_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == "ts" || ext == "m3u8")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_prepare_creates_dir_and_removes_stale_files() {
        let temp = TempDir::new().unwrap();
        let out = OutputDir::new(temp.path().join("hls"), "stream.m3u8");
        assert_eq!(out.dir_name(), Some("hls"));
        assert_eq!(out.manifest_name(), "stream.m3u8");

        assert_eq!(out.prepare().await.unwrap(), 0);
        assert!(out.dir().exists());

        std::fs::write(out.dir().join("segment_001.ts"), b"ts").unwrap();
        std::fs::write(out.manifest_path(), b"#EXTM3U\n").unwrap();
        std::fs::write(out.dir().join("notes.txt"), b"keep").unwrap();

        assert_eq!(out.prepare().await.unwrap(), 2);
        assert!(!out.manifest_path().exists());
        assert!(out.dir().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_manifest_ready_requires_content() {
        let temp = TempDir::new().unwrap();
        let out = OutputDir::new(temp.path(), "stream.m3u8");

        assert!(!out.manifest_ready().await);
        assert!(out.manifest_age().await.is_none());

        std::fs::write(out.manifest_path(), b"").unwrap();
        assert!(!out.manifest_ready().await);

        std::fs::write(out.manifest_path(), b"#EXTM3U\n").unwrap();
        assert!(out.manifest_ready().await);
        assert!(out.manifest_age().await.unwrap() < Duration::from_secs(60));
    }
}
