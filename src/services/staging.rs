use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use thiserror::Error;

/// Why a staged file exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagePurpose {
    IncomingUpload,
    OutgoingDownload,
    PipelineInput,
    PipelineOutput,
}

impl StagePurpose {
    pub const ALL: [StagePurpose; 4] = [
        StagePurpose::IncomingUpload,
        StagePurpose::OutgoingDownload,
        StagePurpose::PipelineInput,
        StagePurpose::PipelineOutput,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StagePurpose::IncomingUpload => "incoming-upload",
            StagePurpose::OutgoingDownload => "outgoing-download",
            StagePurpose::PipelineInput => "pipeline-input",
            StagePurpose::PipelineOutput => "pipeline-output",
        }
    }
}

impl fmt::Display for StagePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Failed to prepare staging path {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StagingError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Transient local file (or directory) owned by one request or pipeline run.
///
/// Each staged file sits alone in its own freshly created directory. The
/// directory is removed by [`StagedFile::release`] or, failing that, when the
/// value is dropped, so every exit path of the owner cleans up.
pub struct StagedFile {
    local_path: PathBuf,
    purpose: StagePurpose,
    owner: String,
    dir: Option<TempDir>,
}

impl StagedFile {
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn purpose(&self) -> StagePurpose {
        self.purpose
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Removes the staged file and its directory. Missing files are not an
    /// error; other failures are logged and swallowed so they never mask the
    /// outcome of the owning operation.
    pub async fn release(mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        let path = dir.path().to_path_buf();
        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(result) => log_removal(&path, self.purpose, &self.owner, result),
            Err(e) => tracing::warn!(
                "Staging cleanup task for {} failed: {}",
                path.display(),
                e
            ),
        }
    }
}

// Removal here blocks the dropping thread. A staged tree is one file or one
// run's inputs; owners that can await use `release`.
impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            log_removal(&path, self.purpose, &self.owner, dir.close());
        }
    }
}

impl fmt::Debug for StagedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedFile")
            .field("local_path", &self.local_path)
            .field("purpose", &self.purpose)
            .field("owner", &self.owner)
            .field("released", &self.dir.is_none())
            .finish()
    }
}

fn log_removal(path: &Path, purpose: StagePurpose, owner: &str, result: std::io::Result<()>) {
    match result {
        Ok(()) => tracing::debug!("🧹 Released {} staging for {}: {}", purpose, owner, path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            "Failed to remove {} staging {} for {}: {}",
            purpose,
            path.display(),
            owner,
            e
        ),
    }
}

/// Keeps owner labels usable as path components.
fn path_label(owner: &str) -> String {
    let label: String = owner
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(48)
        .collect();
    if label.is_empty() {
        "anon".to_string()
    } else {
        label
    }
}

/// Dedicated scratch area for staged files.
///
/// Layout: `<root>/<purpose>/<owner>-<seq>-<random>/<file name>`.
pub struct StagingArea {
    root: PathBuf,
    sequence: AtomicU64,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StagingError::io(&root, e))?;
        Ok(Self {
            root,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocates a fresh path for `file_name`. The file itself is not created.
    pub async fn stage(
        &self,
        purpose: StagePurpose,
        owner: &str,
        file_name: &str,
    ) -> Result<StagedFile, StagingError> {
        let dir = self.allocate(purpose, owner).await?;
        let file_name = Path::new(file_name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "file".into());
        let local_path = dir.path().join(file_name);
        Ok(StagedFile {
            local_path,
            purpose,
            owner: owner.to_string(),
            dir: Some(dir),
        })
    }

    /// Allocates a fresh, empty directory.
    pub async fn stage_directory(
        &self,
        purpose: StagePurpose,
        owner: &str,
    ) -> Result<StagedFile, StagingError> {
        let dir = self.allocate(purpose, owner).await?;
        Ok(StagedFile {
            local_path: dir.path().to_path_buf(),
            purpose,
            owner: owner.to_string(),
            dir: Some(dir),
        })
    }

    pub async fn release(&self, staged: StagedFile) {
        staged.release().await;
    }

    async fn allocate(&self, purpose: StagePurpose, owner: &str) -> Result<TempDir, StagingError> {
        let parent = self.root.join(purpose.as_str());
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| StagingError::io(&parent, e))?;

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let prefix = format!("{}-{}-", path_label(owner), seq);
        let target = parent.clone();
        tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix(&prefix).tempdir_in(&target)
        })
        .await
        .map_err(|e| StagingError::io(&parent, std::io::Error::other(e)))?
        .map_err(|e| StagingError::io(&parent, e))
    }

    /// Number of staged entries currently on disk.
    pub fn live_entries(&self) -> std::io::Result<usize> {
        let mut count = 0;
        for purpose in StagePurpose::ALL {
            match std::fs::read_dir(self.root.join(purpose.as_str())) {
                Ok(entries) => count += entries.count(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(count)
    }

    /// Removes staged entries whose last modification is at least `max_age`
    /// old, i.e. leftovers of a process that died before releasing them.
    pub async fn purge_stale(&self, max_age: Duration) -> usize {
        let root = self.root.clone();
        let result = tokio::task::spawn_blocking(move || {
            let now = SystemTime::now();
            let mut removed = 0;
            for purpose in StagePurpose::ALL {
                let Ok(entries) = std::fs::read_dir(root.join(purpose.as_str())) else {
                    continue;
                };
                for entry in entries.flatten() {
                    let age = entry
                        .metadata()
                        .and_then(|m| m.modified())
                        .ok()
                        .and_then(|modified| now.duration_since(modified).ok())
                        .unwrap_or_default();
                    if age < max_age {
                        continue;
                    }
                    let path = entry.path();
                    let res = if path.is_dir() {
                        std::fs::remove_dir_all(&path)
                    } else {
                        std::fs::remove_file(&path)
                    };
                    match res {
                        Ok(()) => removed += 1,
                        Err(e) => tracing::warn!(
                            "Failed to purge stale staging entry {}: {}",
                            path.display(),
                            e
                        ),
                    }
                }
            }
            removed
        })
        .await;

        match result {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!("Staging purge task failed: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn area() -> (tempfile::TempDir, StagingArea) {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::new(root.path().join("staging")).unwrap();
        (root, area)
    }

    #[tokio::test]
    async fn test_same_name_never_collides() {
        let (_root, area) = area();
        let area = Arc::new(area);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let area = area.clone();
            handles.push(tokio::spawn(async move {
                area.stage(StagePurpose::IncomingUpload, "req", "photo.jpg")
                    .await
                    .unwrap()
            }));
        }

        let mut staged = Vec::new();
        for handle in handles {
            staged.push(handle.await.unwrap());
        }
        let paths: HashSet<_> = staged.iter().map(|s| s.local_path().to_path_buf()).collect();
        assert_eq!(paths.len(), 32);
        assert!(staged.iter().all(|s| s.local_path().ends_with("photo.jpg")));
        assert_eq!(area.live_entries().unwrap(), 32);

        for s in staged {
            s.release().await;
        }
        assert_eq!(area.live_entries().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_release_removes_file() {
        let (_root, area) = area();
        let staged = area
            .stage(StagePurpose::OutgoingDownload, "download-1", "left.jpg")
            .await
            .unwrap();
        assert!(!staged.local_path().exists());
        tokio::fs::write(staged.local_path(), b"bytes").await.unwrap();

        let path = staged.local_path().to_path_buf();
        area.release(staged).await;
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn test_release_tolerates_missing_file() {
        let (_root, area) = area();
        let staged = area
            .stage_directory(StagePurpose::PipelineInput, "run")
            .await
            .unwrap();
        std::fs::remove_dir_all(staged.local_path()).unwrap();
        staged.release().await;
        assert_eq!(area.live_entries().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drop_cleans_up_on_early_return() {
        let (_root, area) = area();

        async fn failing(area: &StagingArea) -> Result<(), StagingError> {
            let staged = area
                .stage(StagePurpose::PipelineOutput, "run", "panorama.jpg")
                .await?;
            tokio::fs::write(staged.local_path(), b"partial").await.unwrap();
            Err(StagingError::io(
                staged.local_path(),
                std::io::Error::other("boom"),
            ))
        }

        assert!(failing(&area).await.is_err());
        assert_eq!(area.live_entries().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stage_strips_directories_from_name() {
        let (_root, area) = area();
        let staged = area
            .stage(StagePurpose::IncomingUpload, "../../etc", "../../passwd")
            .await
            .unwrap();
        assert!(staged.local_path().starts_with(area.root()));
        assert!(staged.local_path().ends_with("passwd"));
    }

    #[tokio::test]
    async fn test_purge_stale() {
        let (_root, area) = area();
        let kept = area
            .stage(StagePurpose::IncomingUpload, "live", "a.jpg")
            .await
            .unwrap();
        let leaked = area
            .stage_directory(StagePurpose::PipelineInput, "crashed")
            .await
            .unwrap();
        // Simulate a crash: the directory outlives its owner
        std::mem::forget(leaked);

        assert_eq!(area.purge_stale(Duration::from_secs(3600)).await, 0);
        assert_eq!(area.purge_stale(Duration::ZERO).await, 2);
        assert_eq!(area.live_entries().unwrap(), 0);
        kept.release().await;
    }
}
