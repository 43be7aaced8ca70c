//! Per-run scratch directory.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use vmix_models::RunId;

/// Private working directory of one run.
///
/// Every intermediate lives here. Dropping the workspace deletes it, so
/// success, failure and cancellation all clean up the same way.
#[derive(Debug)]
pub struct RunWorkspace {
    dir: TempDir,
}

impl RunWorkspace {
    /// Create a fresh directory under `root`.
    pub async fn create(root: impl AsRef<Path>, run_id: &RunId) -> std::io::Result<Self> {
        let root = root.as_ref();
        tokio::fs::create_dir_all(root).await?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("vmix-{}-", run_id))
            .tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Intermediate for the `index`-th plan entry.
    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.file(&format!("segment_{:03}.mp4", index))
    }
}
