//! Filesystem helpers for publishing rendered files.
//!
//! Renders happen inside a per-run scratch directory that may live on a
//! different filesystem than the requested output path, so publishing has to
//! survive EXDEV.

use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::MediaResult;

/// EXDEV on Linux and macOS.
const EXDEV: i32 = 18;

fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(EXDEV)
}

async fn ensure_parent(path: &Path) -> MediaResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Move `src` to `dst`, replacing `dst` and creating its parent directory.
///
/// Falls back to copy-then-delete across filesystems. The copy lands next to
/// `dst` first and is renamed into place, so `dst` never holds a partial file.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    ensure_parent(dst).await?;

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            debug!(src = %src.display(), dst = %dst.display(), "Cross-device move, copying");

            let staging = dst.with_extension("partial");
            if let Err(e) = fs::copy(src, &staging).await {
                remove_if_exists(&staging).await;
                return Err(e.into());
            }
            if let Err(e) = fs::rename(&staging, dst).await {
                remove_if_exists(&staging).await;
                return Err(e.into());
            }
            if let Err(e) = fs::remove_file(src).await {
                warn!(src = %src.display(), error = %e, "Could not remove moved source");
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Best-effort delete; missing files are fine.
pub async fn remove_if_exists(path: impl AsRef<Path>) {
    let path = path.as_ref();
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Could not remove file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_replaces_destination() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("render.mp4");
        let dst = dir.path().join("out").join("final.mp4");

        fs::create_dir_all(dst.parent().unwrap()).await.unwrap();
        fs::write(&dst, b"stale").await.unwrap();
        fs::write(&src, b"fresh").await.unwrap();

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_move_creates_parent() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.bin");
        let dst = dir.path().join("x").join("y").join("b.bin");
        fs::write(&src, b"1").await.unwrap();

        move_file(&src, &dst).await.unwrap();
        assert!(dst.exists());
    }

    #[tokio::test]
    async fn test_move_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let result = move_file(dir.path().join("nope"), dir.path().join("dst")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_remove_if_exists_tolerates_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.txt");
        remove_if_exists(&path).await;
        fs::write(&path, b"x").await.unwrap();
        remove_if_exists(&path).await;
        assert!(!path.exists());
    }

    #[test]
    fn test_cross_device_detection() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }
}
