//! Artifact placement helpers.
//!
//! Renders land in a scratch directory that may sit on a different
//! filesystem than the output root, so moves fall back to copy+delete
//! when `rename` reports EXDEV.

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Final location of an artifact: `<output_root>/<owner>/<file_name>`.
pub fn artifact_destination(output_root: &Path, owner: &str, file_name: &str) -> PathBuf {
    output_root.join(owner).join(file_name)
}

/// Move `src` to `dst`, replacing any file already at `dst`.
///
/// Tries a rename first and falls back to copy-then-delete across devices.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if !fs::try_exists(src).await? {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    // A previous render of the same scene name is superseded.
    match fs::remove_file(dst).await {
        Ok(()) => tracing::debug!("Replaced existing artifact at {}", dst.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(MediaError::from(e)),
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// EXDEV is 18 on Linux and macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    // Stage next to dst so the final rename stays on one filesystem.
    let staged = dst.with_extension("partial");

    if let Err(e) = fs::copy(src, &staged).await {
        tracing::error!(
            "Failed to copy {} -> {}: {}",
            src.display(),
            staged.display(),
            e
        );
        let _ = fs::remove_file(&staged).await;
        return Err(e.into());
    }

    if let Err(e) = fs::rename(&staged, dst).await {
        let _ = fs::remove_file(&staged).await;
        tracing::error!(
            "Failed to rename {} -> {}: {}",
            staged.display(),
            dst.display(),
            e
        );
        return Err(e.into());
    }

    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!(
            "Failed to remove source after copy: {}: {}",
            src.display(),
            e
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_artifact_destination() {
        let dest = artifact_destination(Path::new("videos"), "user-7", "Demo.mp4");
        assert_eq!(dest, PathBuf::from("videos/user-7/Demo.mp4"));
    }

    #[tokio::test]
    async fn test_move_creates_owner_directory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("scratch").join("Demo.mp4");
        fs::create_dir_all(src.parent().unwrap()).await.unwrap();
        fs::write(&src, b"frames").await.unwrap();

        let dst = artifact_destination(&dir.path().join("videos"), "owner", "Demo.mp4");
        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"frames");
    }

    #[tokio::test]
    async fn test_move_replaces_existing_artifact() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("new.mp4");
        let dst = dir.path().join("Demo.mp4");

        fs::write(&src, b"new render").await.unwrap();
        fs::write(&dst, b"old render").await.unwrap();

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).await.unwrap(), "new render");
    }

    #[tokio::test]
    async fn test_move_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = move_file(dir.path().join("absent.mp4"), dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[test]
    fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }
}
