//! Atomic JSON file writes shared by the account and settings stores

use std::path::Path;

use tracing::debug;

/// Write `contents` to `path` atomically.
///
/// Writes a temp file in the same directory and renames it over the target,
/// so a crash mid-write never leaves a truncated file. The file holds refresh
/// tokens and client secrets, so it is created 0600 on unix.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", path.display()),
        )
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, contents).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    tokio::fs::rename(&tmp_path, path).await?;
    debug!(path = %path.display(), bytes = contents.len(), "persisted file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replaces_existing_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        tokio::fs::write(&path, b"old").await.unwrap();

        write_atomic(&path, b"[1,2,3]").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"[1,2,3]");

        // No temp file left behind.
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["data.json"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        write_atomic(&path, b"[]").await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "store file must be 0600, got {mode:o}");
    }
}
