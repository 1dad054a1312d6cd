use std::path::Path;

use crate::TransferError;
use crate::types::UploadSource;

/// Validates a local upload source and splits it into directory and name.
///
/// Rejects:
/// - Empty paths
/// - Paths that do not exist
/// - Directories and other non-regular files
/// - Paths without a file name component (`/`, `..`)
///
/// The directory is reported with `/` separators, as the service expects.
pub fn resolve_upload_source(path: &Path) -> Result<UploadSource, TransferError> {
    if path.as_os_str().is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let metadata = std::fs::metadata(path).map_err(|e| {
        TransferError::InvalidPath(format!("not a valid file: {} ({e})", path.display()))
    })?;
    if !metadata.is_file() {
        return Err(TransferError::InvalidPath(format!(
            "not a regular file: {}",
            path.display()
        )));
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            TransferError::InvalidPath(format!("no file name in path: {}", path.display()))
        })?;

    let dir_path = path
        .parent()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();

    Ok(UploadSource {
        path: path.to_path_buf(),
        dir_path,
        file_name,
        size_bytes: metadata.len(),
        modified: metadata.modified()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rejects_empty_path() {
        assert!(resolve_upload_source(Path::new("")).is_err());
    }

    #[test]
    fn rejects_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = resolve_upload_source(&dir.path().join("missing.mkv"));
        assert!(matches!(result, Err(TransferError::InvalidPath(_))));
    }

    #[test]
    fn rejects_directory() {
        let dir = TempDir::new().unwrap();
        let result = resolve_upload_source(dir.path());
        assert!(matches!(result, Err(TransferError::InvalidPath(_))));
    }

    #[test]
    fn splits_dir_and_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("movie_montage.mkv");
        std::fs::write(&path, b"frames").unwrap();

        let source = resolve_upload_source(&path).unwrap();
        assert_eq!(source.file_name, "movie_montage.mkv");
        assert_eq!(
            source.dir_path,
            dir.path().to_string_lossy().replace('\\', "/")
        );
        assert_eq!(source.size_bytes, 6);
        assert_eq!(source.path, path);
    }

    #[test]
    fn accepts_nested_file() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("ClickArt");
        std::fs::create_dir_all(&sub).unwrap();
        let path = sub.join("NYBN_026.JPG");
        std::fs::write(&path, b"jpg").unwrap();

        let source = resolve_upload_source(&path).unwrap();
        assert!(source.dir_path.ends_with("ClickArt"));
        assert!(!source.dir_path.contains('\\'));
    }
}
