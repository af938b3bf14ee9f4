//! Utility functions for file names and path manipulation

use crate::config::FileCollisionAction;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Characters that are not allowed in a path component on common filesystems
const ILLEGAL_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Remove characters that cannot appear in a file or directory name
///
/// Control characters go too. The result may be empty; callers decide
/// whether an empty name is an error.
///
/// # Examples
///
/// ```
/// use anime1_dl::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("Re:Zero? <01>"), "ReZero 01");
/// ```
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !ILLEGAL_CHARS.contains(c) && !c.is_control())
        .collect()
}

/// Get a path for a file, handling collisions according to the specified action
///
/// For `Rename` this may add a ` (n)` suffix. For `Skip` an existing file is
/// an [`Error::AlreadyExists`]. `Overwrite` returns the path unchanged.
///
/// # Examples
///
/// ```
/// use anime1_dl::utils::get_unique_path;
/// use anime1_dl::config::FileCollisionAction;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/Show/01/05.mp4");
/// let unique = get_unique_path(path, FileCollisionAction::Rename).unwrap();
/// // If /tmp/Show/01/05.mp4 exists, returns /tmp/Show/01/05 (1).mp4
/// ```
pub fn get_unique_path(path: &Path, action: FileCollisionAction) -> Result<PathBuf> {
    match action {
        FileCollisionAction::Overwrite => Ok(path.to_path_buf()),
        FileCollisionAction::Skip => {
            if path.exists() {
                return Err(Error::AlreadyExists(path.to_path_buf()));
            }
            Ok(path.to_path_buf())
        }
        FileCollisionAction::Rename => {
            if !path.exists() {
                return Ok(path.to_path_buf());
            }

            let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(|| {
                Error::fs(
                    path,
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file stem"),
                )
            })?;
            let extension = path.extension().and_then(|e| e.to_str());
            let parent = path.parent().ok_or_else(|| {
                Error::fs(
                    path,
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent directory"),
                )
            })?;

            for i in 1..=MAX_RENAME_ATTEMPTS {
                let new_name = match extension {
                    Some(ext) => format!("{} ({}).{}", stem, i, ext),
                    None => format!("{} ({})", stem, i),
                };
                let new_path = parent.join(new_name);
                if !new_path.exists() {
                    return Ok(new_path);
                }
            }

            Err(Error::AlreadyExists(path.to_path_buf()))
        }
    }
}

/// Elapsed time as `Mm Ss`, the form used by the run summary
///
/// ```
/// use anime1_dl::utils::format_elapsed;
/// use std::time::Duration;
///
/// assert_eq!(format_elapsed(Duration::from_secs(125)), "2m 5s");
/// ```
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

/// Hidden sibling used while a file is being written next to its final name
///
/// `/d/Show/01/05.mp4` becomes `/d/Show/01/.05.mp4.partial`.
#[must_use]
pub fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.partial", name))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_removes_every_illegal_char() {
        assert_eq!(sanitize_filename(r#"a\b/c:d*e?f"g<h>i|j"#), "abcdefghij");
        assert_eq!(sanitize_filename("tab\there"), "tabhere");
        assert_eq!(sanitize_filename("進擊的巨人 第二季"), "進擊的巨人 第二季");
        assert_eq!(sanitize_filename("???"), "");
    }

    #[test]
    fn test_get_unique_path_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("05.mp4");

        for action in [
            FileCollisionAction::Rename,
            FileCollisionAction::Overwrite,
            FileCollisionAction::Skip,
        ] {
            assert_eq!(get_unique_path(&path, action).unwrap(), path);
        }
    }

    #[test]
    fn test_get_unique_path_rename_with_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("05.mp4");
        fs::write(&path, "original").unwrap();

        let unique = get_unique_path(&path, FileCollisionAction::Rename).unwrap();
        assert_eq!(unique, temp_dir.path().join("05 (1).mp4"));

        fs::write(&unique, "first rename").unwrap();
        let unique2 = get_unique_path(&path, FileCollisionAction::Rename).unwrap();
        assert_eq!(unique2, temp_dir.path().join("05 (2).mp4"));
    }

    #[test]
    fn test_get_unique_path_rename_without_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("episode");
        fs::write(&path, "original").unwrap();

        let unique = get_unique_path(&path, FileCollisionAction::Rename).unwrap();
        assert_eq!(unique, temp_dir.path().join("episode (1)"));
    }

    #[test]
    fn test_get_unique_path_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("05.mp4");
        fs::write(&path, "original").unwrap();

        let result = get_unique_path(&path, FileCollisionAction::Overwrite).unwrap();
        assert_eq!(result, path);
    }

    #[test]
    fn test_get_unique_path_skip_existing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("05.mp4");
        fs::write(&path, "original").unwrap();

        match get_unique_path(&path, FileCollisionAction::Skip) {
            Err(Error::AlreadyExists(p)) => assert_eq!(p, path),
            other => panic!("Expected AlreadyExists, got {other:?}"),
        }
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0m 0s");
        assert_eq!(format_elapsed(Duration::from_millis(59_900)), "0m 59s");
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "62m 5s");
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        assert_eq!(
            partial_path(Path::new("/d/Show/01/05.mp4")),
            PathBuf::from("/d/Show/01/.05.mp4.partial")
        );
    }
}
