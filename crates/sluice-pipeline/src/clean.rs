//! Output cleanup.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::PipelineError;

/// Delete a directory recursively.
///
/// Returns whether anything was removed; a missing directory is not an error.
pub fn clean_dir(dir: &Path) -> Result<bool, PipelineError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            tracing::info!("Removed {}", dir.display());
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!("{} does not exist, nothing to clean", dir.display());
            Ok(false)
        }
        Err(e) => Err(PipelineError::remove(dir, e)),
    }
}

/// Delete individual files under `root`. Missing files are skipped.
///
/// Returns the number of files removed.
pub fn remove_files<I, P>(root: &Path, files: I) -> Result<usize, PipelineError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut removed = 0;

    for file in files {
        let path = root.join(file.as_ref());
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Removed {}", path.display());
                removed += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(PipelineError::remove(&path, e)),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn removes_directory_tree() {
        let temp = tempdir().unwrap();
        let dist = temp.path().join("dist");
        fs::create_dir_all(dist.join("css")).unwrap();
        fs::write(dist.join("css/styles.css"), "body{}").unwrap();

        assert!(clean_dir(&dist).unwrap());
        assert!(!dist.exists());
    }

    #[test]
    fn cleaning_missing_directory_succeeds() {
        let temp = tempdir().unwrap();
        let dist = temp.path().join("dist");

        assert!(!clean_dir(&dist).unwrap());
        assert!(!clean_dir(&dist).unwrap());
    }

    #[test]
    fn removes_listed_files_only() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("js")).unwrap();
        fs::write(temp.path().join("js/bundle.js"), "").unwrap();
        fs::write(temp.path().join("js/bundle-abc.js"), "").unwrap();

        let removed = remove_files(temp.path(), ["js/bundle.js", "js/missing.js"]).unwrap();

        assert_eq!(removed, 1);
        assert!(!temp.path().join("js/bundle.js").exists());
        assert!(temp.path().join("js/bundle-abc.js").exists());
    }
}
