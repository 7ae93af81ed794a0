//! Content-hash revisioning of built assets.
//!
//! Every revisioned file is copied to `<stem>-<hash>.<ext>` next to the
//! original, and the mapping is recorded in a [`RevManifest`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::PipelineError;

/// Number of hex digits of the content hash kept in file names.
const HASH_LEN: usize = 10;

/// Original asset path -> revisioned asset path, both relative to the output
/// directory and `/`-separated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevManifest {
    entries: BTreeMap<String, String>,
}

impl RevManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, original: impl Into<String>, hashed: impl Into<String>) {
        self.entries.insert(original.into(), hashed.into());
    }

    pub fn get(&self, original: &str) -> Option<&str> {
        self.entries.get(original).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Original paths, for post-build cleanup.
    pub fn originals(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Read a manifest written by [`RevManifest::save`].
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path).map_err(|e| PipelineError::read(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| PipelineError::ManifestError(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::ManifestError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| PipelineError::write(parent, e))?;
            }
        }
        fs::write(path, json + "\n").map_err(|e| PipelineError::write(path, e))
    }

    /// Check that every revisioned file exists under `root`.
    pub fn verify(&self, root: &Path) -> Result<(), PipelineError> {
        for (original, hashed) in self.iter() {
            if !root.join(hashed).is_file() {
                return Err(PipelineError::ManifestError(format!(
                    "{} -> {} is missing from {}",
                    original,
                    hashed,
                    root.display()
                )));
            }
        }
        Ok(())
    }
}

/// Short hex content hash.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(bytes));
    digest[..HASH_LEN].to_string()
}

/// `css/styles.css` + `abc` -> `css/styles-abc.css`.
pub fn revisioned_path(relative: &str, hash: &str) -> String {
    let (dir, file) = match relative.rfind('/') {
        Some(pos) => (&relative[..=pos], &relative[pos + 1..]),
        None => ("", relative),
    };

    match file.rfind('.') {
        Some(dot) if dot > 0 => format!("{}{}-{}{}", dir, &file[..dot], hash, &file[dot..]),
        _ => format!("{}{}-{}", dir, file, hash),
    }
}

/// Revision every file with one of `extensions` directly inside each of
/// `dirs` (relative to `root`).
pub fn revision_assets(
    root: &Path,
    dirs: &[(&str, &str)],
) -> Result<RevManifest, PipelineError> {
    let mut manifest = RevManifest::new();

    for (dir, ext) in dirs {
        for file in list_files(&root.join(dir), ext)? {
            let relative = to_manifest_key(root, &file);
            let bytes = fs::read(&file).map_err(|e| PipelineError::read(&file, e))?;
            let hashed = revisioned_path(&relative, &content_hash(&bytes));
            let target = root.join(&hashed);

            fs::write(&target, &bytes).map_err(|e| PipelineError::write(&target, e))?;
            tracing::info!("Revisioned {} -> {}", relative, hashed);

            manifest.insert(relative, hashed);
        }
    }

    Ok(manifest)
}

fn list_files(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, PipelineError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| PipelineError::read(dir, e))?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().and_then(|e| e.to_str()) == Some(ext) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn to_manifest_key(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn builds_revisioned_paths() {
        assert_eq!(
            revisioned_path("css/styles.css", "0123456789"),
            "css/styles-0123456789.css"
        );
        assert_eq!(revisioned_path("bundle.min.js", "ab"), "bundle.min-ab.js");
        assert_eq!(revisioned_path("LICENSE", "ab"), "LICENSE-ab");
    }

    #[test]
    fn hash_depends_only_on_content() {
        let a = content_hash(b"body{color:red}");
        assert_eq!(a.len(), 10);
        assert_eq!(a, content_hash(b"body{color:red}"));
        assert_ne!(a, content_hash(b"body{color:blue}"));
    }

    #[test]
    fn revisions_css_and_js() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("css")).unwrap();
        fs::create_dir_all(temp.path().join("js")).unwrap();
        fs::write(temp.path().join("css/styles.css"), "body{color:red}").unwrap();
        fs::write(temp.path().join("js/bundle.js"), "console.log(1)").unwrap();
        fs::write(temp.path().join("js/bundle.js.map"), "{}").unwrap();

        let manifest = revision_assets(temp.path(), &[("css", "css"), ("js", "js")]).unwrap();

        assert_eq!(manifest.len(), 2);
        let css = manifest.get("css/styles.css").unwrap();
        assert!(css.starts_with("css/styles-"));
        assert!(temp.path().join(css).exists());
        assert!(temp.path().join("css/styles.css").exists());
        manifest.verify(temp.path()).unwrap();
    }

    #[test]
    fn manifest_round_trips_through_disk() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("rev-manifest.json");
        let mut manifest = RevManifest::new();
        manifest.insert("js/bundle.js", "js/bundle-0a1b2c3d4e.js");

        manifest.save(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();

        assert!(content.contains(r#""js/bundle.js": "js/bundle-0a1b2c3d4e.js""#));
        assert_eq!(RevManifest::load(&path).unwrap(), manifest);
    }

    #[test]
    fn verify_reports_missing_files() {
        let temp = tempdir().unwrap();
        let mut manifest = RevManifest::new();
        manifest.insert("css/styles.css", "css/styles-0000000000.css");

        assert!(manifest.verify(temp.path()).is_err());
    }
}
