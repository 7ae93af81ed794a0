//! Node-style module resolution for `require()` specifiers.

use std::fs;
use std::path::{Component, Path, PathBuf};

/// Extensions tried, in order, when a specifier has none that exists.
const EXTENSIONS: &[&str] = &["js", "json"];

/// Errors that can occur while resolving a specifier.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Cannot find module '{specifier}' from '{from}'")]
    NotFound { specifier: String, from: String },

    #[error("Invalid package.json in {path}: {message}")]
    InvalidPackage { path: String, message: String },
}

/// Resolves specifiers to files on disk.
#[derive(Debug, Clone, Default)]
pub struct Resolver;

impl Resolver {
    /// Create a new resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolve `specifier` as required from the file `from`.
    pub fn resolve(&self, specifier: &str, from: &Path) -> Result<PathBuf, ResolveError> {
        let base = from.parent().unwrap_or(Path::new("."));

        let found = if is_path_specifier(specifier) {
            let target = normalize(&base.join(specifier));
            match self.resolve_file(&target) {
                Some(found) => Some(found),
                None => self.resolve_directory(&target)?,
            }
        } else {
            self.resolve_package(specifier, base)?
        };

        found.ok_or_else(|| ResolveError::NotFound {
            specifier: specifier.to_string(),
            from: from.display().to_string(),
        })
    }

    /// Try the path as given, then with each known extension appended.
    fn resolve_file(&self, path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }

        EXTENSIONS.iter().find_map(|ext| {
            let mut candidate = path.as_os_str().to_owned();
            candidate.push(".");
            candidate.push(ext);
            let candidate = PathBuf::from(candidate);
            candidate.is_file().then_some(candidate)
        })
    }

    /// Resolve a directory through its package.json, then its index file.
    fn resolve_directory(&self, dir: &Path) -> Result<Option<PathBuf>, ResolveError> {
        if !dir.is_dir() {
            return Ok(None);
        }

        let manifest = dir.join("package.json");
        if manifest.is_file() {
            if let Some(main) = package_entry(&manifest)? {
                let target = normalize(&dir.join(main));
                if let Some(found) = self.resolve_file(&target) {
                    return Ok(Some(found));
                }
                if let Some(found) = self.resolve_index(&target) {
                    return Ok(Some(found));
                }
            }
        }

        Ok(self.resolve_index(dir))
    }

    fn resolve_index(&self, dir: &Path) -> Option<PathBuf> {
        self.resolve_file(&dir.join("index"))
    }

    /// Search `node_modules` folders from `base` upwards.
    fn resolve_package(&self, specifier: &str, base: &Path) -> Result<Option<PathBuf>, ResolveError> {
        for dir in base.ancestors() {
            let candidate = dir.join("node_modules").join(specifier);
            if let Some(found) = self.resolve_file(&candidate) {
                return Ok(Some(found));
            }
            if let Some(found) = self.resolve_directory(&candidate)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

fn is_path_specifier(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier == "."
        || specifier == ".."
        || Path::new(specifier).is_absolute()
}

/// Read the entry file named by a package.json (`browser` string, then `main`).
fn package_entry(manifest: &Path) -> Result<Option<String>, ResolveError> {
    let invalid = |message: String| ResolveError::InvalidPackage {
        path: manifest.display().to_string(),
        message,
    };

    let content = fs::read_to_string(manifest).map_err(|e| invalid(e.to_string()))?;
    let json: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;

    let entry = ["browser", "main"]
        .iter()
        .find_map(|key| json.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string);

    Ok(entry)
}

/// Lexically collapse `.` and `..` components so the same file always maps
/// to the same key in the module table.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn resolves_relative_with_extension() {
        let temp = tempdir().unwrap();
        let main = temp.path().join("main.js");
        write(&main, "");
        write(&temp.path().join("lib/util.js"), "");

        let found = Resolver::new().resolve("./lib/util", &main).unwrap();

        assert_eq!(found, temp.path().join("lib/util.js"));
    }

    #[test]
    fn resolves_parent_directory_index() {
        let temp = tempdir().unwrap();
        let nested = temp.path().join("a/b/c.js");
        write(&nested, "");
        write(&temp.path().join("a/shared/index.js"), "");

        let found = Resolver::new().resolve("../shared", &nested).unwrap();

        assert_eq!(found, temp.path().join("a/shared/index.js"));
    }

    #[test]
    fn resolves_json_modules() {
        let temp = tempdir().unwrap();
        let main = temp.path().join("main.js");
        write(&main, "");
        write(&temp.path().join("data.json"), "{}");

        let found = Resolver::new().resolve("./data", &main).unwrap();

        assert_eq!(found, temp.path().join("data.json"));
    }

    #[test]
    fn resolves_packages_through_main() {
        let temp = tempdir().unwrap();
        let main = temp.path().join("src/js/main.js");
        write(&main, "");
        write(
            &temp.path().join("node_modules/tiny/package.json"),
            r#"{"name":"tiny","main":"lib/tiny.js"}"#,
        );
        write(&temp.path().join("node_modules/tiny/lib/tiny.js"), "");

        let found = Resolver::new().resolve("tiny", &main).unwrap();

        assert_eq!(found, temp.path().join("node_modules/tiny/lib/tiny.js"));
    }

    #[test]
    fn prefers_browser_field() {
        let temp = tempdir().unwrap();
        let main = temp.path().join("main.js");
        write(&main, "");
        write(
            &temp.path().join("node_modules/dual/package.json"),
            r#"{"main":"node.js","browser":"browser.js"}"#,
        );
        write(&temp.path().join("node_modules/dual/node.js"), "");
        write(&temp.path().join("node_modules/dual/browser.js"), "");

        let found = Resolver::new().resolve("dual", &main).unwrap();

        assert_eq!(found, temp.path().join("node_modules/dual/browser.js"));
    }

    #[test]
    fn missing_module_names_specifier() {
        let temp = tempdir().unwrap();
        let main = temp.path().join("main.js");
        write(&main, "");

        let err = Resolver::new().resolve("./nope", &main).unwrap_err();

        assert!(err.to_string().contains("'./nope'"));
        assert!(err.to_string().contains("main.js"));
    }
}
