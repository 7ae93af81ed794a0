//! Configuration loading (`sluice.toml`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sluice_pipeline::PipelineConfig;

/// Load configuration from `path` if it exists.
///
/// Relative paths in the config resolve against the directory holding the
/// config file. A missing file yields the defaults; a malformed one is an
/// error.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let root = project_root(path)?;

    if !path.exists() {
        tracing::debug!("{} not found, using defaults", path.display());
        return Ok(PipelineConfig::default().with_root(root));
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: PipelineConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    tracing::info!("Loaded config from {}", path.display());
    Ok(config.with_root(root))
}

fn project_root(config_path: &Path) -> Result<PathBuf> {
    let dir = match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    fs::canonicalize(&dir).with_context(|| format!("Project directory {} not found", dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_uses_defaults() {
        let temp = tempdir().unwrap();

        let config = load_config(&temp.path().join("sluice.toml")).unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.root, fs::canonicalize(temp.path()).unwrap());
    }

    #[test]
    fn reads_overrides() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("sluice.toml");
        fs::write(&path, "[server]\nport = 8080\n\n[paths]\ndist = \"public\"\n").unwrap();

        let config = load_config(&path).unwrap();

        assert_eq!(config.server.port, 8080);
        assert!(config.dist_dir().ends_with("public"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("sluice.toml");
        fs::write(&path, "[server\nport = ").unwrap();

        assert!(load_config(&path).is_err());
    }
}
