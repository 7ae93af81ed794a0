//! Rewriting asset references to revisioned file names.

use std::fs;
use std::path::Path;

use regex::{Captures, Regex};
use walkdir::WalkDir;

use crate::error::PipelineError;
use crate::revision::RevManifest;

/// Replaces manifest keys inside text documents.
pub struct ReferenceRewriter {
    manifest: RevManifest,
    pattern: Option<Regex>,
}

impl ReferenceRewriter {
    /// Build a rewriter for every entry in `manifest`.
    ///
    /// A key only matches when it is delimited the way an attribute value or
    /// `url()` argument would be, so `js/bundle.js` never matches inside
    /// `js/bundle.json`.
    pub fn new(manifest: RevManifest) -> Result<Self, PipelineError> {
        if manifest.is_empty() {
            return Ok(Self {
                manifest,
                pattern: None,
            });
        }

        let mut keys: Vec<&str> = manifest.originals().collect();
        keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
        let alternation = keys
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");

        let pattern = Regex::new(&format!(r#"(["'=(/\s])({})(["')?#>\s])"#, alternation))
            .map_err(|e| PipelineError::ManifestError(e.to_string()))?;

        Ok(Self {
            manifest,
            pattern: Some(pattern),
        })
    }

    /// Rewrite references in `text`. Returns `None` if nothing matched.
    pub fn rewrite(&self, text: &str) -> Option<String> {
        let pattern = self.pattern.as_ref()?;
        if !pattern.is_match(text) {
            return None;
        }

        let rewritten = pattern.replace_all(text, |caps: &Captures| {
            let hashed = self.manifest.get(&caps[2]).unwrap_or(&caps[2]);
            format!("{}{}{}", &caps[1], hashed, &caps[3])
        });

        Some(rewritten.into_owned())
    }

    /// Rewrite every file with one of `extensions` directly inside `dir`.
    ///
    /// Returns the number of files changed.
    pub fn rewrite_dir(&self, dir: &Path, extensions: &[&str]) -> Result<usize, PipelineError> {
        if self.pattern.is_none() || !dir.exists() {
            return Ok(0);
        }

        let mut changed = 0;
        for entry in WalkDir::new(dir).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| PipelineError::read(dir, e))?;
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !entry.file_type().is_file() || !extensions.contains(&ext) {
                continue;
            }

            let text = fs::read_to_string(path).map_err(|e| PipelineError::read(path, e))?;
            if let Some(rewritten) = self.rewrite(&text) {
                fs::write(path, rewritten).map_err(|e| PipelineError::write(path, e))?;
                tracing::info!("Rewrote asset references in {}", path.display());
                changed += 1;
            }
        }

        Ok(changed)
    }
}
