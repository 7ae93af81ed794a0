//! Static file copy tasks.

use std::fs;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::config::PipelineConfig;
use crate::error::PipelineError;

/// Result of a copy operation.
#[derive(Debug, Clone, Default)]
pub struct CopyResult {
    /// Files written
    pub files: usize,

    /// Bytes written
    pub bytes: u64,
}

/// Mirrors a set of source files into an output directory.
///
/// Files are matched under `source` and written at their path relative to
/// `base`, so `src/fonts/a.woff` with base `src` lands at `<out>/fonts/a.woff`.
#[derive(Debug, Clone)]
pub struct CopyTask {
    name: &'static str,
    source: PathBuf,
    base: PathBuf,
    recursive: bool,
    extension: Option<&'static str>,
    include_hidden: bool,
}

impl CopyTask {
    /// Create a task copying every file under `source` recursively.
    pub fn new(name: &'static str, source: impl Into<PathBuf>, base: impl Into<PathBuf>) -> Self {
        Self {
            name,
            source: source.into(),
            base: base.into(),
            recursive: true,
            extension: None,
            include_hidden: false,
        }
    }

    /// `html/*.html`, landing at the output root.
    pub fn html(config: &PipelineConfig) -> Self {
        let dir = config.html_dir();
        Self::new("copy", dir.clone(), dir)
            .shallow()
            .with_extension("html")
    }

    /// `fonts/**/*`, landing under `<out>/fonts`.
    pub fn fonts(config: &PipelineConfig) -> Self {
        Self::new("copy:fonts", config.fonts_dir(), config.src_dir())
    }

    /// `img/**/*`, landing under `<out>/img`.
    pub fn images(config: &PipelineConfig) -> Self {
        Self::new("copy:img", config.images_dir(), config.src_dir())
    }

    /// Only match files directly inside the source directory.
    pub fn shallow(mut self) -> Self {
        self.recursive = false;
        self
    }

    /// Only match files with this extension.
    pub fn with_extension(mut self, ext: &'static str) -> Self {
        self.extension = Some(ext);
        self
    }

    /// Also match dotfiles.
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Whether `path` belongs to this task's file set.
    pub fn matches(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.source) else {
            return false;
        };

        let depth = relative.components().count();
        if depth == 0 || (!self.recursive && depth > 1) {
            return false;
        }

        if !self.include_hidden && is_hidden(relative) {
            return false;
        }

        match self.extension {
            Some(ext) => path.extension().and_then(|e| e.to_str()) == Some(ext),
            None => true,
        }
    }

    /// List matching files. A missing source directory matches nothing.
    pub fn files(&self) -> Result<Vec<PathBuf>, PipelineError> {
        if !self.source.exists() {
            tracing::debug!(
                "{}: {} does not exist, nothing to copy",
                self.name,
                self.source.display()
            );
            return Ok(Vec::new());
        }

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.source)
            .follow_links(true)
            .max_depth(max_depth)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| PipelineError::read(&self.source, e))?;
            if entry.file_type().is_file() && self.matches(entry.path()) {
                files.push(entry.into_path());
            }
        }

        Ok(files)
    }

    /// Copy every matching file into `dest`.
    pub fn run(&self, dest: &Path) -> Result<CopyResult, PipelineError> {
        let mut result = CopyResult::default();

        for file in self.files()? {
            let relative = file.strip_prefix(&self.base).unwrap_or(&file);
            let target = dest.join(relative);

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| PipelineError::write(parent, e))?;
            }

            result.bytes += fs::copy(&file, &target).map_err(|e| PipelineError::write(&target, e))?;
            result.files += 1;
        }

        tracing::info!(
            "{}: copied {} files ({} bytes) to {}",
            self.name,
            result.files,
            result.bytes,
            dest.display()
        );

        Ok(result)
    }
}

fn is_hidden(relative: &Path) -> bool {
    relative.components().any(|c| match c {
        Component::Normal(name) => name.to_str().is_some_and(|n| n.starts_with('.')),
        _ => false,
    })
}
