//! Stylesheet pipeline: SCSS compilation, vendor prefixing and minification.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use parcel_sourcemap::SourceMap;
use sluice_bundle::BuildMode;

use crate::error::PipelineError;

/// Errors that can occur while building a stylesheet.
#[derive(Debug, thiserror::Error)]
pub enum StyleError {
    #[error("SCSS compile error: {0}")]
    CompileError(String),

    #[error("Invalid browser targets: {0}")]
    TargetsError(String),

    #[error("CSS parse error: {0}")]
    ParseError(String),

    #[error("CSS minify error: {0}")]
    MinifyError(String),

    #[error("Source map error: {0}")]
    SourceMapError(String),
}

/// Result of a stylesheet build.
#[derive(Debug, Clone)]
pub struct CompiledStyle {
    /// Final CSS, including an inline source map in development
    pub css: String,

    /// Total build time in milliseconds
    pub duration_ms: u64,
}

/// Compiles one SCSS entry point.
#[derive(Debug, Clone)]
pub struct StyleCompiler {
    entry: PathBuf,
    browsers: Vec<String>,
    mode: BuildMode,
}

impl StyleCompiler {
    /// Create a compiler for `entry`, prefixing for the given browserslist
    /// queries.
    pub fn new(entry: impl Into<PathBuf>, browsers: Vec<String>, mode: BuildMode) -> Self {
        Self {
            entry: entry.into(),
            browsers,
            mode,
        }
    }

    pub fn entry(&self) -> &Path {
        &self.entry
    }

    /// Compile the entry point to CSS.
    ///
    /// Output is always compressed; development builds append an inline
    /// source map.
    ///
    /// The map points back at the CSS grass produced (embedded as its only
    /// source, under the entry's file name), not at the `.scss` files: grass
    /// emits no source map to chain through.
    pub fn compile(&self) -> Result<CompiledStyle, StyleError> {
        let start = Instant::now();

        let css = self.compile_scss()?;
        let targets = self.targets()?;
        let filename = self
            .entry
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("styles.scss")
            .to_string();

        let mut stylesheet = StyleSheet::parse(
            &css,
            ParserOptions {
                filename: filename.clone(),
                ..ParserOptions::default()
            },
        )
        .map_err(|e| StyleError::ParseError(e.to_string()))?;

        stylesheet
            .minify(MinifyOptions {
                targets: targets.clone(),
                ..MinifyOptions::default()
            })
            .map_err(|e| StyleError::MinifyError(e.to_string()))?;

        let mut source_map = if self.mode.is_production() {
            None
        } else {
            let mut map = SourceMap::new("/");
            map.add_source(&filename);
            map.set_source_content(0, &css)
                .map_err(|e| StyleError::SourceMapError(e.to_string()))?;
            Some(map)
        };

        let printed = stylesheet
            .to_css(PrinterOptions {
                minify: true,
                targets,
                source_map: source_map.as_mut(),
                ..PrinterOptions::default()
            })
            .map_err(|e| StyleError::MinifyError(e.to_string()))?;

        let mut output = printed.code;
        if let Some(map) = source_map.as_mut() {
            let json = map
                .to_json(None)
                .map_err(|e| StyleError::SourceMapError(e.to_string()))?;
            output.push_str(&format!(
                "\n/*# sourceMappingURL=data:application/json;base64,{} */\n",
                STANDARD.encode(json)
            ));
        }

        Ok(CompiledStyle {
            css: output,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Compile and write to `output`, creating parent directories.
    pub fn write(&self, output: &Path) -> Result<CompiledStyle, PipelineError> {
        let compiled = self.compile()?;

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::write(parent, e))?;
        }
        fs::write(output, &compiled.css).map_err(|e| PipelineError::write(output, e))?;

        tracing::info!(
            "Compiled {} -> {} ({} bytes) in {}ms",
            self.entry.display(),
            output.display(),
            compiled.css.len(),
            compiled.duration_ms
        );

        Ok(compiled)
    }

    fn compile_scss(&self) -> Result<String, StyleError> {
        let mut options = grass::Options::default().style(grass::OutputStyle::Compressed);
        if let Some(dir) = self.entry.parent() {
            options = options.load_path(dir);
        }

        grass::from_path(&self.entry, &options).map_err(|e| StyleError::CompileError(e.to_string()))
    }

    fn targets(&self) -> Result<Targets, StyleError> {
        if self.browsers.is_empty() {
            return Ok(Targets::default());
        }

        let browsers = Browsers::from_browserslist(self.browsers.iter())
            .map_err(|e| StyleError::TargetsError(e.to_string()))?;

        Ok(browsers.map(Targets::from).unwrap_or_default())
    }
}
