//! Release build.
//!
//! Runs the release [`TaskGraph`] against the `dist` directory: clean, copy
//! static files, build minified scripts and styles, revision them by content
//! hash, rewrite HTML references and delete the unrevisioned originals.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use sluice_bundle::BuildMode;

use crate::clean::{clean_dir, remove_files};
use crate::config::PipelineConfig;
use crate::copy::CopyTask;
use crate::error::PipelineError;
use crate::graph::{Stage, TaskGraph};
use crate::revision::{revision_assets, RevManifest};
use crate::rewrite::ReferenceRewriter;
use crate::tasks::{build_scripts, build_styles};

/// Result of a release build.
#[derive(Debug)]
pub struct ReleaseResult {
    /// Stages run, in completion order
    pub stages: Vec<Stage>,

    /// Manifest on disk after the build, if the revision stage ran
    pub manifest: Option<RevManifest>,

    /// Total build time in milliseconds
    pub duration_ms: u64,

    /// Output directory
    pub output_dir: PathBuf,
}

/// Release pipeline runner.
pub struct ReleaseBuilder {
    config: Arc<PipelineConfig>,
    graph: TaskGraph,
}

impl ReleaseBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
            graph: TaskGraph::release(),
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Run every release stage.
    pub async fn build(&self) -> Result<ReleaseResult, PipelineError> {
        self.run_target(None).await
    }

    /// Run `target` and the stages it depends on. `None` runs everything.
    ///
    /// Stage bodies run on the blocking pool, so `js:release` and
    /// `scss:release` build at the same time.
    pub async fn run_target(&self, target: Option<Stage>) -> Result<ReleaseResult, PipelineError> {
        let start = Instant::now();

        let config = Arc::clone(&self.config);
        let stages = self
            .graph
            .execute_blocking(target, move |stage| run_stage(&config, stage))
            .await?;

        let manifest_path = self.config.manifest_path();
        let manifest = if stages.contains(&Stage::Revision) {
            Some(RevManifest::load(&manifest_path)?)
        } else {
            None
        };

        Ok(ReleaseResult {
            stages,
            manifest,
            duration_ms: start.elapsed().as_millis() as u64,
            output_dir: self.config.dist_dir(),
        })
    }

    /// Run one stage on its own, without its dependencies.
    pub fn run_stage(&self, stage: Stage) -> Result<(), PipelineError> {
        run_stage(&self.config, stage)
    }
}

fn run_stage(config: &PipelineConfig, stage: Stage) -> Result<(), PipelineError> {
    let dist = config.dist_dir();

    match stage {
        Stage::Clean => {
            clean_dir(&dist)?;
        }
        Stage::CopyHtml => {
            CopyTask::html(config)
                .include_hidden(true)
                .run(&dist)?;
        }
        Stage::CopyFonts => {
            CopyTask::fonts(config).run(&dist)?;
        }
        Stage::CopyImages => {
            CopyTask::images(config).run(&dist)?;
        }
        Stage::Scripts => {
            build_scripts(config, BuildMode::Production, &dist)?;
        }
        Stage::Styles => {
            build_styles(config, BuildMode::Production, &dist)?;
        }
        Stage::Revision => {
            let dirs = revisioned_dirs(config);
            let dirs: Vec<(&str, &str)> =
                dirs.iter().map(|(d, e)| (d.as_str(), e.as_str())).collect();

            let manifest = revision_assets(&dist, &dirs)?;
            manifest.save(&config.manifest_path())?;
            tracing::info!(
                "Wrote {} ({} entries)",
                config.manifest_path().display(),
                manifest.len()
            );
        }
        Stage::RewriteRefs => {
            let manifest = RevManifest::load(&config.manifest_path())?;
            manifest.verify(&dist)?;
            let changed = ReferenceRewriter::new(manifest)?.rewrite_dir(&dist, &["html"])?;
            tracing::info!("Updated references in {} files", changed);
        }
        Stage::PostClean => {
            let manifest = RevManifest::load(&config.manifest_path())?;
            let removed = remove_files(&dist, manifest.originals())?;
            tracing::info!("Removed {} unrevisioned files", removed);
        }
    }

    Ok(())
}

/// `(directory, extension)` pairs of the script and style outputs.
fn revisioned_dirs(config: &PipelineConfig) -> Vec<(String, String)> {
    let mut dirs: Vec<(String, String)> = Vec::new();
    for output in [&config.styles.output, &config.scripts.output] {
        let pair = split_output(output);
        if !dirs.contains(&pair) {
            dirs.push(pair);
        }
    }
    dirs
}

fn split_output(output: &Path) -> (String, String) {
    let dir = output
        .parent()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    (dir, ext)
}
