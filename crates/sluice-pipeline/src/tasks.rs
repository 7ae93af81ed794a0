//! One-shot build tasks shared by the CLI, the dev server and the release
//! pipeline.

use std::path::Path;

use sluice_bundle::{BuildMode, Bundle, BundleSession, EnvTransform, EsModuleTransform, Transform};

use crate::config::PipelineConfig;
use crate::copy::{CopyResult, CopyTask};
use crate::error::PipelineError;
use crate::styles::{CompiledStyle, StyleCompiler};

/// A bundle session for the configured entry point.
///
/// The transform chain lowers ES modules to CommonJS, then inlines
/// `NODE_ENV` for `mode` plus every variable listed in `scripts.env`.
pub fn script_session(config: &PipelineConfig, mode: BuildMode) -> BundleSession {
    let env = EnvTransform::for_mode(mode).with_process_env(&config.scripts.env);
    let transforms: Vec<Box<dyn Transform>> =
        vec![Box::new(EsModuleTransform::new()), Box::new(env)];

    BundleSession::new(config.script_entry(), mode).with_transforms(transforms)
}

/// The style compiler for the configured entry point.
pub fn style_compiler(config: &PipelineConfig, mode: BuildMode) -> StyleCompiler {
    StyleCompiler::new(config.style_entry(), config.styles.browsers.clone(), mode)
}

/// Bundle scripts once into `out_dir`.
pub fn build_scripts(
    config: &PipelineConfig,
    mode: BuildMode,
    out_dir: &Path,
) -> Result<Bundle, PipelineError> {
    let output = out_dir.join(&config.scripts.output);
    let bundle = script_session(config, mode).write(&output)?;
    tracing::info!("Wrote {}", output.display());
    Ok(bundle)
}

/// Compile the stylesheet once into `out_dir`.
pub fn build_styles(
    config: &PipelineConfig,
    mode: BuildMode,
    out_dir: &Path,
) -> Result<CompiledStyle, PipelineError> {
    style_compiler(config, mode).write(&out_dir.join(&config.styles.output))
}

/// Copy HTML templates into `out_dir`.
pub fn copy_html(config: &PipelineConfig, out_dir: &Path) -> Result<CopyResult, PipelineError> {
    CopyTask::html(config).run(out_dir)
}

/// Copy fonts into `out_dir`.
pub fn copy_fonts(config: &PipelineConfig, out_dir: &Path) -> Result<CopyResult, PipelineError> {
    CopyTask::fonts(config).run(out_dir)
}
