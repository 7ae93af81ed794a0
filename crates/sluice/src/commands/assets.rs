//! One-shot development tasks: `js`, `sass`, `copy`, `copy:fonts`.

use anyhow::Result;
use sluice_bundle::BuildMode;
use sluice_pipeline::tasks::{build_scripts, build_styles, copy_fonts, copy_html};
use sluice_pipeline::PipelineConfig;

/// Bundle scripts into the development output.
pub fn js(config: &PipelineConfig) -> Result<()> {
    build_scripts(config, BuildMode::Development, &config.dev_out_dir())?;
    Ok(())
}

/// Compile the stylesheet into the development output.
pub fn sass(config: &PipelineConfig) -> Result<()> {
    let style = build_styles(config, BuildMode::Development, &config.dev_out_dir())?;
    tracing::info!("Compiled styles in {}ms", style.duration_ms);
    Ok(())
}

/// Copy HTML templates into the development output.
pub fn copy(config: &PipelineConfig) -> Result<()> {
    copy_html(config, &config.dev_out_dir())?;
    Ok(())
}

/// Copy fonts into the development output.
pub fn fonts(config: &PipelineConfig) -> Result<()> {
    copy_fonts(config, &config.dev_out_dir())?;
    Ok(())
}
