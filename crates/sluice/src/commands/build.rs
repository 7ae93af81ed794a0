//! Release build commands: `build`, `run <task>` and `tasks`.

use anyhow::{Context, Result};
use sluice_pipeline::{PipelineConfig, ReleaseBuilder, Stage, TaskGraph};

/// Run the whole release graph.
pub async fn run(config: PipelineConfig) -> Result<()> {
    run_target(config, None).await
}

/// Run one named release stage and its ancestors.
pub async fn run_task(config: PipelineConfig, task: &str) -> Result<()> {
    let stage: Stage = task.parse().with_context(|| {
        let known: Vec<&str> = Stage::ALL.iter().map(|s| s.name()).collect();
        format!("Known tasks: {}", known.join(", "))
    })?;

    run_target(config, Some(stage)).await
}

async fn run_target(config: PipelineConfig, target: Option<Stage>) -> Result<()> {
    tracing::info!("Building release...");

    let result = ReleaseBuilder::new(config).run_target(target).await?;

    if let Some(manifest) = &result.manifest {
        for (original, hashed) in manifest.iter() {
            tracing::info!("{} -> {}", original, hashed);
        }
    }

    tracing::info!(
        "Ran {} tasks in {}ms",
        result.stages.len(),
        result.duration_ms
    );
    tracing::info!("Output: {}", result.output_dir.display());

    Ok(())
}

/// Print the release graph in execution order.
pub fn list() -> Result<()> {
    let graph = TaskGraph::release();

    for stage in graph.order()? {
        let deps: Vec<&str> = graph.predecessors(stage).iter().map(|s| s.name()).collect();
        if deps.is_empty() {
            println!("{}", stage);
        } else {
            println!("{} <- {}", stage, deps.join(", "));
        }
    }

    Ok(())
}
