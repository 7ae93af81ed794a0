//! Development commands: `default`, `serve` and `sass:watch`.

use anyhow::{anyhow, Context, Result};
use tokio::task::{JoinError, JoinSet};

use sluice_pipeline::PipelineConfig;
use sluice_server::handlers::{dispatch, spawn_watch};
use sluice_server::{
    ChangeBatch, ChangeHandler, CopyRerun, DevServer, DevServerConfig, LiveReloadHub,
    ScriptRebuild, StyleRebuild,
};

/// Watch consumers started by a dev command.
///
/// Consumers run until the process exits, so any exit is reported as an
/// error.
#[derive(Default)]
struct Watches {
    tasks: JoinSet<(&'static str, Result<(), JoinError>)>,
}

impl Watches {
    /// Build once, then watch and rebuild into `handler`'s output.
    ///
    /// The initial build goes through the same handler so long-lived state
    /// such as the bundle session is warm before the first change arrives.
    /// Build errors are logged; the watcher still starts.
    fn prime_and_watch<H: ChangeHandler>(&mut self, mut handler: H, hub: &LiveReloadHub) -> Result<()> {
        dispatch(&mut handler, &ChangeBatch::default(), hub);
        let name = handler.name();
        let task = spawn_watch(handler, hub.clone())?;
        self.tasks.spawn(async move { (name, task.await) });
        Ok(())
    }

    /// Wait for the first consumer to stop. Never resolves while none run.
    async fn stopped(&mut self) -> anyhow::Error {
        match self.tasks.join_next().await {
            Some(Ok((name, Ok(())))) => anyhow!("{} watcher stopped", name),
            Some(Ok((name, Err(e)))) => anyhow!("{} watcher failed: {}", name, e),
            Some(Err(e)) => anyhow!("Watch monitor failed: {}", e),
            None => std::future::pending().await,
        }
    }
}

/// Start style, font and HTML watchers plus the server. With `scripts`, also
/// watch and re-bundle scripts.
async fn serve_with(config: PipelineConfig, scripts: bool) -> Result<()> {
    let hub = LiveReloadHub::new();
    let mut watches = Watches::default();

    if scripts {
        watches.prime_and_watch(ScriptRebuild::new(&config), &hub)?;
    }
    watches.prime_and_watch(StyleRebuild::new(&config), &hub)?;
    watches.prime_and_watch(CopyRerun::html(&config), &hub)?;
    watches.prime_and_watch(CopyRerun::fonts(&config), &hub)?;

    let server_config = DevServerConfig::new(config.dev_out_dir(), &config.server);
    let server = DevServer::new(server_config, hub);

    tokio::select! {
        served = server.start() => served?,
        e = watches.stopped() => return Err(e),
    }

    Ok(())
}

/// `default`: scripts plus everything `serve` does.
pub async fn run_default(config: PipelineConfig) -> Result<()> {
    serve_with(config, true).await
}

/// `serve`: styles, HTML and fonts with live reload.
pub async fn run_serve(config: PipelineConfig) -> Result<()> {
    serve_with(config, false).await
}

/// `sass:watch`: rebuild styles on change, without a server.
pub async fn run_sass_watch(config: PipelineConfig) -> Result<()> {
    let hub = LiveReloadHub::new();
    let mut watches = Watches::default();
    watches.prime_and_watch(StyleRebuild::new(&config), &hub)?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => signal.context("Failed to listen for Ctrl-C")?,
        e = watches.stopped() => return Err(e),
    }
    tracing::info!("Stopped watching");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    use sluice_pipeline::PipelineError;
    use sluice_server::handlers::PathFilter;
    use sluice_server::ReloadMessage;
    use tempfile::tempdir;

    /// Succeeds on the initial build, panics on the first change.
    struct Crashing {
        dir: PathBuf,
    }

    impl ChangeHandler for Crashing {
        fn name(&self) -> &'static str {
            "crash"
        }

        fn watch_paths(&self) -> Vec<PathBuf> {
            vec![self.dir.clone()]
        }

        fn filter(&self) -> PathFilter {
            Box::new(|_| true)
        }

        fn handle(&mut self, batch: &ChangeBatch) -> Result<ReloadMessage, PipelineError> {
            if batch.is_empty() {
                return Ok(ReloadMessage::Reload);
            }
            panic!("rebuild crashed");
        }
    }

    #[tokio::test]
    async fn panicking_consumer_is_reported() {
        let temp = tempdir().unwrap();
        let hub = LiveReloadHub::new();
        let mut watches = Watches::default();
        watches
            .prime_and_watch(
                Crashing {
                    dir: temp.path().to_path_buf(),
                },
                &hub,
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        fs::write(temp.path().join("a.txt"), "change").unwrap();

        let err = tokio::time::timeout(Duration::from_secs(3), watches.stopped())
            .await
            .expect("timeout waiting for the consumer to stop");
        assert!(err.to_string().starts_with("crash watcher failed"));
    }

    #[tokio::test]
    async fn no_consumers_never_stop() {
        let mut watches = Watches::default();

        let waited = tokio::time::timeout(Duration::from_millis(50), watches.stopped()).await;

        assert!(waited.is_err());
    }
}
