//! Watch consumers.
//!
//! A [`ChangeHandler`] owns whatever state its rebuild needs (the bundle
//! session for scripts, the compiler for styles) and turns one
//! [`ChangeBatch`] into exactly one rebuild and one reload message.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tokio::task::JoinHandle;

use sluice_bundle::{BuildMode, BundleSession};
use sluice_pipeline::tasks::{script_session, style_compiler};
use sluice_pipeline::{CopyTask, PipelineConfig, PipelineError, StyleCompiler};

use crate::livereload::{LiveReloadHub, ReloadMessage};
use crate::server::ServerError;
use crate::watcher::{ChangeBatch, FileWatcher};

/// Path filter handed to the watcher thread.
pub type PathFilter = Box<dyn Fn(&Path) -> bool + Send>;

/// Rebuild triggered by changes to one path set.
pub trait ChangeHandler: Send + 'static {
    /// Task name used in logs.
    fn name(&self) -> &'static str;

    /// Directories to watch.
    fn watch_paths(&self) -> Vec<PathBuf>;

    /// Which changed paths belong to this handler.
    fn filter(&self) -> PathFilter;

    /// Directories outside [`watch_paths`](Self::watch_paths) found while
    /// handling. They are watched from then on.
    fn discovered_dirs(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Rebuild and return the message for browsers.
    fn handle(&mut self, batch: &ChangeBatch) -> Result<ReloadMessage, PipelineError>;
}

/// Run `handler` for one batch and broadcast the result.
///
/// Errors are logged and nothing is pushed. Returns whether a message was
/// sent.
pub fn dispatch<H: ChangeHandler + ?Sized>(
    handler: &mut H,
    batch: &ChangeBatch,
    hub: &LiveReloadHub,
) -> bool {
    tracing::debug!("{}: {} changed paths", handler.name(), batch.len());

    match handler.handle(batch) {
        Ok(msg) => {
            hub.send(msg);
            true
        }
        Err(e) => {
            tracing::error!("{} failed: {}", handler.name(), e);
            false
        }
    }
}

/// Start a watcher and its consumer task for `handler`.
pub fn spawn_watch<H: ChangeHandler>(
    mut handler: H,
    hub: LiveReloadHub,
) -> Result<JoinHandle<()>, ServerError> {
    let paths = handler.watch_paths();
    let (mut watcher, mut rx) = FileWatcher::new(&paths, handler.filter())
        .map_err(|e| ServerError::WatchError(format!("{}: {}", handler.name(), e)))?;

    for path in &paths {
        tracing::info!("{}: watching {}", handler.name(), path.display());
    }
    watch_discovered(&mut watcher, &handler);

    Ok(tokio::spawn(async move {
        // The watcher lives as long as the consumer runs.
        while let Some(batch) = rx.recv().await {
            dispatch(&mut handler, &batch, &hub);
            watch_discovered(&mut watcher, &handler);
        }
    }))
}

fn watch_discovered<H: ChangeHandler>(watcher: &mut FileWatcher, handler: &H) {
    for dir in handler.discovered_dirs() {
        match watcher.watch_dir(&dir) {
            Ok(true) => tracing::debug!("{}: watching {}", handler.name(), dir.display()),
            Ok(false) => {}
            Err(e) => tracing::warn!("{}: cannot watch {}: {}", handler.name(), dir.display(), e),
        }
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.contains(&e))
}

/// Recompiles the stylesheet and injects it without a page reload.
pub struct StyleRebuild {
    compiler: StyleCompiler,
    watch_dir: PathBuf,
    output: PathBuf,
    href: String,
    rebuilds: usize,
}

impl StyleRebuild {
    pub fn new(config: &PipelineConfig) -> Self {
        let href = format!(
            "/{}",
            config.styles.output.to_string_lossy().replace('\\', "/")
        );

        Self {
            compiler: style_compiler(config, BuildMode::Development),
            watch_dir: config.styles_dir(),
            output: config.dev_out_dir().join(&config.styles.output),
            href,
            rebuilds: 0,
        }
    }

    /// Number of successful rebuilds so far.
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }
}

impl ChangeHandler for StyleRebuild {
    fn name(&self) -> &'static str {
        "sass"
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        vec![self.watch_dir.clone()]
    }

    fn filter(&self) -> PathFilter {
        Box::new(|path| has_extension(path, &["scss"]))
    }

    fn handle(&mut self, _batch: &ChangeBatch) -> Result<ReloadMessage, PipelineError> {
        self.compiler.write(&self.output)?;
        self.rebuilds += 1;
        Ok(ReloadMessage::InjectCss {
            path: self.href.clone(),
        })
    }
}

/// Re-runs a copy task, then reloads.
pub struct CopyRerun {
    task: CopyTask,
    dest: PathBuf,
}

impl CopyRerun {
    pub fn new(task: CopyTask, dest: impl Into<PathBuf>) -> Self {
        Self {
            task,
            dest: dest.into(),
        }
    }

    /// `copy` into the development output.
    pub fn html(config: &PipelineConfig) -> Self {
        Self::new(CopyTask::html(config), config.dev_out_dir())
    }

    /// `copy:fonts` into the development output.
    pub fn fonts(config: &PipelineConfig) -> Self {
        Self::new(CopyTask::fonts(config), config.dev_out_dir())
    }
}

impl ChangeHandler for CopyRerun {
    fn name(&self) -> &'static str {
        self.task.name()
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        vec![self.task.source().to_path_buf()]
    }

    fn filter(&self) -> PathFilter {
        let task = self.task.clone();
        Box::new(move |path| task.matches(path))
    }

    fn handle(&mut self, _batch: &ChangeBatch) -> Result<ReloadMessage, PipelineError> {
        self.task.run(&self.dest)?;
        Ok(ReloadMessage::Reload)
    }
}

/// Incremental re-bundle over a long-lived [`BundleSession`].
///
/// Watches the whole source tree plus the directory of every bundled module
/// that lives outside it. A change counts when it hits a module of the last
/// build or a script file under the scripts directory (a module that may be
/// required next).
pub struct ScriptRebuild {
    session: BundleSession,
    src_dir: PathBuf,
    scripts_dir: PathBuf,
    output: PathBuf,
    /// Module set of the last build, shared with the watcher's filter
    modules: Arc<RwLock<HashSet<PathBuf>>>,
}

impl ScriptRebuild {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            session: script_session(config, BuildMode::Development),
            src_dir: config.src_dir(),
            scripts_dir: config.scripts_dir(),
            output: config.dev_out_dir().join(&config.scripts.output),
            modules: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn session(&self) -> &BundleSession {
        &self.session
    }

    fn track_modules(&self) {
        let paths: HashSet<PathBuf> = self
            .session
            .module_paths()
            .into_iter()
            .map(Path::to_path_buf)
            .collect();
        match self.modules.write() {
            Ok(mut modules) => *modules = paths,
            Err(e) => tracing::warn!("js: module set unavailable: {}", e),
        }
    }
}

impl ChangeHandler for ScriptRebuild {
    fn name(&self) -> &'static str {
        "js"
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        vec![self.src_dir.clone()]
    }

    fn filter(&self) -> PathFilter {
        let modules = Arc::clone(&self.modules);
        let scripts_dir = self.scripts_dir.clone();
        Box::new(move |path| {
            if !has_extension(path, &["js", "json"]) {
                return false;
            }
            path.starts_with(&scripts_dir)
                || modules
                    .read()
                    .map(|modules| modules.contains(path))
                    .unwrap_or(false)
        })
    }

    fn discovered_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for path in self.session.module_paths() {
            if let Some(dir) = path.parent() {
                if !dir.starts_with(&self.src_dir) && !dirs.iter().any(|d| d == dir) {
                    dirs.push(dir.to_path_buf());
                }
            }
        }
        dirs
    }

    fn handle(&mut self, batch: &ChangeBatch) -> Result<ReloadMessage, PipelineError> {
        for path in &batch.paths {
            self.session.invalidate(path);
        }
        let written = self.session.write(&self.output);
        self.track_modules();
        written?;
        Ok(ReloadMessage::Reload)
    }
}
