//! Bundle sessions.
//!
//! A session owns the module graph of one entry point. Watch mode keeps the
//! session alive and calls [`BundleSession::bundle`] on every change; modules
//! whose files did not change are reused from the previous build.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Instant, SystemTime};

use crate::deps::extract_requires;
use crate::esm::EsModuleTransform;
use crate::minify::minify_js;
use crate::prelude::{json_module, pack, PackedModule};
use crate::resolve::{ResolveError, Resolver};
use crate::transform::{EnvTransform, Transform, TransformError};

/// Target environment of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Unminified, watched, debug paths retained
    #[default]
    Development,

    /// Minified, dead development code removed
    Production,
}

impl BuildMode {
    /// The value bundled code sees as `process.env.NODE_ENV`.
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Development => "development",
            BuildMode::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, BuildMode::Production)
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" | "dev" => Ok(BuildMode::Development),
            "production" | "prod" => Ok(BuildMode::Production),
            other => Err(format!("Unknown build mode: {}", other)),
        }
    }
}

/// Result of a bundle operation.
#[derive(Debug, Clone)]
pub struct Bundle {
    /// Browser-loadable script
    pub code: String,

    /// Number of modules packed
    pub modules: usize,

    /// Modules re-read from disk during this build
    pub rebuilt: usize,

    /// Total bundle time in milliseconds
    pub duration_ms: u64,
}

/// Errors that can occur while bundling.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("Failed to read {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Failed to parse {path}: {message}")]
    ParseError { path: String, message: String },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Transform '{name}' failed: {source}")]
    Transform {
        name: &'static str,
        source: TransformError,
    },

    #[error("Failed to minify bundle: {0}")]
    MinifyError(String),

    #[error("Failed to write output: {0}")]
    WriteError(String),
}

/// A module as of its last read.
#[derive(Debug, Clone)]
struct CachedModule {
    /// Modification time and length used to detect changes
    stamp: Option<(SystemTime, u64)>,

    /// Source after the transform chain
    source: String,

    /// Resolved dependencies in `require()` order
    deps: Vec<(String, PathBuf)>,
}

/// Long-lived bundling state for one entry point.
pub struct BundleSession {
    entry: PathBuf,
    mode: BuildMode,
    transforms: Vec<Box<dyn Transform>>,
    resolver: Resolver,
    modules: HashMap<PathBuf, CachedModule>,
}

impl BundleSession {
    /// Create a session with the default transform chain for `mode`: ES module
    /// lowering, then `NODE_ENV` inlining.
    pub fn new(entry: impl Into<PathBuf>, mode: BuildMode) -> Self {
        Self {
            entry: entry.into(),
            mode,
            transforms: vec![
                Box::new(EsModuleTransform::new()),
                Box::new(EnvTransform::for_mode(mode)),
            ],
            resolver: Resolver::new(),
            modules: HashMap::new(),
        }
    }

    /// Replace the transform chain.
    pub fn with_transforms(mut self, transforms: Vec<Box<dyn Transform>>) -> Self {
        self.transforms = transforms;
        self.modules.clear();
        self
    }

    pub fn entry(&self) -> &Path {
        &self.entry
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    /// Whether `path` was part of the last successful module walk.
    pub fn contains(&self, path: &Path) -> bool {
        self.modules.contains_key(path)
    }

    /// Number of cached modules.
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Paths of the cached modules, sorted.
    pub fn module_paths(&self) -> Vec<&Path> {
        let mut paths: Vec<&Path> = self.modules.keys().map(PathBuf::as_path).collect();
        paths.sort();
        paths
    }

    /// Drop a module from the cache so the next build re-reads it.
    pub fn invalidate(&mut self, path: &Path) {
        self.modules.remove(path);
    }

    /// Bundle the entry point.
    pub fn bundle(&mut self) -> Result<Bundle, BundleError> {
        let start = Instant::now();

        if !self.entry.is_file() {
            return Err(BundleError::ReadError {
                path: self.entry.display().to_string(),
                message: "entry point not found".to_string(),
            });
        }

        let mut order: Vec<PathBuf> = vec![self.entry.clone()];
        let mut ids: HashMap<PathBuf, usize> = HashMap::new();
        ids.insert(self.entry.clone(), 0);
        let mut rebuilt = 0;

        let mut next = 0;
        while next < order.len() {
            let path = order[next].clone();
            next += 1;

            if self.refresh(&path)? {
                rebuilt += 1;
            }

            if let Some(module) = self.modules.get(&path) {
                for (_, dep) in &module.deps {
                    if !ids.contains_key(dep) {
                        ids.insert(dep.clone(), order.len());
                        order.push(dep.clone());
                    }
                }
            }
        }

        let reachable: HashSet<&PathBuf> = order.iter().collect();
        self.modules.retain(|path, _| reachable.contains(path));

        let root = self.entry.parent().unwrap_or(Path::new(""));
        let packed: Vec<PackedModule> = order
            .iter()
            .enumerate()
            .filter_map(|(id, path)| {
                let module = self.modules.get(path)?;
                Some(PackedModule {
                    id,
                    label: module_label(root, path),
                    source: module.source.clone(),
                    deps: module
                        .deps
                        .iter()
                        .filter_map(|(spec, dep)| ids.get(dep).map(|&i| (spec.clone(), i)))
                        .collect(),
                })
            })
            .collect();

        let mut code = pack(&packed, 0);
        if self.mode.is_production() {
            code = minify_js(&code).map_err(BundleError::MinifyError)?;
        }

        let bundle = Bundle {
            code,
            modules: packed.len(),
            rebuilt,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        tracing::info!(
            "Bundled {} modules ({} rebuilt, {} bytes) in {}ms",
            bundle.modules,
            bundle.rebuilt,
            bundle.code.len(),
            bundle.duration_ms
        );

        Ok(bundle)
    }

    /// Bundle and write the result to `output`, creating parent directories.
    pub fn write(&mut self, output: &Path) -> Result<Bundle, BundleError> {
        let bundle = self.bundle()?;

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).map_err(|e| BundleError::WriteError(e.to_string()))?;
        }
        fs::write(output, &bundle.code)
            .map_err(|e| BundleError::WriteError(format!("{}: {}", output.display(), e)))?;

        Ok(bundle)
    }

    /// Make sure the cache holds a current copy of `path`.
    ///
    /// Returns true when the module had to be read again.
    fn refresh(&mut self, path: &Path) -> Result<bool, BundleError> {
        let stamp = fs::metadata(path)
            .ok()
            .and_then(|m| m.modified().ok().map(|t| (t, m.len())));

        if let Some(cached) = self.modules.get(path) {
            if stamp.is_some() && cached.stamp == stamp {
                return Ok(false);
            }
        }

        let module = self.load(path, stamp)?;
        self.modules.insert(path.to_path_buf(), module);
        Ok(true)
    }

    fn load(
        &self,
        path: &Path,
        stamp: Option<(SystemTime, u64)>,
    ) -> Result<CachedModule, BundleError> {
        tracing::debug!("Loading module {}", path.display());

        let raw = fs::read_to_string(path).map_err(|e| BundleError::ReadError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            return Ok(CachedModule {
                stamp,
                source: json_module(&raw),
                deps: Vec::new(),
            });
        }

        let mut source = raw;
        for transform in &self.transforms {
            source = transform
                .transform(path, &source)
                .map_err(|e| BundleError::Transform {
                    name: transform.name(),
                    source: e,
                })?;
        }

        let specifiers = extract_requires(&source).map_err(|message| BundleError::ParseError {
            path: path.display().to_string(),
            message,
        })?;

        let mut deps = Vec::with_capacity(specifiers.len());
        for spec in specifiers {
            let resolved = self.resolver.resolve(&spec, path)?;
            deps.push((spec, resolved));
        }

        Ok(CachedModule {
            stamp,
            source,
            deps,
        })
    }
}

/// Label a module by its path relative to the entry directory, or from its
/// `node_modules` folder onwards for packages.
fn module_label(root: &Path, path: &Path) -> String {
    if let Ok(relative) = path.strip_prefix(root) {
        return relative.display().to_string();
    }

    let display = path.display().to_string();
    match display.rfind("node_modules") {
        Some(pos) => display[pos..].to_string(),
        None => display,
    }
}
