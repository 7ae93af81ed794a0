//! Project configuration (`sluice.toml`).
//!
//! Every field has a default, so a project following the conventional layout
//! needs no config file at all.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PipelineConfig {
    /// Directory all relative paths are resolved against
    #[serde(skip)]
    pub root: PathBuf,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub scripts: ScriptsConfig,

    #[serde(default)]
    pub styles: StylesConfig,

    #[serde(default)]
    pub copy: CopyConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Source and output locations.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Source tree
    #[serde(default = "default_src")]
    pub src: PathBuf,

    /// Development scratch output
    #[serde(default = "default_dev_out")]
    pub dev_out: PathBuf,

    /// Release output, wiped on every release build
    #[serde(default = "default_dist")]
    pub dist: PathBuf,

    /// Revision manifest written by the release build
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
}

/// Script bundling options.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptsConfig {
    /// Entry point, relative to `paths.src`
    #[serde(default = "default_script_entry")]
    pub entry: PathBuf,

    /// Bundle location, relative to the output directory
    #[serde(default = "default_script_output")]
    pub output: PathBuf,

    /// Extra environment variables inlined as `process.env.NAME`
    #[serde(default)]
    pub env: Vec<String>,
}

/// Stylesheet options.
#[derive(Debug, Clone, Deserialize)]
pub struct StylesConfig {
    /// Entry point, relative to `paths.src`
    #[serde(default = "default_style_entry")]
    pub entry: PathBuf,

    /// Stylesheet location, relative to the output directory
    #[serde(default = "default_style_output")]
    pub output: PathBuf,

    /// Browserslist queries used for vendor prefixing
    #[serde(default = "default_browsers")]
    pub browsers: Vec<String>,
}

/// Static asset folders, relative to `paths.src`.
#[derive(Debug, Clone, Deserialize)]
pub struct CopyConfig {
    #[serde(default = "default_html")]
    pub html: PathBuf,

    #[serde(default = "default_fonts")]
    pub fonts: PathBuf,

    #[serde(default = "default_images")]
    pub images: PathBuf,
}

/// Development server options.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Open a browser tab on start
    #[serde(default)]
    pub open: bool,
}

fn default_src() -> PathBuf {
    PathBuf::from("src")
}
fn default_dev_out() -> PathBuf {
    PathBuf::from("tmp")
}
fn default_dist() -> PathBuf {
    PathBuf::from("dist")
}
fn default_manifest() -> PathBuf {
    PathBuf::from("rev-manifest.json")
}
fn default_script_entry() -> PathBuf {
    PathBuf::from("js/main.js")
}
fn default_script_output() -> PathBuf {
    PathBuf::from("js/bundle.js")
}
fn default_style_entry() -> PathBuf {
    PathBuf::from("scss/styles.scss")
}
fn default_style_output() -> PathBuf {
    PathBuf::from("css/styles.css")
}
fn default_browsers() -> Vec<String> {
    vec!["last 2 versions".to_string(), "IE 9".to_string()]
}
fn default_html() -> PathBuf {
    PathBuf::from("html")
}
fn default_fonts() -> PathBuf {
    PathBuf::from("fonts")
}
fn default_images() -> PathBuf {
    PathBuf::from("img")
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            src: default_src(),
            dev_out: default_dev_out(),
            dist: default_dist(),
            manifest: default_manifest(),
        }
    }
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            entry: default_script_entry(),
            output: default_script_output(),
            env: Vec::new(),
        }
    }
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            entry: default_style_entry(),
            output: default_style_output(),
            browsers: default_browsers(),
        }
    }
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            html: default_html(),
            fonts: default_fonts(),
            images: default_images(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            open: false,
        }
    }
}

impl PipelineConfig {
    /// Use `root` as the base for every relative path.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    pub fn src_dir(&self) -> PathBuf {
        self.resolve(&self.paths.src)
    }

    pub fn dev_out_dir(&self) -> PathBuf {
        self.resolve(&self.paths.dev_out)
    }

    pub fn dist_dir(&self) -> PathBuf {
        self.resolve(&self.paths.dist)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.resolve(&self.paths.manifest)
    }

    pub fn script_entry(&self) -> PathBuf {
        self.src_dir().join(&self.scripts.entry)
    }

    /// Directory whose changes trigger a re-bundle.
    pub fn scripts_dir(&self) -> PathBuf {
        let entry = self.script_entry();
        entry
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.src_dir())
    }

    pub fn style_entry(&self) -> PathBuf {
        self.src_dir().join(&self.styles.entry)
    }

    /// Directory holding the stylesheet entry and its partials.
    pub fn styles_dir(&self) -> PathBuf {
        let entry = self.style_entry();
        entry
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.src_dir())
    }

    pub fn html_dir(&self) -> PathBuf {
        self.src_dir().join(&self.copy.html)
    }

    pub fn fonts_dir(&self) -> PathBuf {
        self.src_dir().join(&self.copy.fonts)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.src_dir().join(&self.copy.images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_follow_conventional_layout() {
        let config = PipelineConfig::default().with_root("/project");

        assert_eq!(config.script_entry(), PathBuf::from("/project/src/js/main.js"));
        assert_eq!(
            config.style_entry(),
            PathBuf::from("/project/src/scss/styles.scss")
        );
        assert_eq!(config.styles_dir(), PathBuf::from("/project/src/scss"));
        assert_eq!(config.dev_out_dir(), PathBuf::from("/project/tmp"));
        assert_eq!(config.dist_dir(), PathBuf::from("/project/dist"));
        assert_eq!(
            config.manifest_path(),
            PathBuf::from("/project/rev-manifest.json")
        );
        assert_eq!(config.styles.browsers, vec!["last 2 versions", "IE 9"]);
        assert_eq!(config.server.port, 3000);
        assert!(!config.server.open);
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
[paths]
dist = "public"

[scripts]
entry = "app/index.js"
env = ["API_URL"]

[server]
port = 8080
"#,
        )
        .unwrap();

        assert_eq!(config.paths.dist, PathBuf::from("public"));
        assert_eq!(config.paths.src, PathBuf::from("src"));
        assert_eq!(config.scripts.entry, PathBuf::from("app/index.js"));
        assert_eq!(config.scripts.output, PathBuf::from("js/bundle.js"));
        assert_eq!(config.scripts.env, vec!["API_URL"]);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn rejects_unknown_types() {
        let result: Result<PipelineConfig, _> = toml::from_str("[server]\nport = \"high\"");
        assert!(result.is_err());
    }
}
