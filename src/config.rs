//! Project configuration.
//!
//! A [`Config`] is read once at startup, either from `kamado.json` in the
//! project root or from the built-in defaults, and is never mutated after
//! that. Every relative path in it is resolved against [`Config::root`].

use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Name of the config file looked up in the project root.
pub const CONFIG_FILE: &str = "kamado.json";

/// Source globs, source root and destination of one asset kind.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetPaths {
    /// Ordered glob patterns, relative to the project root.
    pub files: Vec<String>,
    /// Directory the relative output structure is computed from.
    pub src_dir: Utf8PathBuf,
    /// Destination directory.
    pub dest_dir: Utf8PathBuf,
}

impl AssetPaths {
    fn new(files: &[&str], src_dir: &str, dest_dir: &str) -> Self {
        Self {
            files: files.iter().map(|s| s.to_string()).collect(),
            src_dir: src_dir.into(),
            dest_dir: dest_dir.into(),
        }
    }
}

/// Which external tool performs syntax downleveling and minification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transformer {
    /// Call the `esbuild` binary found in `PATH`.
    #[default]
    Esbuild,
    /// Leave the code untouched.
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptOptions {
    /// Entry module of the bundle, relative to the project root.
    pub entry: Utf8PathBuf,
    /// Bare import names redirected to other packages.
    pub aliases: BTreeMap<String, String>,
    /// Directory holding third-party packages.
    pub node_modules: Utf8PathBuf,
    /// Language level the sources are lowered to.
    pub target: String,
    pub transformer: Transformer,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            entry: "js/app.js".into(),
            aliases: BTreeMap::from([("underscore".to_string(), "lodash".to_string())]),
            node_modules: "node_modules".into(),
            target: "es2015".into(),
            transformer: Transformer::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Port of the static file server.
    pub port: u16,
    /// Preferred port of the live reload socket.
    pub reload_port: u16,
    /// Debounce window for file system events, in milliseconds.
    pub debounce_ms: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: 14500,
            reload_port: 1337,
            debounce_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MarkupOptions {
    /// Prefix for root-absolute `href="/` and `src="/` references in
    /// production markup. Unset leaves references untouched.
    pub base_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project root. Filled in by the loader, never read from the file.
    #[serde(skip)]
    pub root: Utf8PathBuf,
    /// Output root, removed entirely by `clean`.
    pub dist: Utf8PathBuf,
    pub markup: AssetPaths,
    pub scripts: AssetPaths,
    pub templates: AssetPaths,
    pub styles: AssetPaths,
    pub images: AssetPaths,
    pub fonts: AssetPaths,
    pub script: ScriptOptions,
    pub server: ServerOptions,
    pub html: MarkupOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            dist: "dist".into(),
            markup: AssetPaths::new(&["index.html"], ".", "dist"),
            scripts: AssetPaths::new(&["js/**/*.js"], "js", "dist/js"),
            templates: AssetPaths::new(&["templates/**/*.html"], "templates", "dist/templates"),
            styles: AssetPaths::new(&["scss/**/*.scss"], "scss", "dist/css"),
            images: AssetPaths::new(&["images/**/*"], "images", "dist/images"),
            fonts: AssetPaths::new(&["fonts/**/*"], "fonts", "dist/fonts"),
            script: ScriptOptions::default(),
            server: ServerOptions::default(),
            html: MarkupOptions::default(),
        }
    }
}

impl Config {
    /// Default configuration rooted at `root`.
    pub fn with_root(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load `kamado.json` from `root`, falling back to defaults when the file
    /// does not exist.
    pub fn load(root: impl Into<Utf8PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        let path = root.join(CONFIG_FILE);

        if !path.exists() {
            tracing::debug!("no {CONFIG_FILE} found, using defaults");
            return Ok(Self::with_root(root));
        }

        Self::load_file(&path)
    }

    /// Load an explicit config file. Its parent directory becomes the root.
    pub fn load_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Config =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.root = match path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
            _ => Utf8PathBuf::from("."),
        };

        Ok(config)
    }

    /// Resolve a project-relative path.
    pub fn path(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(path)
    }

    /// Glob patterns of an asset kind, resolved against the root.
    pub fn patterns(&self, paths: &AssetPaths) -> Vec<String> {
        paths
            .files
            .iter()
            .map(|glob| self.root.join(glob).into_string())
            .collect()
    }
}
