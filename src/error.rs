use camino::Utf8PathBuf;
use thiserror::Error;

use crate::lint::LintReport;

/// Errors in the shape of the task graph or the loaded configuration. These
/// are fatal and reported before anything runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Task '{0}' is registered more than once")]
    DuplicateTask(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Task '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("Cycle detected in task graph involving task '{0}'")]
    Cycle(String),

    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't read config file '{path}'.\n{source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't parse config file '{path}'.\n{source}")]
    Parse {
        path: Utf8PathBuf,
        source: serde_json::Error,
    },
}

/// Errors returned by a single asset pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Lint(#[from] LintReport),

    #[error("Couldn't transform '{path}'.\n{message}")]
    Transform { path: Utf8PathBuf, message: String },

    #[error("I/O error at '{path}'.\n{source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<Utf8PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| PipelineError::Io { path, source }
    }
}

/// Errors returned by the script bundler.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("Cannot resolve '{specifier}' imported from '{from}'")]
    Resolve {
        from: Utf8PathBuf,
        specifier: String,
    },

    #[error("Couldn't transform '{path}'.\n{message}")]
    Transform { path: Utf8PathBuf, message: String },

    #[error("Couldn't parse '{path}'.\n{message}")]
    Parse { path: Utf8PathBuf, message: String },

    #[error("Invalid JSON module '{path}'.\n{source}")]
    Json {
        path: Utf8PathBuf,
        source: serde_json::Error,
    },

    #[error("I/O error at '{path}'.\n{source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

impl BundleError {
    pub(crate) fn io(path: impl Into<Utf8PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| BundleError::Io { path, source }
    }

    /// Whether the error comes from the sources themselves rather than the
    /// environment. Only these are tolerated by the development bundler.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, BundleError::Io { source, .. } if source.kind() != std::io::ErrorKind::NotFound)
    }
}

/// The first failure of a task chain.
#[derive(Debug, Error)]
#[error("Task '{task}':\n{error}")]
pub struct TaskError {
    pub task: String,
    pub error: anyhow::Error,
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error("Couldn't resolve watch path '{0}'")]
    Resolve(String),

    #[error("Couldn't bind the live reload socket.\n{0}")]
    Bind(std::io::Error),
}
