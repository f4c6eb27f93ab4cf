//! Asset pipelines.
//!
//! Each pipeline reads the files matched by one asset kind, applies a single
//! transform and writes the results to the kind's destination directory.
//! All outputs are computed before the first write, so a failing file leaves
//! the destination as it was.

pub mod markup;
pub mod statics;
pub mod styles;
pub mod templates;

use std::collections::HashSet;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use glob::glob;

use crate::core::Environment;
use crate::error::PipelineError;

pub use markup::Markup;
pub use statics::{StaticKind, Statics};
pub use styles::Styles;
pub use templates::Templates;

/// One fixed transform from a source glob to a destination directory.
pub trait AssetPipeline: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the written files.
    fn run(&self, env: &Environment) -> Result<Vec<Utf8PathBuf>, PipelineError>;
}

/// Expands glob patterns into the matched files, in pattern order, without
/// duplicates and without directories.
pub(crate) fn expand(patterns: &[String]) -> Result<Vec<Utf8PathBuf>, PipelineError> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();

    for pattern in patterns {
        for path in glob(pattern)? {
            let path = Utf8PathBuf::try_from(path?)?;
            if path.is_file() && seen.insert(path.clone()) {
                paths.push(path);
            }
        }
    }

    Ok(paths)
}

/// Path of `path` relative to `base`, used to mirror the source structure in
/// the destination. Falls back to the file name for paths outside `base`.
pub(crate) fn relative_to(path: &Utf8Path, base: &Utf8Path) -> Utf8PathBuf {
    let path = normalize_path(path);
    let base = normalize_path(base);

    match path.strip_prefix(&base) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => Utf8PathBuf::from(path.file_name().unwrap_or_default()),
    }
}

/// Normalize a path, removing things like `.` and `..`.
///
/// CAUTION: This does not resolve symlinks (unlike [`std::fs::canonicalize`]).
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => unreachable!(),
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}
