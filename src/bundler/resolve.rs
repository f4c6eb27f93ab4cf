use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use oxc_resolver::{AliasValue, ResolveOptions};

use crate::error::BundleError;
use crate::loader::normalize_path;

/// Maps `require` specifiers to files.
///
/// Relative specifiers try the path as written, then `.js`, `.json` and a
/// directory `index.js`. Bare specifiers are looked up in the project's
/// `node_modules`, entering a package through its `browser` field, then
/// `main`, then `index.js`. Aliases rename a package before lookup.
pub(crate) struct Resolver {
    node_modules: Utf8PathBuf,
    inner: oxc_resolver::Resolver,
}

impl Resolver {
    pub(crate) fn new(node_modules: Utf8PathBuf, aliases: BTreeMap<String, String>) -> Self {
        let node_modules = normalize_path(&node_modules);

        let alias = aliases
            .into_iter()
            .map(|(name, target)| (name, vec![AliasValue::Path(target)]))
            .collect();

        let inner = oxc_resolver::Resolver::new(ResolveOptions {
            alias,
            extensions: vec![".js".into(), ".json".into()],
            main_fields: vec!["browser".into(), "main".into()],
            modules: vec![node_modules.to_string()],
            symlinks: false,
            ..ResolveOptions::default()
        });

        Self {
            node_modules,
            inner,
        }
    }

    pub(crate) fn is_package(&self, path: &Utf8Path) -> bool {
        path.starts_with(&self.node_modules)
    }

    /// Forgets every cached file lookup. Called before each graph update so
    /// moved or deleted files are seen.
    pub(crate) fn refresh(&self) {
        self.inner.clear_cache();
    }

    pub(crate) fn resolve(&self, from: &Utf8Path, specifier: &str) -> Result<Utf8PathBuf, BundleError> {
        let unresolved = || BundleError::Resolve {
            from: from.to_path_buf(),
            specifier: specifier.to_string(),
        };

        let dir = from.parent().unwrap_or(Utf8Path::new(""));
        let resolution = self.inner.resolve(dir, specifier).map_err(|err| {
            tracing::debug!("resolving {specifier} from {from}: {err}");
            unresolved()
        })?;

        let path = Utf8PathBuf::from_path_buf(resolution.into_path_buf()).map_err(|_| unresolved())?;
        Ok(normalize_path(&path))
    }
}
