use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use oxc_allocator::Allocator;
use oxc_ast::ast::{Argument, CallExpression, Expression};
use oxc_ast_visit::{Visit, walk};
use oxc_parser::Parser;
use oxc_span::SourceType;

use super::resolve::Resolver;
use crate::core::Hash32;
use crate::error::BundleError;
use crate::loader::{normalize_path, relative_to};
use crate::transform::Transform;

/// One compiled module.
#[derive(Debug, Clone)]
pub(crate) struct Module {
    /// Stable identifier: the path relative to the project root.
    pub(crate) id: String,
    /// Hash of the source the record was compiled from.
    pub(crate) hash: Hash32,
    /// Original source, embedded in the source map.
    pub(crate) source: String,
    /// Transformed code.
    pub(crate) code: String,
    /// Specifier as written → resolved file.
    pub(crate) deps: BTreeMap<String, Utf8PathBuf>,
}

/// Outcome of one graph update.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RebuildStats {
    /// Modules compiled from source in this update, by id.
    pub compiled: Vec<String>,
    /// Modules whose cached record was reused.
    pub reused: usize,
    /// Modules dropped because nothing imports them any more.
    pub pruned: Vec<String>,
}

/// Every module reachable from the entry, keyed by file path.
///
/// Records are reused across updates as long as the file's content hash is
/// unchanged, and dropped once the entry no longer reaches them. The imports
/// of a reused record are still resolved again, since the files they pointed
/// at may have moved.
#[derive(Debug, Default)]
pub(crate) struct ModuleGraph {
    modules: HashMap<Utf8PathBuf, Module>,
}

impl ModuleGraph {
    pub(crate) fn len(&self) -> usize {
        self.modules.len()
    }

    pub(crate) fn contains(&self, path: &Utf8Path) -> bool {
        self.modules.contains_key(path)
    }

    /// Modules ordered by id, the order they are linked in.
    pub(crate) fn ordered(&self) -> Vec<&Module> {
        let mut modules: Vec<_> = self.modules.values().collect();
        modules.sort_by(|a, b| a.id.cmp(&b.id));
        modules
    }

    pub(crate) fn id_of(&self, path: &Utf8Path) -> Option<&str> {
        self.modules.get(path).map(|m| m.id.as_str())
    }

    /// Brings the graph in line with the sources reachable from `entry`.
    ///
    /// On error the graph keeps every record compiled so far but nothing is
    /// pruned, so a later successful update can still reuse them.
    pub(crate) fn update(
        &mut self,
        root: &Utf8Path,
        entry: &Utf8Path,
        resolver: &Resolver,
        transform: &dyn Transform,
    ) -> Result<RebuildStats, BundleError> {
        let mut stats = RebuildStats::default();
        let mut reachable = HashSet::new();
        let mut stack = vec![normalize_path(entry)];
        resolver.refresh();

        while let Some(path) = stack.pop() {
            if !reachable.insert(path.clone()) {
                continue;
            }

            let bytes = fs::read(&path).map_err(BundleError::io(&path))?;
            let hash = Hash32::hash(&bytes);

            match self.modules.get_mut(&path) {
                Some(module) if module.hash == hash => {
                    let deps = resolve_deps(resolver, &path, module.deps.keys().cloned())?;
                    if deps != module.deps {
                        tracing::debug!("relinked {}", module.id);
                        module.deps = deps;
                    }
                    stats.reused += 1;
                }
                _ => {
                    let module = compile(root, &path, bytes, hash, resolver, transform)?;
                    tracing::debug!("compiled {}", module.id);
                    stats.compiled.push(module.id.clone());
                    self.modules.insert(path.clone(), module);
                }
            }

            // reverse so that the first import is visited first
            if let Some(module) = self.modules.get(&path) {
                stack.extend(module.deps.values().rev().cloned());
            }
        }

        let stale: Vec<Utf8PathBuf> = self
            .modules
            .keys()
            .filter(|path| !reachable.contains(*path))
            .cloned()
            .collect();

        for path in stale {
            if let Some(module) = self.modules.remove(&path) {
                tracing::debug!("pruned {}", module.id);
                stats.pruned.push(module.id);
            }
        }

        stats.compiled.sort();
        stats.pruned.sort();
        Ok(stats)
    }
}

fn compile(
    root: &Utf8Path,
    path: &Utf8Path,
    bytes: Vec<u8>,
    hash: Hash32,
    resolver: &Resolver,
    transform: &dyn Transform,
) -> Result<Module, BundleError> {
    let source = String::from_utf8(bytes).map_err(|err| BundleError::Transform {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    let code = if path.extension() == Some("json") {
        let value: serde_json::Value =
            serde_json::from_str(&source).map_err(|source| BundleError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        format!("module.exports = {value};")
    } else if resolver.is_package(path) {
        source.clone()
    } else {
        transform
            .downlevel(path, &source)
            .map_err(|err| BundleError::Transform {
                path: path.to_path_buf(),
                message: format!("{err:#}"),
            })?
    };

    let deps = resolve_deps(resolver, path, scan_requires(path, &code)?)?;

    Ok(Module {
        id: relative_to(path, root).as_str().replace('\\', "/"),
        hash,
        source,
        code,
        deps,
    })
}

fn resolve_deps(
    resolver: &Resolver,
    from: &Utf8Path,
    specifiers: impl IntoIterator<Item = String>,
) -> Result<BTreeMap<String, Utf8PathBuf>, BundleError> {
    specifiers
        .into_iter()
        .map(|specifier| {
            let resolved = resolver.resolve(from, &specifier)?;
            Ok((specifier, resolved))
        })
        .collect()
}

/// Specifiers of every `require` call whose only argument is a string
/// literal, in source order without duplicates.
pub(crate) fn scan_requires(path: &Utf8Path, code: &str) -> Result<Vec<String>, BundleError> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, code, SourceType::cjs()).parse();

    if let Some(err) = parsed.errors.first() {
        return Err(BundleError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        });
    }

    let mut requires = Requires::default();
    walk::walk_program(&mut requires, &parsed.program);
    Ok(requires.found)
}

#[derive(Default)]
struct Requires {
    found: Vec<String>,
}

impl<'a> Visit<'a> for Requires {
    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if let Expression::Identifier(callee) = &call.callee
            && callee.name.as_str() == "require"
            && call.arguments.len() == 1
            && let Some(Argument::StringLiteral(literal)) = call.arguments.first()
        {
            let specifier = literal.value.as_str();
            if !self.found.iter().any(|s| s == specifier) {
                self.found.push(specifier.to_string());
            }
        }

        walk::walk_call_expression(self, call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(code: &str) -> Vec<String> {
        scan_requires(Utf8Path::new("js/app.js"), code).unwrap()
    }

    #[test]
    fn test_scan_requires() {
        let code = r#"
const Backbone = require('backbone');
const $ = require("jquery");
// const old = require('./old');
/* require('./also-old') */
const Todos = require( './collections/todos' );
require('todomvc-common/base');
const again = require('jquery');
"#;

        assert_eq!(
            scan(code),
            ["backbone", "jquery", "./collections/todos", "todomvc-common/base"]
        );
    }

    #[test]
    fn test_require_in_string_or_trailing_comment() {
        let code = "var msg = \"call require('./plugin') to extend\";\nvar x = 1; // require('./old')\nvar tpl = `require('./tpl')`;\n";

        assert!(scan(code).is_empty());
    }

    #[test]
    fn test_nested_require() {
        let code = "module.exports = function () { return { view: require('./view') }; };\n";

        assert_eq!(scan(code), ["./view"]);
    }

    #[test]
    fn test_dynamic_require_is_ignored() {
        assert!(scan("const x = require(name);").is_empty());
        assert!(scan("const y = require('./a' + name);").is_empty());
    }

    #[test]
    fn test_syntax_error() {
        let err = scan_requires(Utf8Path::new("js/app.js"), "var = ;").unwrap_err();

        match err {
            BundleError::Parse { path, .. } => assert_eq!(path, "js/app.js"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
