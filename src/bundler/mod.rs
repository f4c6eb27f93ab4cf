//! CommonJS script bundler.
//!
//! Starting from the entry script, every `require` is resolved and the
//! reachable modules are linked into a single self-executing script. The
//! production bundle is built from scratch and minified. The development
//! bundle is kept up to date by an [`IncrementalBundler`], which only
//! recompiles modules whose content changed and writes an external source
//! map next to the bundle.

mod graph;
mod link;
mod resolve;

use std::sync::Arc;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::{Environment, Profile};
use crate::error::{BundleError, PipelineError};
use crate::loader::{expand, normalize_path, relative_to};
use crate::output::{Output, save_outputs};
use crate::transform::{self, Transform};
use crate::utils::as_overhead;

pub use graph::RebuildStats;
use graph::ModuleGraph;
use resolve::Resolver;

/// A linked script, with its source map when one was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub code: String,
    pub map: Option<String>,
}

/// Everything needed to walk the module graph of one project.
struct Context {
    root: Utf8PathBuf,
    entry: Utf8PathBuf,
    resolver: Resolver,
    transform: Arc<dyn Transform>,
}

impl Context {
    fn new(env: &Environment) -> Self {
        let config = &env.config;
        // absolute, so module paths compare equal to watcher events
        let root = config
            .root
            .canonicalize_utf8()
            .unwrap_or_else(|_| config.root.clone());

        Self {
            root: normalize_path(&root),
            entry: normalize_path(&root.join(&config.script.entry)),
            resolver: Resolver::new(
                root.join(&config.script.node_modules),
                config.script.aliases.clone(),
            ),
            transform: transform::from_options(&config.script),
        }
    }

    fn update(&self, graph: &mut ModuleGraph) -> Result<RebuildStats, BundleError> {
        graph.update(&self.root, &self.entry, &self.resolver, self.transform.as_ref())
    }

    fn link(&self, graph: &ModuleGraph, file: &str) -> (String, oxc_sourcemap::SourceMap) {
        let entry = relative_to(&self.entry, &self.root)
            .as_str()
            .replace('\\', "/");
        link::link(graph, &entry, file)
    }
}

/// Builds the production bundle from scratch: resolve, transform, link and
/// minify. Identical sources always give an identical bundle.
pub fn build_full(env: &Environment) -> Result<Bundle, BundleError> {
    let ctx = Context::new(env);
    let mut graph = ModuleGraph::default();
    ctx.update(&mut graph)?;

    let name = Profile::Production.bundle_name();
    let (code, _) = ctx.link(&graph, name);
    let code = ctx
        .transform
        .minify(&code)
        .map_err(|err| BundleError::Transform {
            path: name.into(),
            message: format!("{err:#}"),
        })?;

    Ok(Bundle { code, map: None })
}

/// Keeps the development bundle in step with the sources.
///
/// The module graph survives between rebuilds. When a rebuild fails the
/// graph is left unpruned and [`IncrementalBundler::last_good`] still returns
/// the previous bundle.
pub struct IncrementalBundler {
    ctx: Context,
    graph: ModuleGraph,
    last_good: Option<Bundle>,
}

impl IncrementalBundler {
    pub fn new(env: &Environment) -> Self {
        Self {
            ctx: Context::new(env),
            graph: ModuleGraph::default(),
            last_good: None,
        }
    }

    /// Rebuilds the development bundle, recompiling only changed modules.
    pub fn build_incremental(&mut self) -> Result<(&Bundle, RebuildStats), BundleError> {
        let stats = self.ctx.update(&mut self.graph)?;

        let name = Profile::Development.bundle_name();
        let (mut code, map) = self.ctx.link(&self.graph, name);
        code.push_str(&format!("//# sourceMappingURL={name}.map\n"));

        let bundle = self.last_good.insert(Bundle {
            code,
            map: Some(map.to_json_string()),
        });

        Ok((bundle, stats))
    }

    pub fn last_good(&self) -> Option<&Bundle> {
        self.last_good.as_ref()
    }

    /// Number of modules currently held in the graph.
    pub fn module_count(&self) -> usize {
        self.graph.len()
    }

    /// Whether `path` is part of the current module graph.
    pub fn contains(&self, path: &Utf8Path) -> bool {
        self.graph.contains(&normalize_path(path))
    }
}

/// Writes `bundle` to the script destination under the profile's name, and
/// its source map next to it.
pub fn write_bundle(
    env: &Environment,
    profile: Profile,
    bundle: &Bundle,
) -> Result<Vec<Utf8PathBuf>, PipelineError> {
    let config = &env.config;
    let name = profile.bundle_name();

    let mut outputs = vec![Output::text(name, bundle.code.clone())];
    if let Some(map) = &bundle.map {
        outputs.push(Output::text(format!("{name}.map"), map.clone()));
    }

    save_outputs(&config.path(&config.scripts.dest_dir), &outputs)
}

/// Runs the incremental bundler once and writes the result.
///
/// Errors caused by the sources are logged and leave the previous bundle in
/// place. Other I/O failures are returned.
pub fn rebuild_dev(
    env: &Environment,
    bundler: &mut IncrementalBundler,
) -> Result<Option<RebuildStats>, PipelineError> {
    let s = Instant::now();

    match bundler.build_incremental() {
        Ok((bundle, stats)) => {
            write_bundle(env, Profile::Development, bundle)?;
            tracing::info!(
                "bundled {} module(s), {} compiled, {} reused, {} pruned {}",
                bundler.module_count(),
                stats.compiled.len(),
                stats.reused,
                stats.pruned.len(),
                as_overhead(s)
            );
            Ok(Some(stats))
        }
        Err(err) if err.is_recoverable() => {
            tracing::error!("{err}");
            if bundler.last_good().is_some() {
                tracing::warn!("keeping the previous script bundle");
            }
            Ok(None)
        }
        Err(BundleError::Io { path, source }) => Err(PipelineError::Io { path, source }),
        Err(err) => Err(PipelineError::Transform {
            path: Profile::Development.bundle_name().into(),
            message: err.to_string(),
        }),
    }
}

/// Builds, minifies and writes the production bundle.
pub fn release(env: &Environment) -> Result<Vec<Utf8PathBuf>, PipelineError> {
    let s = Instant::now();
    let bundle = build_full(env).map_err(|err| match err {
        BundleError::Io { path, source } => PipelineError::Io { path, source },
        err => PipelineError::Transform {
            path: Profile::Production.bundle_name().into(),
            message: err.to_string(),
        },
    })?;

    let written = write_bundle(env, Profile::Production, &bundle)?;
    tracing::info!("bundled scripts for production {}", as_overhead(s));

    Ok(written)
}

/// Script files matched by the script globs, for linting.
pub fn sources(env: &Environment) -> Result<Vec<Utf8PathBuf>, PipelineError> {
    let config = &env.config;
    expand(&config.patterns(&config.scripts))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::loader::testing::Project;

    fn todo_app() -> Project {
        let project = Project::new();
        project
            .write(
                "js/app.js",
                "var $ = require('jquery');\nvar _ = require('underscore');\nvar AppView = require('./views/app');\nnew AppView($, _);\n",
            )
            .write(
                "js/views/app.js",
                "var Todos = require('../collections/todos');\nmodule.exports = function AppView() { return Todos; };\n",
            )
            .write(
                "js/collections/todos.js",
                "var defaults = require('../defaults.json');\nmodule.exports = [defaults];\n",
            )
            .write("js/defaults.json", r#"{ "title": "", "completed": false }"#)
            .write("node_modules/jquery/package.json", r#"{ "main": "dist/jquery.js" }"#)
            .write("node_modules/jquery/dist/jquery.js", "module.exports = 'jquery';\n")
            .write("node_modules/lodash/index.js", "module.exports = 'lodash';\n");
        project
    }

    fn unannotated(bundle: &Bundle) -> &str {
        bundle
            .code
            .strip_suffix("//# sourceMappingURL=build.js.map\n")
            .unwrap()
    }

    #[test]
    fn test_full_build_is_deterministic() {
        let project = todo_app();

        let a = build_full(&project.env()).unwrap();
        let b = build_full(&project.env()).unwrap();

        assert_eq!(a, b);
        assert!(a.map.is_none());
        assert!(a.code.contains(r#""js/app.js": [function (require, module, exports, global) {"#));
        assert!(a.code.contains(r#""underscore":"node_modules/lodash/index.js"}"#));
        assert!(a.code.contains(r#"module.exports = {"#));
        assert!(a.code.contains(r#""completed":false"#));
        assert!(a.code.ends_with("}, \"js/app.js\", typeof window !== \"undefined\" ? window : this);\n"));
    }

    #[test]
    fn test_modules_are_linked_in_id_order() {
        let project = todo_app();
        let code = build_full(&project.env()).unwrap().code;

        let ids = [
            "\"js/app.js\"",
            "\"js/collections/todos.js\"",
            "\"js/defaults.json\"",
            "\"js/views/app.js\"",
            "\"node_modules/jquery/dist/jquery.js\"",
            "\"node_modules/lodash/index.js\"",
        ];
        let positions: Vec<_> = ids
            .iter()
            .map(|id| code.find(&format!("{id}: [function")).unwrap())
            .collect();

        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_incremental_matches_full() {
        let project = todo_app();
        let env = project.env();

        let mut bundler = IncrementalBundler::new(&env);
        let (bundle, stats) = bundler.build_incremental().unwrap();

        assert_eq!(unannotated(bundle), build_full(&env).unwrap().code);
        assert_eq!(stats.compiled.len(), 6);
        assert_eq!(stats.reused, 0);
    }

    #[test]
    fn test_single_change_recompiles_one_module() {
        let project = todo_app();
        let env = project.env();

        let mut bundler = IncrementalBundler::new(&env);
        bundler.build_incremental().unwrap();

        project.write(
            "js/views/app.js",
            "var Todos = require('../collections/todos');\nmodule.exports = function AppView() { return Todos.length; };\n",
        );
        let (bundle, stats) = bundler.build_incremental().unwrap();

        assert_eq!(stats.compiled, ["js/views/app.js"]);
        assert_eq!(stats.reused, 5);
        assert!(stats.pruned.is_empty());
        assert!(bundle.code.contains("return Todos.length;"));
        assert_eq!(unannotated(bundle), build_full(&env).unwrap().code);
    }

    #[test]
    fn test_moved_dependency_is_resolved_again() {
        let project = Project::new();
        project
            .write("js/app.js", "var b = require('./b');\nmodule.exports = b;\n")
            .write("js/b.js", "module.exports = 'b';\n");
        let env = project.env();

        let mut bundler = IncrementalBundler::new(&env);
        bundler.build_incremental().unwrap();

        fs::remove_file(project.path("js/b.js")).unwrap();
        project.write("js/b/index.js", "module.exports = 'b';\n");

        let (bundle, stats) = bundler.build_incremental().unwrap();

        assert_eq!(stats.compiled, ["js/b/index.js"]);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.pruned, ["js/b.js"]);
        assert!(bundle.code.contains(r#"{"./b":"js/b/index.js"}"#));
        assert_eq!(unannotated(bundle), build_full(&env).unwrap().code);
    }

    #[test]
    fn test_require_in_strings_and_comments_is_not_an_import() {
        let project = todo_app();
        project.write(
            "js/views/app.js",
            "var msg = \"call require('./plugin') to extend\";\nvar x = 1; // require('./old')\nmodule.exports = function AppView() { return msg; };\n",
        );

        let bundle = build_full(&project.env()).unwrap();
        assert!(!bundle.code.contains("js/plugin"));
    }

    #[test]
    fn test_unreachable_modules_are_pruned() {
        let project = todo_app();
        let env = project.env();

        let mut bundler = IncrementalBundler::new(&env);
        bundler.build_incremental().unwrap();
        assert!(bundler.contains(&project.path("js/defaults.json")));

        project.write("js/collections/todos.js", "module.exports = [];\n");
        let (bundle, stats) = bundler.build_incremental().unwrap();

        assert_eq!(stats.compiled, ["js/collections/todos.js"]);
        assert_eq!(stats.pruned, ["js/defaults.json"]);
        assert!(!bundle.code.contains("js/defaults.json"));
        assert!(!bundler.contains(&project.path("js/defaults.json")));
    }

    #[test]
    fn test_failed_rebuild_keeps_last_good() {
        let project = todo_app();
        let env = project.env();

        let mut bundler = IncrementalBundler::new(&env);
        let first = bundler.build_incremental().unwrap().0.clone();

        project.write("js/views/app.js", "require('./missing');\n");
        let err = bundler.build_incremental().unwrap_err();

        assert!(matches!(err, BundleError::Resolve { .. }));
        assert!(err.is_recoverable());
        assert_eq!(bundler.last_good(), Some(&first));
        assert_eq!(bundler.module_count(), 6);

        // the error is logged and the previous bundle stays on disk
        write_bundle(&env, Profile::Development, &first).unwrap();
        assert_eq!(rebuild_dev(&env, &mut bundler).unwrap(), None);
        assert_eq!(project.read("dist/js/build.js"), first.code);
    }

    #[test]
    fn test_full_build_fails_on_unresolved() {
        let project = todo_app();
        project.write("js/app.js", "require('backbone');\n");

        let err = release(&project.env()).unwrap_err();
        assert!(matches!(err, PipelineError::Transform { .. }));
        assert!(!project.exists("dist/js/build.min.js"));
    }

    #[test]
    fn test_invalid_json_module() {
        let project = todo_app();
        project.write("js/defaults.json", "{ title: }");

        let err = build_full(&project.env()).unwrap_err();
        assert!(matches!(err, BundleError::Json { .. }));
    }

    #[test]
    fn test_dev_bundle_writes_source_map() {
        let project = todo_app();
        let env = project.env();

        let mut bundler = IncrementalBundler::new(&env);
        let stats = rebuild_dev(&env, &mut bundler).unwrap().unwrap();
        assert_eq!(stats.compiled.len(), 6);

        let code = project.read("dist/js/build.js");
        assert!(code.ends_with("//# sourceMappingURL=build.js.map\n"));

        let map: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(project.path("dist/js/build.js.map")).unwrap())
                .unwrap();
        assert_eq!(map["version"], 3);
        assert_eq!(map["file"], "build.js");
        assert_eq!(map["sources"][0], "js/app.js");
        assert_eq!(
            map["sourcesContent"][0],
            fs::read_to_string(project.path("js/app.js")).unwrap()
        );
    }

    #[test]
    fn test_release_writes_minified_name() {
        let project = todo_app();
        let written = release(&project.env()).unwrap();

        assert_eq!(written, [project.path("dist/js/build.min.js")]);
    }
}
