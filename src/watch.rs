//! Watch mode.
//!
//! Filesystem events are debounced, matched against the watch bindings and
//! turned into task chains. Everything reports back to one coordinator loop
//! over a channel:
//!
//! - the debouncer sends batches of changed paths,
//! - every chain runs on its own thread and sends its result when done,
//! - the script worker owns incremental rebuilds of the bundle and sends
//!   whether a new bundle was written.
//!
//! A binding never runs two chains at once. Triggers that arrive while it is
//! building collapse into a single rerun.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, new_debouncer};

use crate::bundler;
use crate::config::{AssetPaths, Config};
use crate::core::Environment;
use crate::engine::{RunReport, TaskGraph, TaskId};
use crate::error::{TaskError, WatchError};
use crate::lint::{ScriptLint, lint_files};
use crate::reload::LiveReloadBroker;
use crate::tasks::{SharedBundler, Tasks};

/// Source globs whose changes rerun one task chain.
#[derive(Debug, Clone)]
pub struct Binding {
    pub task: &'static str,
    pub patterns: Vec<String>,
}

/// The fixed set of bindings for a project.
pub fn bindings(config: &Config) -> Vec<Binding> {
    let bind = |task: &'static str, paths: &AssetPaths| Binding {
        task,
        patterns: config.patterns(paths),
    };

    vec![
        bind("css:dev", &config.styles),
        bind("html:dev", &config.markup),
        bind("fonts", &config.fonts),
        bind("images", &config.images),
        bind("templates", &config.templates),
    ]
}

enum Message {
    Fs(Vec<Utf8PathBuf>),
    FsErrors(Vec<notify::Error>),
    ChainDone {
        binding: usize,
        result: Result<RunReport, TaskError>,
    },
    ScriptDone(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindingState {
    Idle,
    Building { pending: bool },
    Failed,
}

/// What a batch of changes asks for.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Dispatch {
    /// Bindings to start now, each at most once.
    pub(crate) start: Vec<usize>,
    /// Whether any script source or bundled module changed.
    pub(crate) scripts: bool,
}

/// Per-binding build state. Pure bookkeeping, no I/O.
pub(crate) struct Coordinator {
    matchers: Vec<Vec<Pattern>>,
    scripts: Vec<Pattern>,
    states: Vec<BindingState>,
}

impl Coordinator {
    pub(crate) fn new(matchers: Vec<Vec<Pattern>>, scripts: Vec<Pattern>) -> Self {
        let states = vec![BindingState::Idle; matchers.len()];
        Self {
            matchers,
            scripts,
            states,
        }
    }

    pub(crate) fn state(&self, binding: usize) -> BindingState {
        self.states[binding]
    }

    /// Matches a batch of changed paths. `in_bundle` tells whether a path is
    /// a module of the current script bundle, which covers modules outside
    /// the script globs such as JSON files.
    pub(crate) fn on_paths(
        &mut self,
        paths: &[Utf8PathBuf],
        in_bundle: impl Fn(&Utf8Path) -> bool,
    ) -> Dispatch {
        let mut dispatch = Dispatch::default();
        let mut hit = HashSet::new();

        for path in paths {
            let std_path = path.as_std_path();

            for (i, patterns) in self.matchers.iter().enumerate() {
                if patterns.iter().any(|p| p.matches_path(std_path)) {
                    hit.insert(i);
                }
            }

            if !dispatch.scripts
                && (self.scripts.iter().any(|p| p.matches_path(std_path)) || in_bundle(path))
            {
                dispatch.scripts = true;
            }
        }

        let mut hit: Vec<_> = hit.into_iter().collect();
        hit.sort_unstable();

        for i in hit {
            match self.states[i] {
                BindingState::Idle | BindingState::Failed => {
                    self.states[i] = BindingState::Building { pending: false };
                    dispatch.start.push(i);
                }
                BindingState::Building { .. } => {
                    self.states[i] = BindingState::Building { pending: true };
                }
            }
        }

        dispatch
    }

    /// Records a finished chain. Returns true when a rerun was pending, in
    /// which case the binding stays building.
    pub(crate) fn on_done(&mut self, binding: usize, ok: bool) -> bool {
        match self.states[binding] {
            BindingState::Building { pending: true } => {
                self.states[binding] = BindingState::Building { pending: false };
                true
            }
            _ => {
                self.states[binding] = if ok {
                    BindingState::Idle
                } else {
                    BindingState::Failed
                };
                false
            }
        }
    }
}

/// What the coordinator loop does to the outside world.
pub(crate) trait Effects {
    /// Whether `path` is a module of the current script bundle.
    fn in_bundle(&self, path: &Utf8Path) -> bool;
    fn start_chain(&mut self, binding: usize);
    fn rebuild_scripts(&mut self);
    fn reload(&mut self);
}

/// Handles one message of the coordinator loop. Clients are told to reload
/// only after a successful chain or a written bundle.
fn handle(
    message: Message,
    coordinator: &mut Coordinator,
    bindings: &[Binding],
    effects: &mut impl Effects,
) {
    match message {
        Message::Fs(paths) => {
            let dispatch = coordinator.on_paths(&paths, |path| effects.in_bundle(path));

            if dispatch.scripts {
                effects.rebuild_scripts();
            }

            for binding in dispatch.start {
                tracing::info!("change detected, running {}", bindings[binding].task);
                effects.start_chain(binding);
            }
        }
        Message::FsErrors(errors) => {
            for err in errors {
                tracing::error!("watch error: {err}");
            }
        }
        Message::ChainDone { binding, result } => {
            let ok = match result {
                Ok(report) => {
                    tracing::info!("{} done in {:.2?}", bindings[binding].task, report.total());
                    effects.reload();
                    true
                }
                Err(err) => {
                    tracing::error!("{err}");
                    false
                }
            };

            if coordinator.on_done(binding, ok) {
                effects.start_chain(binding);
            }
        }
        Message::ScriptDone(rebuilt) => {
            if rebuilt {
                effects.reload();
            }
        }
    }
}

/// The effects of a running watch session.
struct Session<'a> {
    env: &'a Environment,
    tasks: &'a Tasks,
    ids: Vec<TaskId>,
    tx: Sender<Message>,
    script_tx: Sender<()>,
    broker: &'a LiveReloadBroker,
}

impl Effects for Session<'_> {
    fn in_bundle(&self, path: &Utf8Path) -> bool {
        self.tasks
            .scripts
            .lock()
            .is_ok_and(|bundler| bundler.contains(path))
    }

    fn start_chain(&mut self, binding: usize) {
        spawn_chain(&self.tasks.graph, self.env, binding, self.ids[binding], &self.tx);
    }

    fn rebuild_scripts(&mut self) {
        self.script_tx.send(()).ok();
    }

    fn reload(&mut self) {
        self.broker.notify_all();
    }
}

/// Splits a glob string into a canonicalized static root path (for
/// watching) and a compiled absolute Pattern (for matching).
pub fn resolve_watch_path(glob: &str) -> Result<(Utf8PathBuf, Pattern), WatchError> {
    let path = Utf8Path::new(glob);

    // static root and the part containing wildcards
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    let absolute_root = root_part
        .canonicalize_utf8()
        .map_err(|_| WatchError::Resolve(glob.to_string()))?;

    // a concrete file is watched through its parent so that atomic saves
    // are still caught
    let (watch_root, pattern) = if suffix_part.as_str().is_empty() && absolute_root.is_file() {
        let parent = absolute_root
            .parent()
            .unwrap_or(&absolute_root)
            .to_path_buf();
        (parent, absolute_root)
    } else {
        let pattern = absolute_root.join(&suffix_part);
        (absolute_root, pattern)
    };

    let pattern = Pattern::new(pattern.as_str())?;

    Ok((watch_root, pattern))
}

/// Reduces a set of paths to the minimal set of recursive watch roots.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

fn compile_patterns(globs: &[String], roots: &mut HashSet<Utf8PathBuf>) -> Vec<Pattern> {
    let mut patterns = Vec::new();

    for glob in globs {
        match resolve_watch_path(glob) {
            Ok((root, pattern)) => {
                roots.insert(root);
                patterns.push(pattern);
            }
            Err(err) => tracing::warn!("not watching {glob}: {err}"),
        }
    }

    patterns
}

fn spawn_chain(
    graph: &Arc<TaskGraph<Environment>>,
    env: &Environment,
    binding: usize,
    id: TaskId,
    tx: &Sender<Message>,
) {
    let graph = graph.clone();
    let env = env.clone();
    let tx = tx.clone();

    thread::spawn(move || {
        let result = graph.run(&env, id);
        tx.send(Message::ChainDone { binding, result }).ok();
    });
}

/// Rebuilds the development bundle once, then lints the scripts. Lint
/// problems are reported but don't hold back the bundle.
fn rebuild_scripts(env: &Environment, scripts: &SharedBundler) -> bool {
    let rebuilt = match scripts.lock() {
        Ok(mut guard) => match bundler::rebuild_dev(env, &mut guard) {
            Ok(stats) => stats.is_some(),
            Err(err) => {
                tracing::error!("{err}");
                false
            }
        },
        Err(_) => {
            tracing::error!("script bundler lock poisoned");
            false
        }
    };

    if let Err(err) = bundler::sources(env).and_then(|files| lint_files(&ScriptLint, &files)) {
        tracing::warn!("{err}");
    }

    rebuilt
}

/// Starts the script worker. Each message on the returned channel asks for a
/// rebuild; messages queued during a rebuild collapse into the next one.
fn spawn_script_worker(env: Environment, scripts: SharedBundler, done: Sender<Message>) -> Sender<()> {
    let (tx, rx) = mpsc::channel::<()>();

    thread::spawn(move || {
        while rx.recv().is_ok() {
            let queued = rx.try_iter().count();
            if queued > 0 {
                tracing::debug!("collapsed {queued} queued script change(s)");
            }

            let rebuilt = rebuild_scripts(&env, &scripts);
            if done.send(Message::ScriptDone(rebuilt)).is_err() {
                break;
            }
        }
    });

    tx
}

/// Watches the project and keeps the output up to date until the process is
/// stopped.
pub fn watch(env: &Environment, tasks: &Tasks, broker: &LiveReloadBroker) -> Result<(), WatchError> {
    let config = env.config.clone();
    let bindings = bindings(&config);
    let (tx, rx) = mpsc::channel();

    let mut roots = HashSet::new();
    let mut ids = Vec::with_capacity(bindings.len());
    let mut matchers = Vec::with_capacity(bindings.len());

    for binding in &bindings {
        ids.push(tasks.graph.lookup(binding.task)?);
        matchers.push(compile_patterns(&binding.patterns, &mut roots));
    }

    let scripts = compile_patterns(&config.patterns(&config.scripts), &mut roots);
    let mut coordinator = Coordinator::new(matchers, scripts);
    let script_tx = spawn_script_worker(env.clone(), tasks.scripts.clone(), tx.clone());

    let fs_tx = tx.clone();
    let mut debouncer = new_debouncer(
        Duration::from_millis(config.server.debounce_ms),
        None,
        move |result: DebounceEventResult| {
            let message = match result {
                Ok(events) => Message::Fs(
                    events
                        .into_iter()
                        .flat_map(|e| e.event.paths)
                        .filter_map(|p| Utf8PathBuf::from_path_buf(p).ok())
                        .collect(),
                ),
                Err(errors) => Message::FsErrors(errors),
            };
            fs_tx.send(message).ok();
        },
    )?;

    for root in collapse_watch_paths(roots) {
        tracing::info!("watching {root}");
        debouncer.watch(&root, RecursiveMode::Recursive)?;
    }

    let mut session = Session {
        env,
        tasks,
        ids,
        tx,
        script_tx,
        broker,
    };

    while let Ok(message) = rx.recv() {
        handle(message, &mut coordinator, &bindings, &mut session);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;
    use crate::loader::testing::Project;

    fn coordinator() -> Coordinator {
        Coordinator::new(
            vec![
                vec![Pattern::new("/app/scss/**/*.scss").unwrap()],
                vec![Pattern::new("/app/index.html").unwrap()],
            ],
            vec![Pattern::new("/app/js/**/*.js").unwrap()],
        )
    }

    fn paths(paths: &[&str]) -> Vec<Utf8PathBuf> {
        paths.iter().map(Utf8PathBuf::from).collect()
    }

    fn unbundled(_: &Utf8Path) -> bool {
        false
    }

    /// Records effects instead of performing them.
    #[derive(Default)]
    struct Recorder {
        bundle: Vec<Utf8PathBuf>,
        started: Vec<usize>,
        rebuilds: usize,
        reloads: usize,
    }

    impl Effects for Recorder {
        fn in_bundle(&self, path: &Utf8Path) -> bool {
            self.bundle.iter().any(|p| p.as_path() == path)
        }

        fn start_chain(&mut self, binding: usize) {
            self.started.push(binding);
        }

        fn rebuild_scripts(&mut self) {
            self.rebuilds += 1;
        }

        fn reload(&mut self) {
            self.reloads += 1;
        }
    }

    fn done(binding: usize, ok: bool) -> Message {
        let result = if ok {
            Ok(RunReport::default())
        } else {
            Err(TaskError {
                task: "lint:css".into(),
                error: anyhow!("unexpected closing brace"),
            })
        };
        Message::ChainDone { binding, result }
    }

    #[test]
    fn test_non_matching_paths_trigger_nothing() {
        let mut c = coordinator();
        let dispatch = c.on_paths(&paths(&["/app/README.md", "/app/dist/index.html"]), unbundled);

        assert_eq!(dispatch, Dispatch::default());
        assert_eq!(c.state(0), BindingState::Idle);
    }

    #[test]
    fn test_batch_starts_each_binding_once() {
        let mut c = coordinator();
        let changed = paths(&[
            "/app/scss/app.scss",
            "/app/scss/_base.scss",
            "/app/scss/app.scss",
            "/app/js/app.js",
        ]);
        let dispatch = c.on_paths(&changed, unbundled);

        assert_eq!(dispatch.start, [0]);
        assert!(dispatch.scripts);
        assert_eq!(c.state(0), BindingState::Building { pending: false });
        assert_eq!(c.state(1), BindingState::Idle);
    }

    #[test]
    fn test_busy_binding_collapses_reruns() {
        let mut c = coordinator();
        c.on_paths(&paths(&["/app/scss/app.scss"]), unbundled);

        // three more saves while the first chain runs
        for _ in 0..3 {
            let dispatch = c.on_paths(&paths(&["/app/scss/app.scss"]), unbundled);
            assert!(dispatch.start.is_empty());
        }
        assert_eq!(c.state(0), BindingState::Building { pending: true });

        assert!(c.on_done(0, true));
        assert_eq!(c.state(0), BindingState::Building { pending: false });

        assert!(!c.on_done(0, true));
        assert_eq!(c.state(0), BindingState::Idle);
    }

    #[test]
    fn test_failed_binding_runs_again() {
        let mut c = coordinator();
        c.on_paths(&paths(&["/app/index.html"]), unbundled);
        assert!(!c.on_done(1, false));
        assert_eq!(c.state(1), BindingState::Failed);

        let dispatch = c.on_paths(&paths(&["/app/index.html"]), unbundled);
        assert_eq!(dispatch.start, [1]);
    }

    #[test]
    fn test_bundled_json_module_rebuilds_scripts() {
        let mut c = coordinator();
        let changed = paths(&["/app/js/defaults.json"]);

        assert!(!c.on_paths(&changed, unbundled).scripts);
        assert!(c.on_paths(&changed, |p| p.as_str() == "/app/js/defaults.json").scripts);
    }

    #[test]
    fn test_failed_chain_does_not_reload() {
        let bindings = bindings(&Config::with_root("/app"));
        let mut c = coordinator();
        let mut effects = Recorder::default();

        handle(Message::Fs(paths(&["/app/scss/app.scss"])), &mut c, &bindings, &mut effects);
        assert_eq!(effects.started, [0]);

        handle(done(0, false), &mut c, &bindings, &mut effects);
        assert_eq!(effects.reloads, 0);
        assert_eq!(c.state(0), BindingState::Failed);
    }

    #[test]
    fn test_successful_chain_reloads_once() {
        let bindings = bindings(&Config::with_root("/app"));
        let mut c = coordinator();
        let mut effects = Recorder::default();

        handle(Message::Fs(paths(&["/app/index.html"])), &mut c, &bindings, &mut effects);
        handle(done(1, true), &mut c, &bindings, &mut effects);

        assert_eq!(effects.reloads, 1);
        assert_eq!(effects.started, [1]);
        assert_eq!(c.state(1), BindingState::Idle);
    }

    #[test]
    fn test_pending_change_reruns_chain() {
        let bindings = bindings(&Config::with_root("/app"));
        let mut c = coordinator();
        let mut effects = Recorder::default();

        handle(Message::Fs(paths(&["/app/scss/app.scss"])), &mut c, &bindings, &mut effects);
        handle(Message::Fs(paths(&["/app/scss/app.scss"])), &mut c, &bindings, &mut effects);
        handle(done(0, false), &mut c, &bindings, &mut effects);

        assert_eq!(effects.started, [0, 0]);
        assert_eq!(effects.reloads, 0);
        assert_eq!(c.state(0), BindingState::Building { pending: false });
    }

    #[test]
    fn test_script_changes_go_to_the_worker() {
        let bindings = bindings(&Config::with_root("/app"));
        let mut c = coordinator();
        let mut effects = Recorder {
            bundle: paths(&["/app/node_modules/lodash/index.js"]),
            ..Recorder::default()
        };

        handle(Message::Fs(paths(&["/app/js/app.js"])), &mut c, &bindings, &mut effects);
        handle(
            Message::Fs(paths(&["/app/node_modules/lodash/index.js"])),
            &mut c,
            &bindings,
            &mut effects,
        );
        assert_eq!(effects.rebuilds, 2);
        assert!(effects.started.is_empty());

        handle(Message::ScriptDone(false), &mut c, &bindings, &mut effects);
        assert_eq!(effects.reloads, 0);

        handle(Message::ScriptDone(true), &mut c, &bindings, &mut effects);
        assert_eq!(effects.reloads, 1);
    }

    #[test]
    fn test_bindings_cover_asset_kinds() {
        let config = Config::with_root("/app");
        let tasks: Vec<_> = bindings(&config).iter().map(|b| b.task).collect();

        assert_eq!(tasks, ["css:dev", "html:dev", "fonts", "images", "templates"]);
    }

    #[test]
    fn test_concrete_file() {
        let project = Project::new();
        project.write("index.html", "");
        let root = project.root.canonicalize_utf8().unwrap();

        let (watch, pattern) = resolve_watch_path(project.path("index.html").as_str()).unwrap();

        assert_eq!(watch, root);
        assert_eq!(pattern.as_str(), root.join("index.html"));
    }

    #[test]
    fn test_directory_wildcard() {
        let project = Project::new();
        project.write("scss/app.scss", "");
        let root = project.root.canonicalize_utf8().unwrap();

        let (watch, pattern) =
            resolve_watch_path(project.path("scss/**/*.scss").as_str()).unwrap();

        assert_eq!(watch, root.join("scss"));
        assert_eq!(pattern.as_str(), root.join("scss/**/*.scss"));
        assert!(pattern.matches_path(root.join("scss/nested/x.scss").as_std_path()));
    }

    #[test]
    fn test_missing_root() {
        let project = Project::new();
        let glob = project.path("fonts/**/*");

        assert!(matches!(
            resolve_watch_path(glob.as_str()),
            Err(WatchError::Resolve(_))
        ));
    }

    #[test]
    fn test_collapse_watch_paths() {
        let paths = HashSet::from([
            Utf8PathBuf::from("/a"),
            Utf8PathBuf::from("/a/b"),
            Utf8PathBuf::from("/a/b/c"),
            Utf8PathBuf::from("/b"),
            Utf8PathBuf::from("/c/d"),
            Utf8PathBuf::from("/foo-bar"),
        ]);

        assert_eq!(
            collapse_watch_paths(paths),
            [
                Utf8PathBuf::from("/a"),
                Utf8PathBuf::from("/b"),
                Utf8PathBuf::from("/c/d"),
                Utf8PathBuf::from("/foo-bar"),
            ]
        );
    }
}
