//! The task graph.
//!
//! Tasks are declared by name on a [`Blueprint`], which checks the whole
//! graph once in [`Blueprint::finish`]: duplicate names, unknown or
//! self-referencing dependencies and cycles are all rejected before anything
//! runs. The resulting [`TaskGraph`] is immutable and is addressed through
//! [`TaskId`] handles from then on.

mod runner;

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::error::ConfigError;

pub use runner::{RunReport, TaskExecution};

/// Result of a single task action.
pub type TaskResult = anyhow::Result<()>;

/// Task action, called with the shared environment `E`.
type Action<E> = Arc<dyn Fn(&E) -> TaskResult + Send + Sync>;

/// Handle to a task inside a validated [`TaskGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(NodeIndex);

pub(crate) struct Task<E> {
    pub(crate) name: String,
    /// Direct dependencies in declaration order.
    pub(crate) dependencies: Vec<TaskId>,
    /// Composite tasks have no action of their own.
    pub(crate) action: Option<Action<E>>,
}

struct Declared<E> {
    name: String,
    after: Vec<String>,
    action: Option<Action<E>>,
}

/// Collects task declarations. Dependencies may refer to tasks declared
/// later; they are only resolved in [`Blueprint::finish`].
pub struct Blueprint<E> {
    declared: Vec<Declared<E>>,
}

impl<E> Blueprint<E> {
    pub fn new() -> Self {
        Self {
            declared: Vec::new(),
        }
    }

    /// Starts the declaration of a task named `name`.
    pub fn task(&mut self, name: impl Into<String>) -> TaskDef<'_, E> {
        TaskDef {
            blueprint: self,
            name: name.into(),
            after: Vec::new(),
        }
    }

    /// Validates the declarations and freezes them into a graph.
    pub fn finish(self) -> Result<TaskGraph<E>, ConfigError> {
        let mut names = HashMap::new();
        for (i, task) in self.declared.iter().enumerate() {
            if names.insert(task.name.clone(), TaskId(NodeIndex::new(i))).is_some() {
                return Err(ConfigError::DuplicateTask(task.name.clone()));
            }
        }

        for task in &self.declared {
            for dep in &task.after {
                if *dep == task.name {
                    return Err(ConfigError::SelfDependency(task.name.clone()));
                }
                if !names.contains_key(dep) {
                    return Err(ConfigError::UnknownDependency {
                        task: task.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut graph = Graph::with_capacity(self.declared.len(), 0);
        let mut edges = Vec::new();

        for declared in self.declared {
            let dependencies: Vec<TaskId> = declared.after.iter().map(|dep| names[dep]).collect();
            let index = graph.add_node(Task {
                name: declared.name,
                dependencies: dependencies.clone(),
                action: declared.action,
            });

            for dep in dependencies {
                edges.push((dep.0, index));
            }
        }

        for (source, target) in edges {
            graph.add_edge(source, target, ());
        }

        if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
            let name = graph[cycle.node_id()].name.clone();
            return Err(ConfigError::Cycle(name));
        }

        Ok(TaskGraph { graph, names })
    }
}

impl<E> Default for Blueprint<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A task declaration in progress.
pub struct TaskDef<'a, E> {
    blueprint: &'a mut Blueprint<E>,
    name: String,
    after: Vec<String>,
}

impl<'a, E> TaskDef<'a, E> {
    /// Tasks that must complete, in this order, before this one runs.
    pub fn after<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after.extend(names.into_iter().map(Into::into));
        self
    }

    /// Registers the task with an action.
    pub fn run<F>(self, action: F)
    where
        F: Fn(&E) -> TaskResult + Send + Sync + 'static,
    {
        self.register(Some(Arc::new(action)));
    }

    /// Registers the task as a composite of its dependencies.
    pub fn group(self) {
        self.register(None);
    }

    fn register(self, action: Option<Action<E>>) {
        self.blueprint.declared.push(Declared {
            name: self.name,
            after: self.after,
            action,
        });
    }
}

/// A validated, acyclic task graph.
pub struct TaskGraph<E> {
    graph: Graph<Task<E>, ()>,
    names: HashMap<String, TaskId>,
}

impl<E> TaskGraph<E> {
    /// Finds a task by name. Meant for the command line boundary only.
    pub fn lookup(&self, name: &str) -> Result<TaskId, ConfigError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::UnknownTask(name.to_string()))
    }

    pub fn name(&self, id: TaskId) -> &str {
        &self.graph[id.0].name
    }

    /// The chain executed for `id`: every transitive dependency exactly once,
    /// dependencies before dependents, siblings in declaration order.
    pub fn plan(&self, id: TaskId) -> Vec<TaskId> {
        let mut order = Vec::new();
        let mut seen = vec![false; self.graph.node_count()];
        self.visit(id, &mut seen, &mut order);
        order
    }

    fn visit(&self, id: TaskId, seen: &mut [bool], order: &mut Vec<TaskId>) {
        if seen[id.0.index()] {
            return;
        }
        seen[id.0.index()] = true;

        for &dep in &self.graph[id.0].dependencies {
            self.visit(dep, seen, order);
        }

        order.push(id);
    }

    pub(crate) fn task(&self, id: TaskId) -> &Task<E> {
        &self.graph[id.0]
    }
}

impl<E> std::fmt::Display for TaskGraph<E> {
    /// Renders the graph as a Mermaid diagram.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let task = &self.graph[index];
            let name = task.name.replace('"', "\\\"");
            writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {} --> {}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Log = Mutex<Vec<String>>;

    fn record(blueprint: &mut Blueprint<Log>, name: &'static str, after: &[&'static str]) {
        blueprint
            .task(name)
            .after(after.iter().copied())
            .run(move |log: &Log| {
                log.lock().unwrap().push(name.to_string());
                Ok(())
            });
    }

    fn names(graph: &TaskGraph<Log>, plan: &[TaskId]) -> Vec<String> {
        plan.iter().map(|&id| graph.name(id).to_string()).collect()
    }

    #[test]
    fn test_dependencies_run_first_in_declared_order() {
        let mut blueprint = Blueprint::new();
        blueprint.task("build").after(["html", "js", "css"]).group();
        record(&mut blueprint, "css", &["lint:css"]);
        record(&mut blueprint, "lint:css", &[]);
        record(&mut blueprint, "html", &[]);
        record(&mut blueprint, "js", &[]);
        let graph = blueprint.finish().unwrap();

        let build = graph.lookup("build").unwrap();
        assert_eq!(
            names(&graph, &graph.plan(build)),
            ["html", "js", "lint:css", "css", "build"]
        );

        let log = Log::default();
        graph.run(&log, build).unwrap();
        assert_eq!(*log.lock().unwrap(), ["html", "js", "lint:css", "css"]);
    }

    #[test]
    fn test_plan_is_stable() {
        let make = || {
            let mut blueprint = Blueprint::new();
            record(&mut blueprint, "a", &[]);
            record(&mut blueprint, "b", &["a"]);
            record(&mut blueprint, "c", &["a"]);
            record(&mut blueprint, "d", &["c", "b"]);
            blueprint.finish().unwrap()
        };

        let first = make();
        let second = make();
        let plan_a = names(&first, &first.plan(first.lookup("d").unwrap()));
        let plan_b = names(&second, &second.plan(second.lookup("d").unwrap()));

        assert_eq!(plan_a, ["a", "c", "b", "d"]);
        assert_eq!(plan_a, plan_b);
        assert_eq!(plan_a, names(&first, &first.plan(first.lookup("d").unwrap())));
    }

    #[test]
    fn test_shared_dependency_runs_once() {
        let mut blueprint = Blueprint::new();
        record(&mut blueprint, "clean", &[]);
        record(&mut blueprint, "x", &["clean"]);
        record(&mut blueprint, "y", &["clean"]);
        blueprint.task("all").after(["x", "y"]).group();
        let graph = blueprint.finish().unwrap();

        let log = Log::default();
        graph.run(&log, graph.lookup("all").unwrap()).unwrap();
        assert_eq!(*log.lock().unwrap(), ["clean", "x", "y"]);
    }

    #[test]
    fn test_first_failure_stops_chain() {
        let mut blueprint = Blueprint::new();
        record(&mut blueprint, "html", &[]);
        blueprint
            .task("css")
            .run(|_: &Log| Err(anyhow::anyhow!("unbalanced braces")));
        record(&mut blueprint, "fonts", &[]);
        blueprint.task("build").after(["html", "css", "fonts"]).group();
        let graph = blueprint.finish().unwrap();

        let log = Log::default();
        let err = graph.run(&log, graph.lookup("build").unwrap()).unwrap_err();

        assert_eq!(err.task, "css");
        assert!(err.error.to_string().contains("unbalanced braces"));
        assert_eq!(*log.lock().unwrap(), ["html"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut blueprint = Blueprint::new();
        record(&mut blueprint, "a", &["c"]);
        record(&mut blueprint, "b", &["a"]);
        record(&mut blueprint, "c", &["b"]);

        assert!(matches!(blueprint.finish(), Err(ConfigError::Cycle(_))));
    }

    #[test]
    fn test_dangling_dependency_is_rejected() {
        let mut blueprint = Blueprint::new();
        record(&mut blueprint, "a", &["missing"]);

        match blueprint.finish() {
            Err(ConfigError::UnknownDependency { task, dependency }) => {
                assert_eq!(task, "a");
                assert_eq!(dependency, "missing");
            }
            _ => panic!("expected unknown dependency"),
        }
    }

    #[test]
    fn test_duplicate_and_self_dependency() {
        let mut blueprint = Blueprint::new();
        record(&mut blueprint, "a", &[]);
        record(&mut blueprint, "a", &[]);
        assert!(matches!(blueprint.finish(), Err(ConfigError::DuplicateTask(_))));

        let mut blueprint = Blueprint::new();
        record(&mut blueprint, "a", &["a"]);
        assert!(matches!(blueprint.finish(), Err(ConfigError::SelfDependency(_))));
    }

    #[test]
    fn test_unknown_task_lookup() {
        let graph = Blueprint::<Log>::new().finish().unwrap();
        assert!(matches!(graph.lookup("nope"), Err(ConfigError::UnknownTask(_))));
    }

    #[test]
    fn test_mermaid() {
        let mut blueprint = Blueprint::new();
        record(&mut blueprint, "a", &[]);
        record(&mut blueprint, "b", &["a"]);
        let graph = blueprint.finish().unwrap();

        let rendered = graph.to_string();
        assert!(rendered.starts_with("graph LR"));
        assert!(rendered.contains("0 --> 1"));
    }
}
