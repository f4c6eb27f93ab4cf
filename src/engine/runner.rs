use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use super::{TaskGraph, TaskId};
use crate::error::TaskError;
use crate::utils::{get_style_chain, get_style_task};

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub task: String,
    pub duration: Duration,
}

/// Timings of a successful chain, in execution order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub executions: Vec<TaskExecution>,
}

impl RunReport {
    pub fn total(&self) -> Duration {
        self.executions.iter().map(|e| e.duration).sum()
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for exec in &self.executions {
            writeln!(f, "{:>12} {:.2?}", exec.task, exec.duration)?;
        }
        write!(f, "{:>12} {:.2?}", "total", self.total())
    }
}

impl<E> TaskGraph<E> {
    /// Runs `id` and its transitive dependencies one after another. The first
    /// failing action ends the chain; nothing after it runs.
    pub fn run(&self, env: &E, id: TaskId) -> Result<RunReport, TaskError> {
        let chain = self.plan(id);

        let root_span = tracing::span!(Level::INFO, "chain", task = self.name(id));
        root_span.pb_set_style(&get_style_chain());
        root_span.pb_set_length(chain.len() as u64);
        root_span.pb_set_message(self.name(id));
        let _enter = root_span.enter();

        let mut report = RunReport::default();

        for id in chain {
            let task = self.task(id);

            if let Some(action) = &task.action {
                let span = tracing::span!(Level::INFO, "task", name = task.name.as_str());
                span.pb_set_style(&get_style_task());
                span.pb_set_message(&format!("Running {}", task.name));
                let _enter = span.enter();

                let start = Instant::now();
                action(env).map_err(|error| TaskError {
                    task: task.name.clone(),
                    error,
                })?;

                let duration = start.elapsed();
                tracing::debug!(task = task.name.as_str(), "finished in {duration:.2?}");
                report.executions.push(TaskExecution {
                    task: task.name.clone(),
                    duration,
                });
            }

            root_span.pb_inc(1);
        }

        Ok(report)
    }
}
