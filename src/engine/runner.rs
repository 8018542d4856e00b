mod diagnostics;
#[cfg(feature = "server")]
pub(crate) mod http;
pub(crate) mod watch;

use std::collections::HashMap;
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;
use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::alert::{Alert, AlertSink};
use crate::engine::TaskGraph;
use crate::error::{BuildError, TaskError, TaskFailures};
use crate::task::{Outcome, Task};

pub use diagnostics::Diagnostics;

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
    pub outcome: Option<Outcome>,
}

/// What the scheduler does when a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Start no new tasks, wait for the ones in flight, fail the run with
    /// every collected error. Used by one-shot builds.
    Abort,
    /// Surface the failure as an alert and treat the task as completed so
    /// that the rest of the graph proceeds. Fatal tasks still abort.
    Report,
}

/// Executes the task graph on the rayon pool. Tasks are started as soon as
/// every task they depend on has completed.
///
/// 1. Count the unfinished dependencies of every node.
/// 2. Spawn all nodes with no dependencies.
/// 3. Wait for results on a channel; on success, decrement the counts of the
///    dependents and spawn those that reach zero.
/// 4. Stop when nothing is in flight.
///
/// A panicking task is caught and reported as a failure, so a barrier can
/// never wait on a result that will not arrive.
pub fn run(
    graph: &TaskGraph,
    policy: Policy,
    alerts: &dyn AlertSink,
) -> Result<Diagnostics, BuildError> {
    let graph = &graph.graph;

    if let Err(cycle) = petgraph::algo::toposort(graph, None) {
        let name = graph[cycle.node_id()].name().to_string();
        return Err(BuildError::Cycle(name));
    }

    let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    for edge in graph.raw_edges() {
        dependents
            .entry(edge.source())
            .or_default()
            .push(edge.target());
    }

    let mut dependency_counts: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|i| {
            (
                i,
                graph
                    .neighbors_directed(i, petgraph::Direction::Incoming)
                    .count(),
            )
        })
        .collect();

    let total_tasks = graph.node_count() as u64;
    if total_tasks == 0 {
        return Ok(Diagnostics::default());
    }

    let root_span = tracing::span!(Level::INFO, "building");
    root_span.pb_set_length(total_tasks);
    root_span.pb_set_style(&style_bar());
    root_span.pb_set_message("Running tasks...");
    let _enter = root_span.enter();

    let task_style = style_task();

    let mut execution_times = HashMap::new();
    let mut failures = Vec::new();

    // The scheduler loop blocks on the channel, so it runs on the calling
    // thread rather than occupying a pool worker.
    rayon::in_place_scope(|s| {
        // (index, result, start, duration)
        let (result_sender, result_receiver) =
            channel::<(NodeIndex, Result<Outcome, TaskError>, Instant, Duration)>();

        let spawn_task = |index: NodeIndex| {
            let task = graph[index].clone();
            let sender = result_sender.clone();
            let task_style = task_style.clone();

            s.spawn(move |_| {
                let span = tracing::span!(Level::INFO, "task", name = task.name());
                span.pb_set_style(&task_style);
                span.pb_set_message(&format!("Running {}", task.name()));
                let _enter = span.enter();

                let start = Instant::now();
                let result = run_caught(task.as_ref());
                let elapsed = start.elapsed();

                // the receiver lives until every spawned task has reported
                sender.send((index, result, start, elapsed)).ok();
            });
        };

        let mut in_flight = 0usize;
        for index in graph.node_indices() {
            if dependency_counts[&index] == 0 {
                spawn_task(index);
                in_flight += 1;
            }
        }

        let mut aborted = false;

        while in_flight > 0 {
            let Ok((index, result, start, duration)) = result_receiver.recv() else {
                break;
            };
            in_flight -= 1;
            root_span.pb_inc(1);

            let task = &graph[index];
            let outcome = match result {
                Ok(outcome) => Some(outcome),
                Err(err) if policy == Policy::Report && !task.fatal() => {
                    alerts.alert(Alert::from(&err));
                    None
                }
                Err(err) => {
                    tracing::error!(task = task.name(), "{err}");
                    failures.push((task.name().to_string(), err));
                    aborted = true;
                    None
                }
            };

            execution_times.insert(
                task.name().to_string(),
                TaskExecution {
                    start,
                    duration,
                    outcome,
                },
            );

            if aborted {
                continue;
            }

            if let Some(dependents) = dependents.get(&index) {
                for &dependent in dependents {
                    if let Some(count) = dependency_counts.get_mut(&dependent) {
                        *count -= 1;
                        if *count == 0 {
                            spawn_task(dependent);
                            in_flight += 1;
                        }
                    }
                }
            }
        }
    });

    let diagnostics = Diagnostics { execution_times };

    if !failures.is_empty() {
        return Err(TaskFailures(failures).into());
    }

    diagnostics.log();
    Ok(diagnostics)
}

/// Runs a task, converting a panic into a [`TaskError::Panic`].
pub(crate) fn run_caught(task: &dyn Task) -> Result<Outcome, TaskError> {
    // The task only touches its own subtree of the output directory, so a
    // panic cannot leave shared memory in an inconsistent state.
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.run())) {
        Ok(result) => result,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                String::from("unknown payload")
            };

            Err(TaskError::Panic(msg))
        }
    }
}

fn style_bar() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

fn style_task() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
