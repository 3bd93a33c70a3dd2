mod report;

use std::collections::HashMap;
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::RunError;
use crate::flow::TaskFlow;
use crate::state::TaskState;
use crate::task::{Settle, Settled};
use crate::utils;

pub use report::{RunReport, RunSummary, TaskSummary, TaskView};

/// Execution metrics for one task that actually ran.
#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Executes the task graph using a thread pool. It performs a parallel
/// topological sort of the graph, where tasks are dispatched as soon as
/// every dependency is terminal.
///
/// The algorithm works as follows:
/// 1. A pool of worker threads is spawned.
/// 2. A channel carries settlement messages back from the workers.
/// 3. The initial set of tasks (those with no dependencies) is dispatched.
/// 4. The main thread waits for tasks to settle. Cancelled tasks are
///    skipped without occupying a worker.
/// 5. When a task settles, the dependency counts of its dependents are
///    decremented; tasks that reach zero are dispatched immediately.
/// 6. The loop continues until every task is terminal, including tasks
///    whose completion handle was carried off to a foreign thread.
pub(crate) fn run_flow(flow: TaskFlow) -> Result<RunReport, RunError> {
    let TaskFlow { mut graph, abort } = flow;

    // We run toposort primarily to detect any cycles in the graph.
    petgraph::algo::toposort(&graph, None).map_err(|_| RunError::Cycle)?;

    // Build a map from a dependency to the nodes that depend on it.
    let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    for edge in graph.raw_edges() {
        dependents
            .entry(edge.source())
            .or_default()
            .push(edge.target());
    }

    // Count incoming edges per node; a node dispatches once its count
    // drops to zero.
    let mut dependency_counts: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|index| {
            (
                index,
                graph
                    .neighbors_directed(index, petgraph::Direction::Incoming)
                    .count(),
            )
        })
        .collect();

    let total_tasks = graph.node_count() as u64;
    let mut terminal_tasks = 0;

    let run_start = Instant::now();
    let mut execution_times = HashMap::new();

    if total_tasks == 0 {
        return Ok(RunReport::new(&graph, run_start, execution_times));
    }

    let root_span = tracing::span!(Level::INFO, "running_tasks");
    root_span.pb_set_length(total_tasks);
    root_span.pb_set_style(&utils::style_run_bar()?);
    root_span.pb_set_message("Running tasks...");
    let _enter = root_span.enter();

    // regular task style with no progress
    let task_style = utils::style_task()?;

    rayon::scope(|s| {
        let (notify, settled) = channel::<Settled>();

        let mut ready: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|index| dependency_counts.get(index).cloned().unwrap_or(0) == 0)
            .collect();

        loop {
            // Dispatch everything whose dependencies are all terminal.
            while let Some(index) = ready.pop() {
                if abort.is_cancelled() {
                    graph[index].runtime.state.request_cancel();
                }

                if graph[index].runtime.state.get() == TaskState::Cancelled {
                    // Skipped without occupying a worker. The result slot
                    // stays unset for dependents to interpret.
                    tracing::debug!("Skipping cancelled task: {}", graph[index].name);
                    graph[index].body = None;
                    terminal_tasks += 1;
                    root_span.pb_inc(1);

                    if let Some(dependents_of_skipped) = dependents.get(&index) {
                        for &dependent in dependents_of_skipped {
                            if let Some(count) = dependency_counts.get_mut(&dependent) {
                                *count -= 1;
                                if *count == 0 {
                                    ready.push(dependent);
                                }
                            }
                        }
                    }
                    continue;
                }

                let (body, runtime, name, deps) = {
                    let slot = &mut graph[index];
                    (
                        slot.body.take().expect("task dispatched twice"),
                        slot.runtime.clone(),
                        slot.name.clone(),
                        slot.deps.clone(),
                    )
                };

                // Snapshot dependency slots in declaration order.
                let inputs: Vec<_> = deps
                    .iter()
                    .map(|dep| graph[*dep].runtime.cell.snapshot())
                    .collect();

                runtime.state.mark_ready();
                let settle = Settle::new(index, runtime, notify.clone());
                let task_style = task_style.clone();

                s.spawn(move |_| {
                    let span = tracing::span!(Level::INFO, "task", name = %name);
                    span.pb_set_style(&task_style);
                    span.pb_set_message(&format!("Running {name}"));
                    let _enter = span.enter();

                    // A cancellation request may have landed since dispatch.
                    if !settle.begin() {
                        settle.skip_cancelled();
                        return;
                    }

                    if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(
                        move || body(inputs, settle),
                    )) {
                        // The completion handle recorded the failure while
                        // unwinding; this is only for the log.
                        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            format!("Task panicked: {s}")
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            format!("Task panicked: {s}")
                        } else {
                            String::from("Task panicked with unknown payload")
                        };

                        tracing::error!("{msg}");
                    }
                });
            }

            if terminal_tasks >= total_tasks {
                break;
            }

            // Wait for any task to settle.
            let message = settled.recv().unwrap();

            if message.executed {
                execution_times.insert(
                    message.index,
                    TaskExecution {
                        start: message.started,
                        duration: message.duration,
                    },
                );
            }

            terminal_tasks += 1;
            root_span.pb_inc(1);

            // Unlock dependents.
            if let Some(dependents_of_settled) = dependents.get(&message.index) {
                for &dependent in dependents_of_settled {
                    if let Some(count) = dependency_counts.get_mut(&dependent) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push(dependent);
                        }
                    }
                }
            }
        }
    });

    tracing::info!("Run complete!");

    Ok(RunReport::new(&graph, run_start, execution_times))
}
