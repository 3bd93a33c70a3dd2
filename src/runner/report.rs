use std::collections::HashMap;
use std::fmt::{Display, Formatter, Write as _};
use std::sync::Arc;
use std::time::{Duration, Instant};

use console::style;
use petgraph::Graph;
use petgraph::graph::NodeIndex;

use super::TaskExecution;
use crate::handle::TaskHandle;
use crate::outcome::Outcome;
use crate::state::{Disposition, TaskState};
use crate::task::{NodeKind, NodeRuntime, NodeSlot};

struct TaskRecord {
    name: String,
    kind: NodeKind,
    result_type: &'static str,
    runtime: Arc<NodeRuntime>,
}

/// Everything known about a finished run.
///
/// The report owns snapshots of every task's state, disposition and result
/// slot, so it stays queryable after the flow itself is gone. Typed results
/// are looked up with the [`TaskHandle`]s handed out while wiring.
pub struct RunReport {
    run_start: Instant,
    run_duration: Duration,
    records: Vec<TaskRecord>,
    edges: Vec<(NodeIndex, NodeIndex)>,
    /// A map of task node indices to their execution metrics.
    pub execution_times: HashMap<NodeIndex, TaskExecution>,
}

impl RunReport {
    pub(crate) fn new(
        graph: &Graph<NodeSlot, ()>,
        run_start: Instant,
        execution_times: HashMap<NodeIndex, TaskExecution>,
    ) -> Self {
        let records = graph
            .node_indices()
            .map(|index| {
                let slot = &graph[index];
                TaskRecord {
                    name: slot.name.to_string(),
                    kind: slot.kind,
                    result_type: slot.result_type,
                    runtime: slot.runtime.clone(),
                }
            })
            .collect();
        let edges = graph
            .raw_edges()
            .iter()
            .map(|edge| (edge.source(), edge.target()))
            .collect();

        Self {
            run_start,
            run_duration: run_start.elapsed(),
            records,
            edges,
            execution_times,
        }
    }

    /// Looks up the typed outcome of a task. `None` means the task never
    /// assigned a result, which happens when it was cancelled before its
    /// body could run.
    ///
    /// # Panics
    ///
    /// Panics when the handle's type does not match the stored result,
    /// which can only happen with a handle from a different flow.
    pub fn outcome<S>(&self, handle: TaskHandle<S>) -> Option<Outcome<S>>
    where
        S: Clone + Send + Sync + 'static,
    {
        let record = &self.records[handle.index().index()];
        let stored = record.runtime.cell.snapshot()?;
        let outcome = stored
            .downcast_ref::<Outcome<S>>()
            .expect("Type mismatch in result lookup");

        Some(outcome.clone())
    }

    /// Final lifecycle state of a task.
    pub fn state<S>(&self, handle: TaskHandle<S>) -> TaskState {
        self.records[handle.index().index()].runtime.state.get()
    }

    pub fn task_count(&self) -> usize {
        self.records.len()
    }

    /// Iterates over every task with its metadata, state and timing.
    pub fn tasks(&self) -> impl Iterator<Item = TaskView<'_>> + '_ {
        self.records.iter().enumerate().map(|(position, record)| {
            let index = NodeIndex::new(position);
            TaskView {
                index,
                name: &record.name,
                kind: record.kind,
                result_type: record.result_type,
                state: record.runtime.state.get(),
                disposition: record.runtime.disposition(),
                execution: self.execution_times.get(&index),
            }
        })
    }

    /// Aggregates the run into a serializable summary.
    pub fn summary(&self) -> RunSummary {
        let tasks: Vec<TaskSummary> = self
            .tasks()
            .map(|view| TaskSummary {
                name: view.name.to_string(),
                kind: view.kind,
                state: view.state,
                disposition: view.disposition,
                start_us: view
                    .execution
                    .map(|e| e.start.duration_since(self.run_start).as_micros() as u64),
                duration_us: view.execution.map(|e| e.duration.as_micros() as u64),
            })
            .collect();

        RunSummary {
            total: tasks.len(),
            finished: tasks
                .iter()
                .filter(|t| t.state == TaskState::Finished)
                .count(),
            cancelled: tasks
                .iter()
                .filter(|t| t.state == TaskState::Cancelled)
                .count(),
            failed: tasks
                .iter()
                .filter(|t| t.disposition == Some(Disposition::Failure))
                .count(),
            total_duration_us: self.run_duration.as_micros() as u64,
            tasks,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.summary())
    }

    /// Renders the task graph as a Mermaid diagram, color-coded by outcome.
    ///
    /// * **Green**: succeeded
    /// * **Red**: failed
    /// * **Grey**: cancelled before running
    pub fn render_mermaid(&self) -> String {
        use std::fmt::Write;

        let mut f = String::new();
        writeln!(f, "graph LR").unwrap();

        for (position, record) in self.records.iter().enumerate() {
            let name = record.name.replace('"', "\\\""); // Simple escape

            let label_extra = match self.execution_times.get(&NodeIndex::new(position)) {
                Some(exec) => format!("{:.2?}", exec.duration),
                None => "Skipped".to_string(),
            };

            let color_code = match (record.runtime.state.get(), record.runtime.disposition()) {
                (_, Some(Disposition::Success)) => "#8CE99A",
                (_, Some(Disposition::Failure)) => "#FFA8A8",
                (TaskState::Cancelled, _) => "#CED4DA",
                _ => "#ADD8E6",
            };

            writeln!(f, "    {:?}[\"{}\\n{}\"]", position, name, label_extra).unwrap();
            writeln!(f, "    style {:?} fill:{}", position, color_code).unwrap();
        }

        for (source, target) in &self.edges {
            let source_record = &self.records[source.index()];
            let type_name = source_record
                .result_type
                .replace('<', "&lt;")
                .replace('>', "&gt;");
            writeln!(
                f,
                "    {:?} -- \"{}\" --> {:?}",
                source.index(),
                type_name,
                target.index()
            )
            .unwrap();
        }

        f
    }

    /// Renders a plain text table of the run, one task per line, with the
    /// status column colored for terminals.
    pub fn render_text(&self) -> String {
        use std::fmt::Write;

        let width = self
            .records
            .iter()
            .map(|record| record.name.len())
            .max()
            .unwrap_or(0);

        let mut f = String::new();
        for view in self.tasks() {
            let status = match (view.state, view.disposition) {
                (_, Some(Disposition::Success)) => style("ok").green(),
                (_, Some(Disposition::Failure)) => style("failed").red(),
                (TaskState::Cancelled, _) => style("cancelled").dim(),
                _ => style("pending").dim(),
            };
            let kind = view.kind.label();

            match view.execution {
                Some(exec) => writeln!(
                    f,
                    "{:width$}  {kind:<6}  {status}  {:.2?}",
                    view.name, exec.duration
                ),
                None => writeln!(f, "{:width$}  {kind:<6}  {status}", view.name),
            }
            .unwrap();
        }

        f
    }
}

/// One task as seen through [`RunReport::tasks`].
#[derive(Debug, Clone)]
pub struct TaskView<'a> {
    pub index: NodeIndex,
    pub name: &'a str,
    pub kind: NodeKind,
    pub result_type: &'static str,
    pub state: TaskState,
    pub disposition: Option<Disposition>,
    pub execution: Option<&'a TaskExecution>,
}

/// Serializable aggregate of a run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub finished: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub total_duration_us: u64,
    pub tasks: Vec<TaskSummary>,
}

/// Serializable line item of [`RunSummary`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskSummary {
    pub name: String,
    pub kind: NodeKind,
    pub state: TaskState,
    pub disposition: Option<Disposition>,
    pub start_us: Option<u64>,
    pub duration_us: Option<u64>,
}

// WATERFALL

struct XmlSafe<'a>(&'a str);

impl<'a> Display for XmlSafe<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for c in self.0.chars() {
            match c {
                '<' => f.write_str("&lt;")?,
                '>' => f.write_str("&gt;")?,
                '&' => f.write_str("&amp;")?,
                '"' => f.write_str("&quot;")?,
                '\'' => f.write_str("&apos;")?,
                _ => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

// Grouping layout constants so they are easy to tweak in one place.
#[derive(Debug, Clone, Copy)]
struct WaterfallLayout {
    row_height: u32,
    label_width: u32,
    chart_width: u32,
    padding: u32,
    header_height: u32,
    text_space: u32,
}

impl Default for WaterfallLayout {
    fn default() -> Self {
        Self {
            row_height: 30,
            label_width: 300,
            chart_width: 800,
            padding: 10,
            header_height: 30,
            text_space: 80,
        }
    }
}

impl WaterfallLayout {
    fn total_width(&self) -> u32 {
        self.label_width + self.chart_width + (self.padding * 3) + self.text_space
    }

    fn total_height(&self, task_count: usize) -> u32 {
        self.header_height + (task_count as u32 * self.row_height) + self.padding
    }
}

struct TimelineStats {
    global_start: Instant,
    total_micros: f64,
}

impl TimelineStats {
    fn new(run_start: Instant, tasks: &[(NodeIndex, &TaskExecution)]) -> Option<Self> {
        let global_end = tasks.iter().map(|(_, t)| t.start + t.duration).max()?;

        let total_duration = global_end.duration_since(run_start);
        // Ensure we never divide by zero
        let total_micros = total_duration.as_micros().max(1) as f64;

        Some(Self {
            global_start: run_start,
            total_micros,
        })
    }

    fn format_duration(micros: f64) -> String {
        if micros < 1000.0 {
            format!("{:.0}µs", micros)
        } else {
            format!("{:.2}ms", micros / 1000.0)
        }
    }
}

impl RunReport {
    /// Renders a waterfall chart of task execution as an SVG file.
    pub fn render_waterfall_to_file(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<(), std::io::Error> {
        std::fs::write(path, self.render_waterfall())
    }

    /// Renders a waterfall chart of task execution as an SVG string. Bars
    /// are laid out against the start of the run; failed tasks are drawn in
    /// red. Tasks that never ran have no bar.
    pub fn render_waterfall(&self) -> String {
        // 1. Prepare Data
        let mut ran_tasks: Vec<(NodeIndex, &TaskExecution)> =
            self.execution_times.iter().map(|(k, v)| (*k, v)).collect();

        ran_tasks.sort_by_key(|(_, t)| t.start);

        let Some(stats) = TimelineStats::new(self.run_start, &ran_tasks) else {
            return self.render_empty_state();
        };
        let layout = WaterfallLayout::default();

        // 2. Render
        let mut svg = String::with_capacity(ran_tasks.len() * 500); // Pre-allocate approx size

        self.write_svg_header(&mut svg, &layout, ran_tasks.len());
        self.write_grid(&mut svg, &layout, &stats);
        _ = self.write_tasks(&mut svg, &layout, &stats, &ran_tasks);

        svg.push_str("</svg>");

        svg
    }

    fn render_empty_state(&self) -> String {
        r#"<svg width="200" height="50" xmlns="http://www.w3.org/2000/svg">
            <text x="10" y="30" font-family="sans-serif">No tasks ran</text>
        </svg>"#
            .to_string()
    }

    fn write_svg_header(&self, buf: &mut String, layout: &WaterfallLayout, task_count: usize) {
        let w = layout.total_width();
        let h = layout.total_height(task_count);

        // CSS extracted for readability
        let css = r#"
        .task-row:nth-child(even) { fill: #f9f9f9; }
        .task-row:nth-child(odd) { fill: #ffffff; }
        text { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Helvetica, Arial, sans-serif; font-size: 12px; }
        .bar { fill: #3b82f6; rx: 4; }
        .bar:hover { fill: #2563eb; }
        .bar-failed { fill: #ef4444; }
        .bar-failed:hover { fill: #dc2626; }
        .label { fill: #333; }
        .time { fill: #666; font-size: 11px; }
        .grid-line { stroke: #e5e7eb; stroke-width: 1; }
        .axis-label { fill: #9ca3af; font-size: 10px; }"#;

        let _ = write!(
            buf,
            r#"<svg width="{}" height="{}" xmlns="http://www.w3.org/2000/svg"><style>{}</style><rect width="100%" height="100%" fill="white" />"#,
            w, h, css
        );
    }

    fn write_grid(&self, buf: &mut String, layout: &WaterfallLayout, stats: &TimelineStats) {
        let steps = 5;
        for i in 0..=steps {
            let pct = i as f64 / steps as f64;
            let current_micros = stats.total_micros * pct;
            let time_label = TimelineStats::format_duration(current_micros);

            let x = layout.label_width as f64
                + layout.padding as f64
                + (layout.chart_width as f64 * pct);

            let _ = write!(
                buf,
                r#"<line x1="{x:.1}" y1="{y1}" x2="{x:.1}" y2="100%" class="grid-line" /><text x="{x:.1}" y="{y_text}" text-anchor="middle" class="axis-label">{label}</text>"#,
                x = x,
                y1 = layout.header_height,
                y_text = layout.header_height - 5,
                label = time_label
            );
        }
    }

    fn write_tasks(
        &self,
        buf: &mut String,
        layout: &WaterfallLayout,
        stats: &TimelineStats,
        tasks: &[(NodeIndex, &TaskExecution)],
    ) -> std::fmt::Result {
        for (i, (node_idx, exec)) in tasks.iter().enumerate() {
            let record = &self.records[node_idx.index()];
            let safe_name = XmlSafe(&record.name);
            let bar_class = match record.runtime.disposition() {
                Some(Disposition::Failure) => "bar bar-failed",
                _ => "bar",
            };

            let y_pos = layout.header_height + (i as u32 * layout.row_height);
            let y_center = y_pos + (layout.row_height / 2);

            // Background Row
            write!(
                buf,
                r#"<rect x="0" y="{}" width="100%" height="{}" class="task-row" />"#,
                y_pos, layout.row_height
            )?;

            // Label
            write!(
                buf,
                r#"<text x="{}" y="{}" class="label" dominant-baseline="middle">{}</text>"#,
                layout.padding, y_center, safe_name
            )?;

            // Bar Math
            let offset_micros = exec.start.duration_since(stats.global_start).as_micros() as f64;
            let duration_micros = exec.duration.as_micros() as f64;

            let bar_x = layout.label_width as f64
                + layout.padding as f64
                + (offset_micros / stats.total_micros * layout.chart_width as f64);

            let bar_w = (duration_micros / stats.total_micros * layout.chart_width as f64).max(1.0);

            // Draw Bar
            write!(
                buf,
                r#"<rect x="{x:.1}" y="{y}" width="{w:.1}" height="{h}" class="{class}"><title>{name}: {dur:.2?}</title></rect>"#,
                x = bar_x,
                y = y_pos + 5,
                w = bar_w,
                h = layout.row_height - 10,
                class = bar_class,
                name = safe_name,
                dur = exec.duration
            )?;

            // Duration Label
            let dur_text = TimelineStats::format_duration(duration_micros);
            write!(
                buf,
                r#"<text x="{x:.1}" y="{y}" class="time" dominant-baseline="middle">{text}</text>"#,
                x = bar_x + bar_w + 5.0,
                y = y_center,
                text = dur_text
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::TaskFlow;
    use crate::task::Complete;

    #[test]
    fn test_summary_counts_states() {
        let mut flow = TaskFlow::new();
        let good = flow.task().name("good").chain(|done| done.success(1_u32));
        flow.task()
            .name("bad")
            .chain(|done: Complete<u32>| done.failure(std::io::Error::other("io")));
        let dead = flow
            .task()
            .name("dead")
            .after(good)
            .chain(|n, done| done.success(n));
        flow.canceller(dead).cancel();

        let report = flow.execute().unwrap();
        let summary = report.summary();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.finished, 2);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_json_summary_is_serializable() {
        let mut flow = TaskFlow::new();
        flow.task().name("solo").chain(|done| done.success(1_u32));

        let report = flow.execute().unwrap();
        let json = report.to_json().unwrap();

        assert!(json.contains("\"solo\""));
        assert!(json.contains("\"finished\""));
    }

    #[test]
    fn test_task_views_expose_metadata() {
        let mut flow = TaskFlow::new();
        flow.task().name("solo").chain(|done| done.success(1_u32));

        let report = flow.execute().unwrap();
        let views: Vec<_> = report.tasks().collect();

        assert_eq!(views.len(), 1);
        assert_eq!(views[0].name, "solo");
        assert_eq!(views[0].kind, NodeKind::Chain);
        assert_eq!(views[0].state, TaskState::Finished);
        assert_eq!(views[0].disposition, Some(Disposition::Success));
        assert!(views[0].execution.is_some());
    }

    #[test]
    fn test_mermaid_colors_by_outcome() {
        let mut flow = TaskFlow::new();
        let good = flow.task().name("good").chain(|done| done.success(1_u32));
        flow.task()
            .name("bad")
            .chain(|done: Complete<u32>| done.failure(std::io::Error::other("io")));
        let dead = flow
            .task()
            .name("dead")
            .after(good)
            .chain(|n, done| done.success(n));
        flow.canceller(dead).cancel();

        let report = flow.execute().unwrap();
        let rendered = report.render_mermaid();

        assert!(rendered.starts_with("graph LR"));
        assert!(rendered.contains("style 0 fill:#8CE99A"));
        assert!(rendered.contains("style 1 fill:#FFA8A8"));
        assert!(rendered.contains("style 2 fill:#CED4DA"));
        assert!(rendered.contains("Skipped"));
    }

    #[test]
    fn test_text_rendering_lists_every_task() {
        let mut flow = TaskFlow::new();
        let good = flow.task().name("good").chain(|done| done.success(1_u32));
        let dead = flow
            .task()
            .name("dead")
            .after(good)
            .chain(|n, done| done.success(n));
        flow.canceller(dead).cancel();

        let report = flow.execute().unwrap();
        let rendered = report.render_text();

        assert!(rendered.contains("good"));
        assert!(rendered.contains("dead"));
        assert!(rendered.contains("ok"));
        assert!(rendered.contains("cancelled"));
    }

    #[test]
    fn test_waterfall_renders_svg() {
        let mut flow = TaskFlow::new();
        flow.task().name("alpha & beta").chain(|done| {
            std::thread::sleep(std::time::Duration::from_millis(5));
            done.success(1_u32)
        });

        let report = flow.execute().unwrap();
        let svg = report.render_waterfall();

        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        // XML-escaped task name.
        assert!(svg.contains("alpha &amp; beta"));
    }

    #[test]
    fn test_waterfall_empty_state() {
        let report = TaskFlow::new().execute().unwrap();
        assert!(report.render_waterfall().contains("No tasks ran"));
    }
}
