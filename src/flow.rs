use std::any::type_name;
use std::borrow::Cow;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::destination::{Destination, Inline};
use crate::error::RunError;
use crate::handle::{Ancestors, TaskHandle};
use crate::outcome::Outcome;
use crate::runner::RunReport;
use crate::task::{CancelHandle, CancelToken, Complete, NodeBody, NodeKind, NodeRuntime, NodeSlot};

/// A composable graph of tasks.
///
/// `TaskFlow` is used to define the task graph. You add tasks with
/// [`task`](TaskFlow::task) and wire them together using their
/// [`TaskHandle`]s: chain a task after a predecessor, fork sibling branches
/// off a shared anchor, join the outcomes of several ancestors or observe
/// them with a terminal completion sink.
///
/// Once wired, [`execute`](TaskFlow::execute) runs the whole graph on a
/// thread pool and returns a [`RunReport`].
///
/// # Example
///
/// ```
/// use ramify::TaskFlow;
///
/// let mut flow = TaskFlow::new();
/// let root = flow.task().name("answer").chain(|done| done.success(42_u32));
/// let doubled = flow.task().after(root).chain(|n, done| done.success(n * 2));
///
/// let report = flow.execute().unwrap();
/// assert_eq!(report.outcome(doubled).unwrap().success(), Some(&84));
/// ```
pub struct TaskFlow {
    pub(crate) graph: Graph<NodeSlot, ()>,
    pub(crate) abort: CancelToken,
}

impl TaskFlow {
    /// Creates a new, empty flow.
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            abort: CancelToken::new(),
        }
    }

    /// The entry point. Starts an unnamed task definition.
    pub fn task(&mut self) -> TaskDef<'_> {
        TaskDef {
            flow: self,
            name: None,
        }
    }

    /// Executes every task in dependency order on a thread pool, consuming
    /// the flow. Returns once all tasks are terminal.
    pub fn execute(self) -> Result<RunReport, RunError> {
        crate::runner::run_flow(self)
    }

    /// Returns a handle that can request cancellation of one task from any
    /// thread, including from inside other task bodies.
    pub fn canceller<S>(&self, handle: TaskHandle<S>) -> CancelHandle {
        CancelHandle {
            runtime: self.graph[handle.index].runtime.clone(),
        }
    }

    /// Returns the flow-wide cancellation token. Tripping it stops further
    /// dispatch; tasks already executing are left to finish.
    pub fn cancel_token(&self) -> CancelToken {
        self.abort.clone()
    }

    /// Number of tasks in the graph, hidden anchors included.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub(crate) fn add_node(
        &mut self,
        name: Cow<'static, str>,
        kind: NodeKind,
        result_type: &'static str,
        deps: Vec<NodeIndex>,
        body: NodeBody,
    ) -> NodeIndex {
        let index = self.graph.add_node(NodeSlot {
            name,
            kind,
            result_type,
            deps: deps.clone(),
            runtime: NodeRuntime::new(),
            body: Some(body),
        });

        for dependency in deps {
            self.graph.add_edge(dependency, index, ());
        }

        index
    }
}

impl Default for TaskFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let slot = &self.graph[index];
            let name = slot.name.replace('"', "\\\""); // Simple escape
            writeln!(
                f,
                "    {:?}[\"{} ({})\"]",
                index.index(),
                name,
                slot.kind.label()
            )?;
        }

        for edge in self.graph.edge_indices() {
            let (source, target) = self.graph.edge_endpoints(edge).unwrap();
            let source_slot = &self.graph[source];
            let type_name = source_slot
                .result_type
                .replace('<', "&lt;")
                .replace('>', "&gt;");
            writeln!(
                f,
                "    {:?} -- \"{}\" --> {:?}",
                source.index(),
                type_name,
                target.index()
            )?;
        }

        Ok(())
    }
}

/// A task being defined, before it is wired into the graph.
pub struct TaskDef<'a> {
    flow: &'a mut TaskFlow,
    name: Option<Cow<'static, str>>,
}

impl<'a> TaskDef<'a> {
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a root task with no predecessor. The body receives only its
    /// completion handle and must resolve it exactly once.
    pub fn chain<F, R>(self, body: F) -> TaskHandle<R>
    where
        F: FnOnce(Complete<R>) + Send + 'static,
        R: Send + Sync + 'static,
    {
        let name = self.name.unwrap_or(type_name::<F>().into());
        let index = self.flow.add_node(
            name,
            NodeKind::Chain,
            type_name::<R>(),
            vec![],
            Box::new(move |_inputs, settle| {
                let done = Complete::new(settle);
                body(done);
            }),
        );

        TaskHandle::new(index)
    }

    /// Adds a root branch. A hidden always-succeeding anchor task is
    /// created behind it, so the branch behaves like any other fork: more
    /// siblings can be hung off the returned handle's ancestry later.
    pub fn fork<F, R>(self, body: F) -> TaskHandle<R>
    where
        F: FnOnce(Complete<R>) + Send + 'static,
        R: Send + Sync + 'static,
    {
        let name = self.name.unwrap_or(type_name::<F>().into());
        let anchor = self.flow.add_node(
            "anchor".into(),
            NodeKind::Anchor,
            type_name::<()>(),
            vec![],
            Box::new(|_inputs, settle| {
                Complete::new(settle).success(());
            }),
        );

        let index = self.flow.add_node(
            name,
            NodeKind::Fork,
            type_name::<R>(),
            vec![anchor],
            Box::new(move |inputs, settle| {
                let done = Complete::new(settle);
                match TaskHandle::<()>::new(anchor).read(&inputs[0]) {
                    Outcome::Success(()) => body(done),
                    Outcome::Failure(error) => done.settle(Outcome::Failure(error)),
                }
            }),
        );

        TaskHandle::new(index)
    }

    /// Wires the task to run after `predecessor`, consuming its success
    /// value. If the predecessor failed, the new task short-circuits and
    /// carries that failure verbatim instead of running its body.
    pub fn after<S>(self, predecessor: TaskHandle<S>) -> SeqBinder<'a, S>
    where
        S: Clone + Send + Sync + 'static,
    {
        SeqBinder {
            flow: self.flow,
            name: self.name,
            predecessor,
        }
    }

    /// Wires the task to observe a whole ancestor group: a single handle, a
    /// tuple of up to twelve, or a `Vec` of same-typed handles. Observers
    /// receive raw outcomes and never short-circuit.
    pub fn observing<A>(self, ancestors: A) -> GroupBinder<'a, A>
    where
        A: Ancestors + Send + 'static,
    {
        GroupBinder {
            flow: self.flow,
            name: self.name,
            ancestors,
        }
    }
}

/// Binder for tasks with exactly one predecessor.
pub struct SeqBinder<'a, S: Clone + Send + Sync + 'static> {
    flow: &'a mut TaskFlow,
    name: Option<Cow<'static, str>>,
    predecessor: TaskHandle<S>,
}

impl<'a, S> SeqBinder<'a, S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sequential continuation. Runs the body with the predecessor's
    /// success value, or short-circuits its failure.
    pub fn chain<F, R>(self, body: F) -> TaskHandle<R>
    where
        F: FnOnce(S, Complete<R>) + Send + 'static,
        R: Send + Sync + 'static,
    {
        self.sequence(NodeKind::Chain, body)
    }

    /// Sibling branch on the predecessor. Several forks off the same handle
    /// form a branch group anchored on it; each branch short-circuits the
    /// anchor's failure independently.
    pub fn fork<F, R>(self, body: F) -> TaskHandle<R>
    where
        F: FnOnce(S, Complete<R>) + Send + 'static,
        R: Send + Sync + 'static,
    {
        self.sequence(NodeKind::Fork, body)
    }

    fn sequence<F, R>(self, kind: NodeKind, body: F) -> TaskHandle<R>
    where
        F: FnOnce(S, Complete<R>) + Send + 'static,
        R: Send + Sync + 'static,
    {
        let predecessor = self.predecessor;
        let name = self.name.unwrap_or(type_name::<F>().into());
        let index = self.flow.add_node(
            name,
            kind,
            type_name::<R>(),
            vec![predecessor.index],
            Box::new(move |inputs, settle| {
                let done = Complete::new(settle);
                match predecessor.read(&inputs[0]) {
                    Outcome::Success(value) => body(value, done),
                    Outcome::Failure(error) => done.settle(Outcome::Failure(error)),
                }
            }),
        );

        TaskHandle::new(index)
    }
}

/// Binder for tasks observing a whole ancestor group.
pub struct GroupBinder<'a, A: Ancestors> {
    flow: &'a mut TaskFlow,
    name: Option<Cow<'static, str>>,
    ancestors: A,
}

impl<'a, A> GroupBinder<'a, A>
where
    A: Ancestors + Send + 'static,
{
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Combines the raw outcomes of every ancestor, oldest first, into a
    /// new result. Unlike chains, a join always runs its body: ancestor
    /// failures arrive as values for the combiner to inspect.
    pub fn join<F, R>(self, combine: F) -> TaskHandle<R>
    where
        F: FnOnce(A::Outcomes, Complete<R>) + Send + 'static,
        R: Send + Sync + 'static,
    {
        let deps = self.ancestors.indices();
        let ancestors = self.ancestors;
        let name = self.name.unwrap_or(type_name::<F>().into());
        let index = self.flow.add_node(
            name,
            NodeKind::Join,
            type_name::<R>(),
            deps,
            Box::new(move |inputs, settle| {
                let done = Complete::new(settle);
                let outcomes = ancestors.gather(&inputs);
                combine(outcomes, done);
            }),
        );

        TaskHandle::new(index)
    }

    /// Terminal sink, invoked inline on whichever worker resolved the last
    /// observed ancestor. Fires exactly once with the raw outcomes.
    pub fn on_completion<F>(self, callback: F)
    where
        F: FnOnce(A::Outcomes) + Send + 'static,
    {
        self.on_completion_at(Inline, callback)
    }

    /// Terminal sink with an explicit [`Destination`] deciding where the
    /// callback runs. A panic inside an inline callback surfaces as the
    /// sink task failing rather than being swallowed.
    pub fn on_completion_at<D, F>(self, destination: D, callback: F)
    where
        D: Destination + 'static,
        F: FnOnce(A::Outcomes) + Send + 'static,
    {
        let deps = self.ancestors.indices();
        let ancestors = self.ancestors;
        let name = self.name.unwrap_or(type_name::<F>().into());
        self.flow.add_node(
            name,
            NodeKind::Sink,
            type_name::<()>(),
            deps,
            Box::new(move |inputs, settle| {
                let done = Complete::<()>::new(settle);
                let outcomes = ancestors.gather(&inputs);
                destination.dispatch(Box::new(move || callback(outcomes)));
                done.success(());
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_injects_hidden_anchor() {
        let mut flow = TaskFlow::new();
        let branch = flow.task().name("branch").fork(|done| done.success(1_u32));

        // One visible fork plus its hidden anchor.
        assert_eq!(flow.task_count(), 2);

        let slot = &flow.graph[branch.index()];
        assert_eq!(slot.kind, NodeKind::Fork);
        assert_eq!(slot.deps.len(), 1);

        let anchor = &flow.graph[slot.deps[0]];
        assert_eq!(anchor.kind, NodeKind::Anchor);
        assert!(anchor.deps.is_empty());
    }

    #[test]
    fn test_observing_registers_ancestors_in_order() {
        let mut flow = TaskFlow::new();
        let a = flow.task().chain(|done| done.success(1_u32));
        let b = flow.task().chain(|done| done.success("two"));
        let joined = flow
            .task()
            .observing((a, b))
            .join(|(_, _), done| done.success(0_u8));

        let slot = &flow.graph[joined.index()];
        assert_eq!(slot.kind, NodeKind::Join);
        assert_eq!(slot.deps, vec![a.index(), b.index()]);
    }

    #[test]
    fn test_sink_adds_terminal_node() {
        let mut flow = TaskFlow::new();
        let root = flow.task().chain(|done| done.success(1_u32));
        flow.task().name("notify").observing(root).on_completion(|_| {});

        assert_eq!(flow.task_count(), 2);
        let sink = &flow.graph[NodeIndex::new(1)];
        assert_eq!(sink.kind, NodeKind::Sink);
        assert_eq!(sink.deps, vec![root.index()]);
    }

    #[test]
    fn test_display_renders_mermaid() {
        let mut flow = TaskFlow::new();
        let root = flow.task().name("fetch").chain(|done| done.success(1_u32));
        flow.task()
            .name("report")
            .after(root)
            .chain(|n, done| done.success(n));

        let rendered = flow.to_string();
        assert!(rendered.starts_with("graph LR"));
        assert!(rendered.contains("0[\"fetch (chain)\"]"));
        assert!(rendered.contains("1[\"report (chain)\"]"));
        assert!(rendered.contains("u32"));
        assert!(rendered.contains("-->"));
    }
}
