use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use petgraph::graph::NodeIndex;

use crate::cell::{Dynamic, ResultCell};
use crate::error::TaskError;
use crate::outcome::Outcome;
use crate::state::{Disposition, StateCell, TaskState};

/// Role of a node within the flow, used for reporting and rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Runs after one predecessor, consuming its success value.
    Chain,
    /// Branch of a group sharing a single anchor predecessor.
    Fork,
    /// Combines the raw outcomes of up to twelve ancestors.
    Join,
    /// Terminal observer, fires exactly once with raw outcomes.
    Sink,
    /// Hidden always-succeeding unit task backing root forks.
    Anchor,
}

impl NodeKind {
    pub fn label(self) -> &'static str {
        match self {
            NodeKind::Chain => "chain",
            NodeKind::Fork => "fork",
            NodeKind::Join => "join",
            NodeKind::Sink => "sink",
            NodeKind::Anchor => "anchor",
        }
    }
}

/// Shared mutable portion of a node. Lives behind an `Arc` so cancellation
/// handles and run reports can outlive the flow that created it.
pub(crate) struct NodeRuntime {
    pub state: StateCell,
    pub cell: ResultCell,
    disposition: AtomicU8,
}

impl NodeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: StateCell::new(),
            cell: ResultCell::default(),
            disposition: AtomicU8::new(0),
        })
    }

    pub fn set_disposition(&self, disposition: Disposition) {
        let raw = match disposition {
            Disposition::Success => 1,
            Disposition::Failure => 2,
        };
        self.disposition.store(raw, Ordering::SeqCst);
    }

    /// `None` until the node resolved.
    pub fn disposition(&self) -> Option<Disposition> {
        match self.disposition.load(Ordering::SeqCst) {
            1 => Some(Disposition::Success),
            2 => Some(Disposition::Failure),
            _ => None,
        }
    }
}

/// Erased task body. Receives dependency snapshots in declaration order,
/// `None` where a cancelled ancestor never assigned its slot.
pub(crate) type NodeBody = Box<dyn FnOnce(Vec<Option<Dynamic>>, Settle) + Send + 'static>;

/// Graph node payload. The body is taken out exactly once when the node is
/// dispatched; everything else stays for reporting.
pub(crate) struct NodeSlot {
    pub name: Cow<'static, str>,
    pub kind: NodeKind,
    pub result_type: &'static str,
    /// Dependencies in the order they were declared. Graph edges carry the
    /// same information but not reliably in this order.
    pub deps: Vec<NodeIndex>,
    pub runtime: Arc<NodeRuntime>,
    pub body: Option<NodeBody>,
}

/// Message a worker sends back to the dispatch loop when a node stops
/// occupying it, whether the body ran or was skipped.
pub(crate) struct Settled {
    pub index: NodeIndex,
    pub started: Instant,
    pub duration: Duration,
    pub executed: bool,
}

struct SettleCore {
    index: NodeIndex,
    runtime: Arc<NodeRuntime>,
    notify: Sender<Settled>,
    started: Instant,
}

impl SettleCore {
    fn resolve(&self, outcome: Dynamic, disposition: Disposition) {
        if self.runtime.cell.assign(outcome) {
            self.runtime.set_disposition(disposition);
        }
        self.runtime.state.finish();
        // The dispatch loop may already have shut down on cancel-all.
        let _ = self.notify.send(Settled {
            index: self.index,
            started: self.started,
            duration: self.started.elapsed(),
            executed: true,
        });
    }

    fn skip(&self) {
        let _ = self.notify.send(Settled {
            index: self.index,
            started: self.started,
            duration: Duration::ZERO,
            executed: false,
        });
    }
}

/// Type-erased completion channel for one node. Exactly one exists per
/// dispatched node and it must send exactly one `Settled` message; the
/// typed [`Complete`] wrapper enforces that even across panics.
pub(crate) struct Settle {
    core: Option<SettleCore>,
}

impl Settle {
    pub fn new(index: NodeIndex, runtime: Arc<NodeRuntime>, notify: Sender<Settled>) -> Self {
        Self {
            core: Some(SettleCore {
                index,
                runtime,
                notify,
                started: Instant::now(),
            }),
        }
    }

    /// Gate right before running the body. `false` means a cancellation
    /// request won the race and the body must be skipped.
    pub fn begin(&self) -> bool {
        match &self.core {
            Some(core) => core.runtime.state.begin(),
            None => false,
        }
    }

    pub fn cancel_requested(&self) -> bool {
        match &self.core {
            Some(core) => core.runtime.state.cancel_requested(),
            None => false,
        }
    }

    /// Notifies the dispatch loop that the node was skipped. The result
    /// slot stays unset.
    pub fn skip_cancelled(mut self) {
        if let Some(core) = self.core.take() {
            core.skip();
        }
    }

    pub fn finish(&mut self, outcome: Dynamic, disposition: Disposition) {
        if let Some(core) = self.core.take() {
            core.resolve(outcome, disposition);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.core.is_some()
    }
}

/// Single-use completion handle passed to a task body.
///
/// Consuming it with [`success`](Complete::success),
/// [`failure`](Complete::failure) or [`settle`](Complete::settle) assigns
/// the task's result exactly once; the by-value receivers make a second
/// resolution unrepresentable. Dropping it unresolved still settles the
/// task, as a failure, so the run can never stall on a forgotten handle.
pub struct Complete<S: Send + Sync + 'static> {
    inner: Settle,
    _marker: PhantomData<fn(S)>,
}

impl<S: Send + Sync + 'static> Complete<S> {
    pub(crate) fn new(inner: Settle) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn success(mut self, value: S) {
        self.inner
            .finish(Arc::new(Outcome::Success(value)), Disposition::Success);
    }

    pub fn failure(mut self, error: impl Into<anyhow::Error>) {
        self.inner.finish(
            Arc::new(Outcome::<S>::Failure(TaskError::new(error))),
            Disposition::Failure,
        );
    }

    pub fn settle(mut self, outcome: Outcome<S>) {
        let disposition = match &outcome {
            Outcome::Success(_) => Disposition::Success,
            Outcome::Failure(_) => Disposition::Failure,
        };
        self.inner.finish(Arc::new(outcome), disposition);
    }

    /// Cooperative cancellation check. Long bodies should poll this and
    /// resolve early when it turns true; nothing interrupts them otherwise.
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested()
    }
}

#[cfg(feature = "tokio")]
impl<S: Send + Sync + 'static> Complete<S> {
    /// Hands the completion to a future running on `handle`. The task stays
    /// `Executing` until the future resolves it from the runtime's thread;
    /// dropping the future without finishing still settles the task through
    /// the handle's drop guard.
    pub fn bind<F, E>(self, handle: &tokio::runtime::Handle, future: F)
    where
        F: std::future::Future<Output = Result<S, E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        handle.spawn(async move {
            match future.await {
                Ok(value) => self.success(value),
                Err(error) => self.failure(error),
            }
        });
    }
}

impl<S: Send + Sync + 'static> Drop for Complete<S> {
    fn drop(&mut self) {
        if !self.inner.is_pending() {
            return;
        }
        let error = if std::thread::panicking() {
            TaskError::new(anyhow::anyhow!("task body panicked"))
        } else {
            tracing::warn!("Completion handle dropped without resolving, recording failure");
            TaskError::abandoned()
        };
        self.inner.finish(
            Arc::new(Outcome::<S>::Failure(error)),
            Disposition::Failure,
        );
    }
}

/// Requests cancellation of a single task. Cloneable and usable from any
/// thread, including from inside other task bodies.
#[derive(Clone)]
pub struct CancelHandle {
    pub(crate) runtime: Arc<NodeRuntime>,
}

impl CancelHandle {
    /// Returns `true` if the request landed before the task was terminal.
    /// A task that never started stays unresolved; one already executing
    /// keeps running and its own resolution wins.
    pub fn cancel(&self) -> bool {
        self.runtime.state.request_cancel()
    }

    pub fn state(&self) -> TaskState {
        self.runtime.state.get()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.runtime.state.cancel_requested()
    }
}

/// Flow-wide cancellation flag. The dispatch loop checks it before every
/// dispatch and cancels whatever has not started yet; running bodies are
/// left to finish or observe the flag themselves.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    fn harness() -> (Arc<NodeRuntime>, Settle, mpsc::Receiver<Settled>) {
        let (notify, settled) = mpsc::channel();
        let runtime = NodeRuntime::new();
        runtime.state.mark_ready();
        let settle = Settle::new(NodeIndex::new(0), runtime.clone(), notify);
        (runtime, settle, settled)
    }

    #[test]
    fn test_success_assigns_cell_and_notifies() {
        let (runtime, settle, settled) = harness();
        assert!(settle.begin());

        let done = Complete::<u32>::new(settle);
        done.success(7);

        let message = settled.recv().unwrap();
        assert!(message.executed);
        assert_eq!(runtime.state.get(), TaskState::Finished);
        assert_eq!(runtime.disposition(), Some(Disposition::Success));

        let stored = runtime.cell.snapshot().unwrap();
        let outcome = stored.downcast_ref::<Outcome<u32>>().unwrap();
        assert_eq!(outcome.success(), Some(&7));
    }

    #[test]
    fn test_dropped_handle_settles_as_failure() {
        let (runtime, settle, settled) = harness();
        settle.begin();

        drop(Complete::<u32>::new(settle));

        let message = settled.recv().unwrap();
        assert!(message.executed);
        let stored = runtime.cell.snapshot().unwrap();
        let outcome = stored.downcast_ref::<Outcome<u32>>().unwrap();
        assert!(outcome.failure().unwrap().is_abandoned());
        assert_eq!(runtime.disposition(), Some(Disposition::Failure));
    }

    #[test]
    fn test_panicking_body_settles_as_failure() {
        let (runtime, settle, settled) = harness();
        settle.begin();
        let done = Complete::<u32>::new(settle);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _hold = done;
            panic!("boom");
        }));
        assert!(result.is_err());

        let message = settled.recv().unwrap();
        assert!(message.executed);
        let stored = runtime.cell.snapshot().unwrap();
        let outcome = stored.downcast_ref::<Outcome<u32>>().unwrap();
        let error = outcome.failure().unwrap();
        assert!(!error.is_abandoned());
        assert!(error.to_string().contains("panicked"));
    }

    #[test]
    fn test_skipped_node_notifies_without_result() {
        let (runtime, settle, settled) = harness();
        runtime.state.request_cancel();
        assert!(!settle.begin());

        settle.skip_cancelled();

        let message = settled.recv().unwrap();
        assert!(!message.executed);
        assert!(runtime.cell.snapshot().is_none());
        assert_eq!(runtime.state.get(), TaskState::Cancelled);
    }

    #[test]
    fn test_cancel_handle_reports_state() {
        let runtime = NodeRuntime::new();
        let handle = CancelHandle {
            runtime: runtime.clone(),
        };
        assert_eq!(handle.state(), TaskState::Waiting);
        assert!(handle.cancel());
        assert!(handle.is_cancel_requested());
        assert_eq!(handle.state(), TaskState::Cancelled);
        // A second request is idempotent but reports the task already gone.
        assert!(!handle.cancel());
    }

    #[cfg(feature = "tokio")]
    #[test]
    fn test_bind_resolves_from_async_context() {
        let (runtime, settle, settled) = harness();
        settle.begin();
        let done = Complete::<String>::new(settle);

        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        done.bind(rt.handle(), async {
            Ok::<_, anyhow::Error>("ready".to_string())
        });
        rt.block_on(async {
            while runtime.cell.snapshot().is_none() {
                tokio::task::yield_now().await;
            }
        });

        let message = settled.recv().unwrap();
        assert!(message.executed);
        let stored = runtime.cell.snapshot().unwrap();
        let outcome = stored.downcast_ref::<Outcome<String>>().unwrap();
        assert_eq!(outcome.success().map(String::as_str), Some("ready"));
    }
}
