use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Lifecycle of a single task in the flow.
///
/// A task starts `Waiting`, becomes `Ready` once every dependency is
/// terminal, `Executing` when a worker picks it up, and ends `Finished` when
/// its completion resolves. A cancellation request before the body starts
/// moves it straight to `Cancelled` with its result slot left unset; a
/// request mid-flight flips the state but lets the body's eventual
/// resolution win, so dependents always observe the written outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TaskState {
    Waiting = 0,
    Ready = 1,
    Executing = 2,
    Finished = 3,
    Cancelled = 4,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Waiting,
            1 => TaskState::Ready,
            2 => TaskState::Executing,
            3 => TaskState::Finished,
            4 => TaskState::Cancelled,
            _ => panic!("invalid task state {value}"),
        }
    }

    /// Terminal states never transition again, except that a `Cancelled`
    /// task whose body was already running may still finish.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Cancelled)
    }
}

/// Whether a resolved task ended in success or failure, independent of the
/// concrete result type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Success,
    Failure,
}

/// Atomic state machine for one task, plus the cancellation-requested flag.
///
/// The flag is distinct from the state on purpose: a request against an
/// `Executing` task does not interrupt the body, but the body can observe
/// the flag and bail out cooperatively.
#[derive(Debug)]
pub(crate) struct StateCell {
    state: AtomicU8,
    cancel_requested: AtomicBool,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(TaskState::Waiting as u8),
            cancel_requested: AtomicBool::new(false),
        }
    }

    pub fn get(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// `Waiting -> Ready`, once all dependencies are terminal. Fails only if
    /// a cancellation request got there first.
    pub fn mark_ready(&self) -> bool {
        self.transition(TaskState::Waiting, TaskState::Ready)
    }

    /// `Ready -> Executing`, the gate right before the body runs. Fails if
    /// a cancellation request got there first; the caller must then skip
    /// the body.
    pub fn begin(&self) -> bool {
        self.transition(TaskState::Ready, TaskState::Executing)
    }

    /// Unconditional move to `Finished`. A late resolution overrides a
    /// mid-flight `Cancelled`; the written outcome is what dependents see.
    pub fn finish(&self) {
        self.state.store(TaskState::Finished as u8, Ordering::SeqCst);
    }

    /// Records the cancellation request and, unless the task already
    /// finished, flips the state to `Cancelled`. Returns whether the request
    /// landed before the task was terminal.
    pub fn request_cancel(&self) -> bool {
        self.cancel_requested.store(true, Ordering::SeqCst);

        loop {
            let current = self.state.load(Ordering::SeqCst);
            match TaskState::from_u8(current) {
                TaskState::Waiting | TaskState::Ready | TaskState::Executing => {
                    let swapped = self
                        .state
                        .compare_exchange(
                            current,
                            TaskState::Cancelled as u8,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok();
                    if swapped {
                        return true;
                    }
                }
                TaskState::Finished | TaskState::Cancelled => return false,
            }
        }
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), TaskState::Waiting);
        assert!(cell.mark_ready());
        assert!(cell.begin());
        assert_eq!(cell.get(), TaskState::Executing);
        cell.finish();
        assert_eq!(cell.get(), TaskState::Finished);
        assert!(cell.get().is_terminal());
    }

    #[test]
    fn test_cancel_before_start_skips_body() {
        let cell = StateCell::new();
        assert!(cell.request_cancel());
        assert_eq!(cell.get(), TaskState::Cancelled);
        assert!(!cell.mark_ready());
        assert!(!cell.begin());
    }

    #[test]
    fn test_cancel_between_ready_and_begin() {
        let cell = StateCell::new();
        cell.mark_ready();
        assert!(cell.request_cancel());
        assert!(!cell.begin());
    }

    #[test]
    fn test_late_resolution_wins_over_cancel() {
        let cell = StateCell::new();
        cell.mark_ready();
        cell.begin();
        assert!(cell.request_cancel());
        assert!(cell.cancel_requested());
        cell.finish();
        assert_eq!(cell.get(), TaskState::Finished);
    }

    #[test]
    fn test_cancel_after_finish_is_inert() {
        let cell = StateCell::new();
        cell.mark_ready();
        cell.begin();
        cell.finish();
        assert!(!cell.request_cancel());
        assert_eq!(cell.get(), TaskState::Finished);
        // The flag still records that someone asked.
        assert!(cell.cancel_requested());
    }
}
