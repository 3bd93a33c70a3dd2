use std::sync::Arc;

pub use anyhow::Error as BodyError;
use thiserror::Error;

/// An opaque task failure, carried verbatim to every observer.
///
/// Task bodies fail with any error convertible into [`anyhow::Error`]; the
/// flow wraps it once and hands out cheap clones, so a single failure can be
/// observed by a chain short-circuit, a join and a completion sink at the
/// same time. Use [`TaskError::downcast_ref`] to recover the concrete type.
#[derive(Debug, Error, Clone)]
#[error(transparent)]
pub struct TaskError(#[from] pub(crate) Arc<anyhow::Error>);

impl TaskError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    pub(crate) fn unassigned() -> Self {
        Self::new(ResultNotAssigned)
    }

    pub(crate) fn abandoned() -> Self {
        Self::new(BodyAbandoned)
    }

    /// Returns `true` if this failure stands in for an ancestor that never
    /// assigned its result. See [`ResultNotAssigned`].
    pub fn is_unassigned(&self) -> bool {
        self.0.is::<ResultNotAssigned>()
    }

    /// Returns `true` if the task's body dropped its completion handle
    /// without resolving it. See [`BodyAbandoned`].
    pub fn is_abandoned(&self) -> bool {
        self.0.is::<BodyAbandoned>()
    }

    /// Attempts to view the underlying error as a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// Two errors observed at different nodes may be the same propagated
    /// failure; this checks for that without comparing messages.
    pub fn same_origin(&self, other: &TaskError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(e: anyhow::Error) -> Self {
        TaskError(Arc::new(e))
    }
}

/// A node read an ancestor's result slot and found it unset.
///
/// Reachable when the ancestor was cancelled before its body ran. The fault
/// is surfaced as a regular `Failure` in the slot where the missing result
/// would have been; it never aborts the rest of the graph.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("ancestor task finished without assigning a result")]
pub struct ResultNotAssigned;

/// A task body dropped its completion handle without resolving it.
///
/// Surfaced as that task's failure so a run can never deadlock on a
/// forgotten callback.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("task body dropped its completion handle without resolving it")]
pub struct BodyAbandoned;

/// Faults of the runner itself. Task failures are not run errors; they
/// propagate through outcomes.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("cycle detected in task graph")]
    Cycle,

    #[error("invalid progress bar template")]
    Template(#[from] indicatif::style::TemplateError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_downcast() {
        let err = TaskError::unassigned();
        assert!(err.is_unassigned());
        assert!(!err.is_abandoned());
        assert_eq!(err.downcast_ref::<ResultNotAssigned>(), Some(&ResultNotAssigned));

        let err = TaskError::abandoned();
        assert!(err.is_abandoned());
        assert!(!err.is_unassigned());
    }

    #[test]
    fn test_userland_error_carried_verbatim() {
        #[derive(Debug, Error, PartialEq)]
        #[error("disk full")]
        struct DiskFull;

        let err = TaskError::new(DiskFull);
        assert_eq!(err.downcast_ref::<DiskFull>(), Some(&DiskFull));
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn test_clones_share_origin() {
        let err = TaskError::new(anyhow::anyhow!("boom"));
        let observed = err.clone();
        assert!(err.same_origin(&observed));
        assert!(!err.same_origin(&TaskError::new(anyhow::anyhow!("boom"))));
    }
}
