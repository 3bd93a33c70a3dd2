use petgraph::graph::NodeIndex;

use crate::cell::Dynamic;
use crate::error::TaskError;
use crate::outcome::Outcome;

/// A type-safe reference to a task in a flow.
///
/// A `TaskHandle<S>` is a lightweight, copyable token that represents the
/// future outcome of a task producing `S`. It is what combinators accept
/// when wiring successors: chaining on a handle makes the new task run
/// after it, observing a group of handles makes the new task see all of
/// their outcomes.
///
/// Handles stay valid across [`TaskFlow::execute`](crate::TaskFlow::execute)
/// and can be used afterwards to look the task up in the
/// [`RunReport`](crate::RunReport).
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct TaskHandle<S> {
    pub(crate) index: NodeIndex,
    _phantom: std::marker::PhantomData<S>,
}

impl<S> TaskHandle<S> {
    pub(crate) fn new(index: NodeIndex) -> Self {
        Self {
            index,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Returns the underlying `NodeIndex` of the task in the graph.
    pub fn index(&self) -> NodeIndex {
        self.index
    }
}

impl<S> Clone for TaskHandle<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for TaskHandle<S> {}

impl<S> TaskHandle<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Reads this task's outcome out of a dependency slot. An unset slot
    /// means the ancestor was cancelled before assigning a result, which
    /// surfaces as a [`ResultNotAssigned`](crate::ResultNotAssigned)
    /// failure rather than blocking.
    ///
    /// # Panics
    ///
    /// Panics when the slot holds an outcome of a different type, which can
    /// only happen if a handle is used against a flow that did not issue it.
    pub(crate) fn read(&self, slot: &Option<Dynamic>) -> Outcome<S> {
        match slot {
            Some(stored) => stored
                .downcast_ref::<Outcome<S>>()
                .expect("Type mismatch in dependency resolution")
                .clone(),
            None => Outcome::Failure(TaskError::unassigned()),
        }
    }
}

/// The ancestor set of a join or completion sink.
///
/// Implemented for a single handle, for tuples of up to twelve handles of
/// mixed types, and for `Vec` of same-typed handles. Outcomes are gathered
/// in declaration order, oldest ancestor first, and arrive raw: an
/// ancestor's failure is handed over verbatim instead of short-circuiting
/// the observer.
pub trait Ancestors {
    /// The gathered outcomes, shaped like the ancestor set itself.
    type Outcomes: Send + 'static;

    /// Graph indices of the ancestors, in declaration order.
    fn indices(&self) -> Vec<NodeIndex>;

    /// Reads every ancestor's slot, mapping unset slots to
    /// [`ResultNotAssigned`](crate::ResultNotAssigned) failures.
    ///
    /// # Panics
    ///
    /// Panics when a slot holds a result of an unexpected type.
    fn gather(&self, slots: &[Option<Dynamic>]) -> Self::Outcomes;
}

impl<S> Ancestors for TaskHandle<S>
where
    S: Clone + Send + Sync + 'static,
{
    type Outcomes = Outcome<S>;

    fn indices(&self) -> Vec<NodeIndex> {
        vec![self.index]
    }

    fn gather(&self, slots: &[Option<Dynamic>]) -> Self::Outcomes {
        self.read(&slots[0])
    }
}

impl<S> Ancestors for Vec<TaskHandle<S>>
where
    S: Clone + Send + Sync + 'static,
{
    type Outcomes = Vec<Outcome<S>>;

    fn indices(&self) -> Vec<NodeIndex> {
        self.iter().map(|handle| handle.index).collect()
    }

    fn gather(&self, slots: &[Option<Dynamic>]) -> Self::Outcomes {
        self.iter()
            .zip(slots)
            .map(|(handle, slot)| handle.read(slot))
            .collect()
    }
}

macro_rules! impl_ancestors {
    ($($A:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($A),*> Ancestors for ($(TaskHandle<$A>,)*)
        where
            $($A: Clone + Send + Sync + 'static),* {
            type Outcomes = ($(Outcome<$A>,)*);

            fn indices(&self) -> Vec<NodeIndex> {
                let ($($A,)*) = self;
                vec![$($A.index,)*]
            }

            fn gather(&self, slots: &[Option<Dynamic>]) -> Self::Outcomes {
                let ($($A,)*) = self;

                let mut iter = slots.iter();

                ($($A.read(iter.next().unwrap()),)*)
            }
        }
    };
}

impl_ancestors!(A);
impl_ancestors!(A, B);
impl_ancestors!(A, B, C);
impl_ancestors!(A, B, C, D);
impl_ancestors!(A, B, C, D, E);
impl_ancestors!(A, B, C, D, E, F);
impl_ancestors!(A, B, C, D, E, F, G);
impl_ancestors!(A, B, C, D, E, F, G, H);
impl_ancestors!(A, B, C, D, E, F, G, H, I);
impl_ancestors!(A, B, C, D, E, F, G, H, I, J);
impl_ancestors!(A, B, C, D, E, F, G, H, I, J, K);
impl_ancestors!(A, B, C, D, E, F, G, H, I, J, K, L);

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_read_unset_slot_is_unassigned_failure() {
        let handle = TaskHandle::<u32>::new(NodeIndex::new(0));
        let outcome = handle.read(&None);
        assert!(outcome.failure().unwrap().is_unassigned());
    }

    #[test]
    fn test_read_assigned_slot() {
        let handle = TaskHandle::<u32>::new(NodeIndex::new(0));
        let slot: Option<Dynamic> = Some(Arc::new(Outcome::Success(41_u32)) as Dynamic);
        assert_eq!(handle.read(&slot).success(), Some(&41));
    }

    #[test]
    fn test_gather_tuple_keeps_declaration_order() {
        let first = TaskHandle::<u32>::new(NodeIndex::new(0));
        let second = TaskHandle::<&'static str>::new(NodeIndex::new(1));
        let slots: Vec<Option<Dynamic>> = vec![
            Some(Arc::new(Outcome::Success(5_u32)) as Dynamic),
            Some(Arc::new(Outcome::<&'static str>::Success("five")) as Dynamic),
        ];

        let (a, b) = (first, second).gather(&slots);
        assert_eq!(a.success(), Some(&5));
        assert_eq!(b.success(), Some(&"five"));
        assert_eq!(
            (first, second).indices(),
            vec![NodeIndex::new(0), NodeIndex::new(1)]
        );
    }

    #[test]
    fn test_gather_vec_mixes_set_and_unset() {
        let handles = vec![
            TaskHandle::<u32>::new(NodeIndex::new(0)),
            TaskHandle::<u32>::new(NodeIndex::new(1)),
            TaskHandle::<u32>::new(NodeIndex::new(2)),
        ];
        let slots: Vec<Option<Dynamic>> = vec![
            Some(Arc::new(Outcome::Success(1_u32)) as Dynamic),
            None,
            Some(Arc::new(Outcome::Success(3_u32)) as Dynamic),
        ];

        let outcomes = handles.gather(&slots);
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].success(), Some(&1));
        assert!(outcomes[1].failure().unwrap().is_unassigned());
        assert_eq!(outcomes[2].success(), Some(&3));
    }
}
