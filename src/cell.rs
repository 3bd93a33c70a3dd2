use std::any::Any;
use std::sync::{Arc, OnceLock};

/// Type-erased task result as stored in the graph.
pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// Single-assignment slot for a task's outcome.
///
/// The first write wins and every later attempt is rejected, which is what
/// makes duplicate resolution attempts harmless. A task cancelled before its
/// body ran leaves the slot unset; readers map that to a failure rather than
/// blocking.
#[derive(Default)]
pub(crate) struct ResultCell {
    slot: OnceLock<Dynamic>,
}

impl ResultCell {
    /// Attempts the one permitted write. Returns whether this call was the
    /// winner.
    pub fn assign(&self, value: Dynamic) -> bool {
        self.slot.set(value).is_ok()
    }

    /// Cheap clone of the stored `Arc`, for handing to workers on other
    /// threads.
    pub fn snapshot(&self) -> Option<Dynamic> {
        self.slot.get().cloned()
    }
}
