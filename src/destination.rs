use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

pub type Thunk = Box<dyn FnOnce() + Send + 'static>;

/// Where a completion sink's callback runs.
///
/// The flow hands the sink's callback to the destination as soon as every
/// observed ancestor is terminal; the destination decides on which thread
/// it actually executes.
pub trait Destination: Send + Sync {
    fn dispatch(&self, thunk: Thunk);
}

impl<D: Destination + ?Sized> Destination for Arc<D> {
    fn dispatch(&self, thunk: Thunk) {
        (**self).dispatch(thunk);
    }
}

/// Runs the callback immediately, on whichever worker resolved the last
/// observed ancestor. This is the default destination.
pub struct Inline;

impl Destination for Inline {
    fn dispatch(&self, thunk: Thunk) {
        thunk();
    }
}

/// Queues callbacks for another thread to drain.
///
/// For sinks that must run on a particular thread, typically the one that
/// built the flow. The worker side stays non-blocking: dispatch only
/// enqueues.
pub struct Mailbox {
    sender: Sender<Thunk>,
}

/// Receiving half of a [`Mailbox`], kept by the thread that runs the
/// callbacks.
pub struct MailboxDrain {
    receiver: Receiver<Thunk>,
}

impl Mailbox {
    pub fn new() -> (Mailbox, MailboxDrain) {
        let (sender, receiver) = mpsc::channel();
        (Mailbox { sender }, MailboxDrain { receiver })
    }
}

impl Destination for Mailbox {
    fn dispatch(&self, thunk: Thunk) {
        // If the drain is gone the callback is dropped with the queue.
        let _ = self.sender.send(thunk);
    }
}

impl MailboxDrain {
    /// Runs every callback queued so far, returning how many ran.
    pub fn drain(&self) -> usize {
        let mut count = 0;
        while let Ok(thunk) = self.receiver.try_recv() {
            thunk();
            count += 1;
        }
        count
    }

    /// Blocks for the next callback and runs it. Returns `false` once every
    /// sender is gone and the queue is empty.
    pub fn run_next(&self) -> bool {
        match self.receiver.recv() {
            Ok(thunk) => {
                thunk();
                true
            }
            Err(_) => false,
        }
    }
}
