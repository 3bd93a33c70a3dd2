#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod cell;
mod destination;
mod error;
mod flow;
mod handle;
mod outcome;
mod runner;
mod state;
mod task;
mod utils;

pub use crate::destination::{Destination, Inline, Mailbox, MailboxDrain, Thunk};
pub use crate::error::*;
pub use crate::flow::{GroupBinder, SeqBinder, TaskDef, TaskFlow};
pub use crate::handle::{Ancestors, TaskHandle};
pub use crate::outcome::Outcome;
pub use crate::runner::{RunReport, RunSummary, TaskExecution, TaskSummary, TaskView};
pub use crate::state::{Disposition, TaskState};
pub use crate::task::{CancelHandle, CancelToken, Complete, NodeKind};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
