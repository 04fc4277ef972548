//! Voice command table and action dispatch

mod dispatch;
mod table;

pub use dispatch::{ActionHandler, EventActions};
pub use table::{normalize, Action, CommandEntry, CommandTable, Destination, ScrollTarget};

#[cfg(test)]
pub(crate) use dispatch::recording::RecordingActions;
