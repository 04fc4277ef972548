//! Side-effect seam for matched commands
//!
//! The engine never navigates or scrolls by itself. It hands matched
//! actions to an [`ActionHandler`]; the daemon's handler turns them into
//! events for the connected front end.

use tokio::sync::broadcast;
use tracing::debug;

use crate::events::EngineEvent;

use super::table::{Destination, ScrollTarget};

/// Performs the side effects of matched voice commands
///
/// Stopping the session is not part of this trait; the engine handles
/// "stop listening" itself.
pub trait ActionHandler: Send {
    fn navigate(&mut self, destination: Destination);
    fn scroll(&mut self, target: ScrollTarget);
    fn show_help(&mut self, help: &str);
}

/// Publishes actions on the engine event bus
pub struct EventActions {
    event_tx: broadcast::Sender<EngineEvent>,
}

impl EventActions {
    pub fn new(event_tx: broadcast::Sender<EngineEvent>) -> Self {
        Self { event_tx }
    }

    fn emit(&self, event: EngineEvent) {
        debug!(%event, "dispatching action");
        // No subscribers is fine: nobody is there to navigate
        let _ = self.event_tx.send(event);
    }
}

impl ActionHandler for EventActions {
    fn navigate(&mut self, destination: Destination) {
        self.emit(EngineEvent::Navigate {
            destination,
            path: destination.path().to_string(),
        });
    }

    fn scroll(&mut self, target: ScrollTarget) {
        self.emit(EngineEvent::Scroll { target });
    }

    fn show_help(&mut self, help: &str) {
        self.emit(EngineEvent::Help {
            text: help.to_string(),
        });
    }
}
