//! Asynchronous notifications emitted by the controller.
//!
//! The controller pushes `$ST <state>` lines whenever its state changes,
//! whether or not a command is in flight. The reader task decodes them into
//! [`Notification`]s and fans them out to every subscriber.

use crate::types::EvseState;

/// An unsolicited state-change notification (`$ST <state>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    /// The state the controller just entered.
    pub state: EvseState,
}

impl Notification {
    pub fn new(state: EvseState) -> Self {
        Notification { state }
    }
}
