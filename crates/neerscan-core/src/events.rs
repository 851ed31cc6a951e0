//! Session event stream.
//!
//! A [`crate::session::DeviceSession`] publishes a [`SessionEvent`] for every
//! state transition, discovered device, reading update and isolated failure.
//! Front ends subscribe through [`EventDispatcher::subscribe`]; slow receivers
//! lag rather than block the notification handler.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use neerscan_types::{DeviceDescriptor, Reading};

use crate::safety::SafetyVerdict;
use crate::session::SessionState;

/// Events emitted by a device session.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionEvent {
    /// The session moved to a new state.
    StateChanged {
        state: SessionState,
        /// Cause, when the new state is `Error`.
        error: Option<String>,
    },
    /// A NeerScan peripheral was seen for the first time during a scan.
    Discovered { device: DeviceDescriptor },
    /// The reading changed after a notification was merged.
    Reading {
        reading: Reading,
        verdict: SafetyVerdict,
    },
    /// A notification could not be decoded and was skipped.
    DecodeFailed { error: String },
    /// A complete reading was appended to the log.
    Persisted { reading: Reading },
    /// Appending to the log failed.
    PersistenceFailed { error: String },
    /// The location stamp was resolved (or replaced by a placeholder).
    LocationResolved { location: String },
    /// The first-reading grace period elapsed.
    GraceElapsed,
}

/// Sender for session events.
pub type EventSender = broadcast::Sender<SessionEvent>;

/// Receiver for session events.
pub type EventReceiver = broadcast::Receiver<SessionEvent>;

/// Fan-out of session events to any number of receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a dispatcher buffering up to `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
