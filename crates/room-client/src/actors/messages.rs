//! Message types for the session controller.
//!
//! Callers talk to the actor through `tokio::sync::mpsc`; replies come back
//! on `tokio::sync::oneshot`.

use crate::errors::ClientError;
use crate::negotiation::TrackKind;
use crate::roster::Participant;
use crate::sessions::{PublisherState, SubscriberState};
use chrono::{DateTime, Utc};
use common::types::{FeedId, HandleId, SlotId};
use std::fmt;
use tokio::sync::oneshot;

/// Messages sent to `SessionController`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Join the room and publish.
    Join {
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Leave the room and release everything.
    Leave {
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Bind `slot` to `feed`, or empty it.
    SelectFeed {
        slot: SlotId,
        feed: Option<FeedId>,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Flip the enabled flag of the local track of `kind`.
    ToggleLocalTrack {
        kind: TrackKind,
        respond_to: oneshot::Sender<Result<Option<bool>, ClientError>>,
    },

    /// Snapshot of the controller.
    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },
}

/// Session-level state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Disconnected,
    Connecting,
    Joining,
    Joined,
    Leaving,
}

impl ControllerState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Disconnected => "disconnected",
            ControllerState::Connecting => "connecting",
            ControllerState::Joining => "joining",
            ControllerState::Joined => "joined",
            ControllerState::Leaving => "leaving",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One slot as seen by `status()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotStatus {
    pub slot: SlotId,
    pub feed: Option<FeedId>,
    pub handle: Option<HandleId>,
    pub state: SubscriberState,
}

/// A recorded anomaly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub at: DateTime<Utc>,
    pub handle: Option<HandleId>,
    pub kind: &'static str,
    pub message: String,
}

/// Snapshot returned by `status()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub state: ControllerState,
    pub self_feed_id: Option<FeedId>,
    pub publisher: PublisherState,
    pub participants: Vec<Participant>,
    pub slots: Vec<SlotStatus>,
    /// Most recent first.
    pub diagnostics: Vec<Diagnostic>,
}

impl ControllerStatus {
    /// Feed bound to `slot`, if any.
    #[must_use]
    pub fn slot_feed(&self, slot: SlotId) -> Option<FeedId> {
        self.slots
            .iter()
            .find(|s| s.slot == slot)
            .and_then(|s| s.feed)
    }
}
