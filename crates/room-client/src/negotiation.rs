//! Media negotiation contract.
//!
//! The client never touches media itself. Each session gets its own
//! [`NegotiationContext`] from a [`NegotiationFactory`]; the context turns
//! local capture into offers, remote offers into answers, and reports tracks
//! through the [`TrackReporter`] it was created with.

use crate::session::SessionRole;
use common::types::HandleId;
use gateway_protocol::Jsep;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local or remote media track, identified by the negotiation primitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

impl MediaTrack {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// Send/receive directions requested from the negotiation primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaDirections {
    pub send_audio: bool,
    pub send_video: bool,
    pub receive_audio: bool,
    pub receive_video: bool,
    pub data: bool,
}

impl MediaDirections {
    /// Publisher offer: audio and video sent, nothing received, no data.
    #[must_use]
    pub const fn publish() -> Self {
        Self {
            send_audio: true,
            send_video: true,
            receive_audio: false,
            receive_video: false,
            data: false,
        }
    }

    /// Subscriber answer: receive only.
    #[must_use]
    pub const fn receive_only() -> Self {
        Self {
            send_audio: false,
            send_video: false,
            receive_audio: true,
            receive_video: true,
            data: false,
        }
    }
}

/// Track appearing on or disappearing from a handle's media session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEvent {
    pub handle: HandleId,
    pub track: MediaTrack,
    pub added: bool,
}

/// Reports tracks for one handle back to the controller.
#[derive(Debug, Clone)]
pub struct TrackReporter {
    handle: HandleId,
    events: mpsc::UnboundedSender<TrackEvent>,
}

impl TrackReporter {
    #[must_use]
    pub fn new(handle: HandleId, events: mpsc::UnboundedSender<TrackEvent>) -> Self {
        Self { handle, events }
    }

    #[must_use]
    pub fn handle(&self) -> HandleId {
        self.handle
    }

    /// Report a new track. Dropped silently once the controller is gone.
    pub fn track_added(&self, track: MediaTrack) {
        self.report(track, true);
    }

    /// Report a track that ended.
    pub fn track_removed(&self, track: MediaTrack) {
        self.report(track, false);
    }

    fn report(&self, track: MediaTrack, added: bool) {
        let _ = self.events.send(TrackEvent {
            handle: self.handle,
            track,
            added,
        });
    }
}

/// Negotiation primitive failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("Offer creation failed: {0}")]
    Offer(String),

    #[error("Answer creation failed: {0}")]
    Answer(String),

    #[error("Applying remote answer failed: {0}")]
    ApplyAnswer(String),

    #[error("Unknown track: {0}")]
    UnknownTrack(String),

    #[error("Negotiation context closed")]
    Closed,
}

/// Media negotiation for one session handle.
#[async_trait::async_trait]
pub trait NegotiationContext: Send + Sync {
    /// Capture local media and produce an offer.
    async fn create_offer(&self, directions: MediaDirections) -> Result<Jsep, NegotiationError>;

    /// Produce an answer to a remote offer.
    async fn create_answer(
        &self,
        offer: Jsep,
        directions: MediaDirections,
    ) -> Result<Jsep, NegotiationError>;

    /// Apply a remote answer to a previously sent offer.
    async fn apply_answer(&self, answer: Jsep) -> Result<(), NegotiationError>;

    /// Enable or disable a local track without renegotiating.
    fn set_track_enabled(&self, track_id: &str, enabled: bool) -> Result<(), NegotiationError>;

    /// Release all media resources. Idempotent.
    fn close(&self);
}

/// Creates one negotiation context per session handle.
pub trait NegotiationFactory: Send + Sync {
    fn create(&self, role: &SessionRole, reporter: TrackReporter) -> Arc<dyn NegotiationContext>;
}
