//! Room client error types.
//!
//! Every failure surfaced to the caller is a [`ClientError`]. The variants
//! group into a small taxonomy ([`ErrorKind`]) that decides how far a failure
//! propagates. A lost or unopenable channel ends the session. Timeouts,
//! negotiation and protocol failures stay local to one handle where possible,
//! and state errors are rejected before anything changes.

use crate::negotiation::NegotiationError;
use common::types::{FeedId, SlotId};
use gateway_protocol::CodecError;
use thiserror::Error;

/// Room client error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Signaling channel failed or closed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A gateway request or the join confirmation did not arrive in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Offer or answer creation (or answer application) failed.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// The gateway sent something the session cannot accept.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The gateway refused a request.
    #[error("Rejected by gateway ({code}): {reason}")]
    Rejected { code: u32, reason: String },

    /// Operation not valid in the current controller state.
    #[error("Invalid state: {0}")]
    State(String),

    /// Slot index outside the configured slot table.
    #[error("Invalid slot {slot} (slot count {slot_count})")]
    InvalidSlot { slot: SlotId, slot_count: usize },

    /// Requested feed is not in the roster.
    #[error("Feed not found: {0}")]
    FeedNotFound(FeedId),

    /// Controller task is gone.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Negotiation,
    Protocol,
    State,
    Internal,
}

impl ErrorKind {
    /// Returns the kind as a metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Negotiation => "negotiation",
            ErrorKind::Protocol => "protocol",
            ErrorKind::State => "state",
            ErrorKind::Internal => "internal",
        }
    }
}

impl ClientError {
    /// Returns the taxonomy bucket of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Transport(_) | ClientError::Timeout(_) => ErrorKind::Transport,
            ClientError::Negotiation(_) => ErrorKind::Negotiation,
            ClientError::Protocol(_) | ClientError::Rejected { .. } => ErrorKind::Protocol,
            ClientError::State(_)
            | ClientError::InvalidSlot { .. }
            | ClientError::FeedNotFound(_) => ErrorKind::State,
            ClientError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error ends the whole session rather than one handle.
    ///
    /// Only a failed channel does. An unanswered request fails the handle it
    /// was sent on; an unanswered join is bounded by the join deadline.
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }

    /// Returns a bounded label for metrics (one per variant).
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            ClientError::Transport(_) => "transport",
            ClientError::Timeout(_) => "timeout",
            ClientError::Negotiation(_) => "negotiation",
            ClientError::Protocol(_) => "protocol",
            ClientError::Rejected { .. } => "rejected",
            ClientError::State(_) => "state",
            ClientError::InvalidSlot { .. } => "invalid_slot",
            ClientError::FeedNotFound(_) => "feed_not_found",
            ClientError::Internal(_) => "internal",
        }
    }
}

impl From<NegotiationError> for ClientError {
    fn from(err: NegotiationError) -> Self {
        ClientError::Negotiation(err.to_string())
    }
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}
