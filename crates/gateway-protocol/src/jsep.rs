//! Session description blobs exchanged during media negotiation.

use serde::{Deserialize, Serialize};

/// Whether a session description is an offer or an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsepKind {
    /// Offer from the side initiating negotiation
    Offer,
    /// Answer to a previously received offer
    Answer,
}

impl JsepKind {
    /// Returns the kind as a string for log fields.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            JsepKind::Offer => "offer",
            JsepKind::Answer => "answer",
        }
    }
}

/// Opaque negotiation payload.
///
/// Only `kind` is ever read by the client; the SDP body is forwarded
/// untouched between the gateway and the negotiation primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jsep {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: JsepKind,
    /// Session description body
    pub sdp: String,
}

impl Jsep {
    /// Build an offer blob.
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: JsepKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer blob.
    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: JsepKind::Answer,
            sdp: sdp.into(),
        }
    }
}
