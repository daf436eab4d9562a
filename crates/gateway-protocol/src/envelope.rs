//! Transport envelope: session and handle management around plugin messages.
//!
//! Every outbound message carries a `janus` verb and a transaction id. The
//! gateway answers with `success`, `ack` or `error` on the same transaction,
//! and pushes `event`, `webrtcup`, `media`, `hangup` and `detached`
//! notifications tagged with the sending handle.

use crate::jsep::Jsep;
use crate::videoroom::RoomRequest;
use common::types::HandleId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a gateway session (one per connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-level command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "janus", rename_all = "snake_case")]
pub enum Command {
    /// Create a gateway session.
    Create,
    /// Attach a plugin handle to the session.
    Attach {
        session_id: SessionId,
        plugin: String,
    },
    /// Send a plugin request, optionally with a negotiation blob.
    Message {
        session_id: SessionId,
        handle_id: HandleId,
        body: RoomRequest,
        #[serde(skip_serializing_if = "Option::is_none")]
        jsep: Option<Jsep>,
    },
    /// Detach a plugin handle.
    Detach {
        session_id: SessionId,
        handle_id: HandleId,
    },
    /// Keep the session alive.
    Keepalive { session_id: SessionId },
    /// Destroy the session and every handle on it.
    Destroy { session_id: SessionId },
}

impl Command {
    /// Returns the verb for log fields.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Command::Create => "create",
            Command::Attach { .. } => "attach",
            Command::Message { .. } => "message",
            Command::Detach { .. } => "detach",
            Command::Keepalive { .. } => "keepalive",
            Command::Destroy { .. } => "destroy",
        }
    }
}

/// A command with its transaction id and optional API secret.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMessage {
    #[serde(flatten)]
    pub command: Command,
    pub transaction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apisecret: Option<String>,
}

/// The `janus` verb of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncomingKind {
    Success,
    Error,
    Ack,
    Event,
    Webrtcup,
    Media,
    Hangup,
    Detached,
    Slowlink,
    Timeout,
    #[serde(other)]
    Other,
}

impl IncomingKind {
    /// Whether this kind answers a pending transaction.
    #[must_use]
    pub const fn is_reply(self) -> bool {
        matches!(
            self,
            IncomingKind::Success | IncomingKind::Error | IncomingKind::Ack
        )
    }
}

/// `data` of a `success` reply to `create` or `attach`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CreatedId {
    pub id: u64,
}

/// Plugin payload carried by `success` and `event` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PluginData {
    pub plugin: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Transport-level failure (`janus: "error"`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayFailure {
    pub code: u32,
    #[serde(default)]
    pub reason: String,
}

/// Any message received from the gateway.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IncomingMessage {
    pub janus: IncomingKind,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// Handle the message concerns
    #[serde(default)]
    pub sender: Option<HandleId>,
    #[serde(default)]
    pub data: Option<CreatedId>,
    #[serde(default)]
    pub plugindata: Option<PluginData>,
    #[serde(default)]
    pub jsep: Option<Jsep>,
    #[serde(default)]
    pub error: Option<GatewayFailure>,
    /// Media kind of a `media` notification
    #[serde(default, rename = "type")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub receiving: Option<bool>,
    /// Reason attached to `hangup`
    #[serde(default)]
    pub reason: Option<String>,
}
