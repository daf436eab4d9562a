//! Gateway signaling contract.
//!
//! A [`SignalingChannel`] carries request/response traffic to the gateway
//! and pushes asynchronous events back through the sender handed to
//! [`SignalingChannel::open`].

use crate::errors::ClientError;
use common::types::HandleId;
use gateway_protocol::{Jsep, RoomEvent, RoomRequest};
use tokio::sync::mpsc;

/// Event concerning one plugin handle.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEventKind {
    /// Plugin event, possibly carrying a negotiation blob.
    Plugin {
        event: RoomEvent,
        jsep: Option<Jsep>,
    },
    /// Plugin data that could not be decoded.
    Malformed { reason: String },
    /// Media path is up.
    WebrtcUp,
    /// Gateway started or stopped receiving a media kind.
    Media { kind: String, receiving: bool },
    /// Media session torn down by the gateway.
    Hangup { reason: String },
    /// Handle detached by the gateway.
    Detached,
}

impl GatewayEventKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            GatewayEventKind::Plugin { .. } => "plugin",
            GatewayEventKind::Malformed { .. } => "malformed",
            GatewayEventKind::WebrtcUp => "webrtcup",
            GatewayEventKind::Media { .. } => "media",
            GatewayEventKind::Hangup { .. } => "hangup",
            GatewayEventKind::Detached => "detached",
        }
    }
}

/// Asynchronous event pushed by the signaling channel.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Handle {
        handle: HandleId,
        kind: GatewayEventKind,
    },
    /// The channel is gone; no further replies or events will arrive.
    TransportClosed { reason: String },
}

/// Duplex signaling channel to the gateway.
#[async_trait::async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Connect and start delivering events to `events`.
    ///
    /// The sender is unbounded: pushing an event never waits on the receiver.
    async fn open(&self, events: mpsc::UnboundedSender<GatewayEvent>) -> Result<(), ClientError>;

    /// Attach a new VideoRoom plugin handle.
    async fn attach(&self) -> Result<HandleId, ClientError>;

    /// Synchronous plugin request; the plugin's reply is returned directly.
    async fn request(&self, handle: HandleId, body: RoomRequest) -> Result<RoomEvent, ClientError>;

    /// Asynchronous plugin request; the outcome arrives later as an event.
    async fn message(
        &self,
        handle: HandleId,
        body: RoomRequest,
        jsep: Option<Jsep>,
    ) -> Result<(), ClientError>;

    /// Detach a plugin handle.
    async fn detach(&self, handle: HandleId) -> Result<(), ClientError>;

    /// Close the channel. Idempotent.
    async fn close(&self) -> Result<(), ClientError>;
}
