//! Signaling protocol spoken with the SFU gateway.
//!
//! The gateway exposes a session/handle transport envelope (`janus` messages)
//! and, inside it, the VideoRoom plugin's request and event bodies. Negotiation
//! blobs (`jsep`) ride alongside plugin messages in both directions.
//!
//! - [`envelope`] - transport-level commands and replies
//! - [`videoroom`] - plugin requests and events
//! - [`jsep`] - offer/answer session descriptions
//! - [`codec`] - JSON encoding and decoding

#![warn(clippy::pedantic)]

pub mod codec;
pub mod envelope;
pub mod jsep;
pub mod videoroom;

pub use codec::{decode_incoming, decode_room_event, encode_outgoing, CodecError};
pub use envelope::{
    Command, CreatedId, GatewayFailure, IncomingKind, IncomingMessage, OutgoingMessage, PluginData,
    SessionId,
};
pub use jsep::{Jsep, JsepKind};
pub use videoroom::{
    FeedRef, JoinRequest, Publisher, RoomEvent, RoomNotification, RoomRequest, ERROR_NO_SUCH_FEED,
    ERROR_ROOM_EXISTS, VIDEOROOM_PLUGIN,
};
