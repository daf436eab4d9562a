//! JSON codec for gateway messages.

use crate::envelope::{IncomingMessage, OutgoingMessage};
use crate::videoroom::{RoomEvent, VIDEOROOM_PLUGIN};
use serde::Deserialize as _;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Malformed or mistyped JSON
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A field required for this message kind is absent
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Plugin data from a plugin other than the VideoRoom
    #[error("Unexpected plugin: {0}")]
    UnexpectedPlugin(String),
}

/// Encode an outbound message to a JSON text frame
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode_outgoing(message: &OutgoingMessage) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a JSON text frame received from the gateway
///
/// # Errors
///
/// Returns an error if the frame is not a gateway message
pub fn decode_incoming(text: &str) -> Result<IncomingMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Extract the VideoRoom event carried in a message's plugin data
///
/// # Errors
///
/// Returns an error if the message has no plugin data, the data comes from
/// another plugin, or it does not match any VideoRoom event shape
pub fn decode_room_event(message: &IncomingMessage) -> Result<RoomEvent, CodecError> {
    let plugindata = message
        .plugindata
        .as_ref()
        .ok_or(CodecError::MissingField("plugindata"))?;

    if plugindata.plugin != VIDEOROOM_PLUGIN {
        return Err(CodecError::UnexpectedPlugin(plugindata.plugin.clone()));
    }

    Ok(RoomEvent::deserialize(&plugindata.data)?)
}
