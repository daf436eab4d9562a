//! Signaling channel implementations.

pub mod janus_ws;

pub use janus_ws::JanusWsChannel;
