//! Room Client Library
//!
//! Client-side controller for a multi-party video session hosted behind a
//! selective-forwarding gateway. One participant publishes local audio and
//! video and subscribes to a bounded number of other participants' feeds:
//!
//! - Room join with a single publisher handle and self-publish negotiation
//! - Per-slot feed subscriptions that can be switched at any time
//! - Roster tracking from the gateway's join snapshot and publisher events
//! - Ordered teardown on leave, transport loss, and join failure
//!
//! # Architecture
//!
//! ```text
//! SessionControllerHandle (caller side, Clone)
//! └── SessionController actor (one task, owns all mutable state)
//!     ├── RosterTracker
//!     ├── PublisherSession (one per join)
//!     └── SubscriberSession (one per occupied slot)
//! ```
//!
//! The controller talks to the gateway through a [`signaling::SignalingChannel`],
//! drives media through a [`negotiation::NegotiationFactory`], and reports
//! tracks to a [`sink::SessionSink`]. Negotiation runs on spawned tasks whose
//! results come back to the actor and are dropped once their handle is gone.
//!
//! # Modules
//!
//! - [`actors`] - `SessionController` actor and its messages
//! - [`sessions`] - publisher and subscriber state machines
//! - [`roster`] - remote participant tracking
//! - [`signaling`] - gateway channel contract
//! - [`negotiation`] - media negotiation contract
//! - [`transport`] - WebSocket gateway channel
//! - [`config`] - configuration from environment
//! - [`errors`] - error taxonomy

pub mod actors;
pub mod config;
pub mod errors;
pub mod negotiation;
pub mod observability;
pub mod roster;
pub mod session;
pub mod sessions;
pub mod signaling;
pub mod sink;
pub mod transport;

pub use actors::{
    ControllerState, ControllerStatus, Diagnostic, SessionController, SessionControllerHandle,
    SlotStatus,
};
pub use config::{Config, ConfigError, RoomSettings, TransportSettings};
pub use errors::{ClientError, ErrorKind};
pub use negotiation::{
    MediaDirections, MediaTrack, NegotiationContext, NegotiationError, NegotiationFactory,
    TrackEvent, TrackKind, TrackReporter,
};
pub use roster::{Participant, RosterDelta, RosterTracker};
pub use session::{SessionHandle, SessionIdentity, SessionRole};
pub use sessions::{PublisherState, SubscriberState};
pub use signaling::{GatewayEvent, GatewayEventKind, SignalingChannel};
pub use sink::SessionSink;
pub use transport::JanusWsChannel;
