//! Actor layer for the room client.
//!
//! A single [`SessionController`] task owns the session. Callers hold a
//! cloneable [`SessionControllerHandle`] and exchange messages with it:
//!
//! ```text
//! caller ──mpsc──▶ SessionController ◀──mpsc── SignalingChannel events
//!    ▲                   │       ▲
//!    └─────oneshot───────┘       └──── negotiation results, track reports
//! ```

pub mod controller;
pub mod messages;

pub use controller::{SessionController, SessionControllerHandle};
pub use messages::{ControllerMessage, ControllerState, ControllerStatus, Diagnostic, SlotStatus};
