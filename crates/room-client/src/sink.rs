//! Rendering callbacks.

use crate::errors::ClientError;
use crate::negotiation::MediaTrack;
use common::types::SlotId;

/// Receives tracks to render and session-level failures.
///
/// Callbacks run on the controller task and must not block.
pub trait SessionSink: Send + Sync {
    /// A local captured track became available.
    fn on_local_track(&self, track: &MediaTrack);

    /// A remote track was added to or removed from `slot`.
    fn on_remote_track(&self, slot: SlotId, track: &MediaTrack, added: bool);

    /// The session ended on its own (transport loss) outside a pending join.
    fn on_session_error(&self, error: &ClientError) {
        let _ = error;
    }
}
