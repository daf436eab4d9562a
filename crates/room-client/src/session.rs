//! Session handles and identity.

use common::types::{FeedId, HandleId, PrivateId, SlotId};
use tokio_util::sync::CancellationToken;

/// What a plugin handle is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// The single local publisher.
    Publisher,
    /// A subscription occupying `slot` and bound to `feed`.
    Subscriber { slot: SlotId, feed: FeedId },
}

impl SessionRole {
    /// Returns the role as a metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionRole::Publisher => "publisher",
            SessionRole::Subscriber { .. } => "subscriber",
        }
    }
}

/// A live plugin handle.
///
/// Each handle owns a child cancellation token. Cancelling it stops every
/// negotiation task spawned for the handle; handles are never reused.
#[derive(Debug)]
pub struct SessionHandle {
    id: HandleId,
    role: SessionRole,
    cancel_token: CancellationToken,
}

impl SessionHandle {
    #[must_use]
    pub fn new(id: HandleId, role: SessionRole, parent: &CancellationToken) -> Self {
        Self {
            id,
            role,
            cancel_token: parent.child_token(),
        }
    }

    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    #[must_use]
    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Token for tasks spawned on behalf of this handle.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Identity assigned by the gateway on a successful publisher join.
///
/// Immutable until leave. The private id is redacted in `Debug` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionIdentity {
    pub self_feed_id: FeedId,
    pub private_id: PrivateId,
}
