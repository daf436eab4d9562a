//! VideoRoom plugin requests and events.

use common::types::{FeedId, PrivateId, RoomId};
use serde::{Deserialize, Serialize};

/// Plugin package name used when attaching handles.
pub const VIDEOROOM_PLUGIN: &str = "janus.plugin.videoroom";

/// Error code returned when `create` targets a room that already exists.
pub const ERROR_ROOM_EXISTS: u32 = 427;

/// Error code returned when a subscriber targets an unknown feed.
pub const ERROR_NO_SUCH_FEED: u32 = 428;

/// Request body sent to the VideoRoom plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum RoomRequest {
    /// Create a room (synchronous; "already exists" counts as success).
    Create {
        room: RoomId,
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bitrate: Option<u32>,
    },
    /// Join a room as publisher or subscriber.
    Join(JoinRequest),
    /// Publish: carries the offer in the accompanying jsep.
    Configure { audio: bool, video: bool },
    /// Complete a subscription: carries the answer in the accompanying jsep.
    Start { room: RoomId },
    /// Leave the room (publisher side).
    Leave,
}

impl RoomRequest {
    /// Returns the request name for log fields.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            RoomRequest::Create { .. } => "create",
            RoomRequest::Join(JoinRequest::Publisher { .. }) => "join_publisher",
            RoomRequest::Join(JoinRequest::Subscriber { .. }) => "join_subscriber",
            RoomRequest::Configure { .. } => "configure",
            RoomRequest::Start { .. } => "start",
            RoomRequest::Leave => "leave",
        }
    }
}

/// Participant type of a join request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ptype", rename_all = "snake_case")]
pub enum JoinRequest {
    /// Join as the local publisher.
    Publisher { room: RoomId, display: String },
    /// Subscribe to one remote feed.
    Subscriber {
        room: RoomId,
        feed: FeedId,
        private_id: PrivateId,
    },
}

/// A remote publisher as listed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publisher {
    /// Feed identifier
    pub id: FeedId,
    /// Display name chosen by the publisher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// Either a feed id or a bare acknowledgement string.
///
/// `leaving` and `unpublished` carry a feed id when another participant
/// departs, and `"ok"` when they acknowledge our own request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedRef {
    Feed(FeedId),
    Ack(String),
}

impl FeedRef {
    /// The referenced feed, if this is not an acknowledgement.
    #[must_use]
    pub fn feed(&self) -> Option<FeedId> {
        match self {
            FeedRef::Feed(id) => Some(*id),
            FeedRef::Ack(_) => None,
        }
    }
}

/// Body of a `videoroom: "event"` message.
///
/// The same shape carries roster deltas, acknowledgements and errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomNotification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomId>,
    /// Newly published feeds
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub publishers: Vec<Publisher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaving: Option<FeedRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpublished: Option<FeedRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configured: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RoomNotification {
    /// Feed that left or stopped publishing, if any.
    ///
    /// `leaving` wins when both fields name a feed.
    #[must_use]
    pub fn departed_feed(&self) -> Option<FeedId> {
        self.leaving
            .as_ref()
            .and_then(FeedRef::feed)
            .or_else(|| self.unpublished.as_ref().and_then(FeedRef::feed))
    }

    /// Error code and reason when the plugin reported a failure.
    #[must_use]
    pub fn failure(&self) -> Option<(u32, String)> {
        self.error_code
            .map(|code| (code, self.error.clone().unwrap_or_default()))
    }
}

/// Event data emitted by the VideoRoom plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "videoroom", rename_all = "snake_case")]
pub enum RoomEvent {
    /// Synchronous reply to `create`.
    Created { room: RoomId },
    /// Publisher join confirmation with the roster snapshot.
    Joined {
        room: RoomId,
        id: FeedId,
        private_id: PrivateId,
        #[serde(default)]
        publishers: Vec<Publisher>,
    },
    /// Roster change, acknowledgement or error.
    Event(RoomNotification),
    /// Subscriber join confirmation.
    Attached {
        room: RoomId,
        id: FeedId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display: Option<String>,
    },
    /// The room was destroyed.
    Destroyed { room: RoomId },
    /// Anything else the plugin emits (talking, slow link, ...).
    #[serde(other)]
    Other,
}

impl RoomEvent {
    /// Returns the event name for log fields.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            RoomEvent::Created { .. } => "created",
            RoomEvent::Joined { .. } => "joined",
            RoomEvent::Event(_) => "event",
            RoomEvent::Attached { .. } => "attached",
            RoomEvent::Destroyed { .. } => "destroyed",
            RoomEvent::Other => "other",
        }
    }
}
