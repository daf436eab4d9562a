//! Identifier types assigned by the gateway or chosen by the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a published feed (one participant's media stream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedId(pub u64);

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a plugin handle attached on the gateway session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a video room on the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a caller-defined subscription slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub usize);

impl SlotId {
    /// Position of the slot in the controller's slot table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

/// Private correlation token handed out with the publisher join confirmation.
///
/// Subscriptions present it so the gateway can tie them to the publisher's
/// identity. `Debug` output is redacted so it never lands in logs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivateId(pub u64);

impl fmt::Debug for PrivateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateId([REDACTED])")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_private_id_debug_is_redacted() {
        let id = PrivateId(987_654_321);
        let debug = format!("{id:?}");

        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("987654321"));
    }

    #[test]
    fn test_ids_serialize_as_bare_numbers() {
        assert_eq!(serde_json::to_string(&FeedId(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&PrivateId(42)).unwrap(), "42");

        let handle: HandleId = serde_json::from_str("1234").unwrap();
        assert_eq!(handle, HandleId(1234));
    }

    #[test]
    fn test_slot_display() {
        assert_eq!(SlotId(1).to_string(), "slot-1");
        assert_eq!(SlotId(3).index(), 3);
    }
}
