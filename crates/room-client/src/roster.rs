//! Remote participant tracking.
//!
//! The roster is rebuilt from the snapshot in the join confirmation and
//! patched by publisher events afterwards. It never contains the local feed.

use common::types::FeedId;
use gateway_protocol::Publisher;
use std::collections::BTreeMap;
use tracing::debug;

/// A remote publisher in the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub feed_id: FeedId,
    pub display_name: Option<String>,
}

impl From<Publisher> for Participant {
    fn from(publisher: Publisher) -> Self {
        Self {
            feed_id: publisher.id,
            display_name: publisher.display,
        }
    }
}

/// Incremental roster change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDelta {
    pub added: Vec<Participant>,
    pub removed: Option<FeedId>,
}

impl RosterDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_none()
    }
}

/// Set of remote publishers currently in the room.
#[derive(Debug, Default)]
pub struct RosterTracker {
    local_feed: Option<FeedId>,
    participants: BTreeMap<FeedId, Participant>,
}

impl RosterTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the roster wholesale, skipping the local feed.
    pub fn apply_snapshot(
        &mut self,
        local_feed: FeedId,
        participants: impl IntoIterator<Item = Participant>,
    ) {
        self.local_feed = Some(local_feed);
        self.participants = participants
            .into_iter()
            .filter(|p| p.feed_id != local_feed)
            .map(|p| (p.feed_id, p))
            .collect();

        debug!(
            target: "room.roster",
            participants = self.participants.len(),
            "Roster snapshot applied"
        );
    }

    /// Apply additions and at most one removal.
    ///
    /// Returns the removed feed only when it was actually present.
    pub fn apply_delta(&mut self, delta: RosterDelta) -> Option<FeedId> {
        for participant in delta.added {
            if Some(participant.feed_id) == self.local_feed {
                continue;
            }
            debug!(
                target: "room.roster",
                feed_id = %participant.feed_id,
                "Participant added"
            );
            self.participants.insert(participant.feed_id, participant);
        }

        let removed = delta
            .removed
            .and_then(|feed| self.participants.remove(&feed))
            .map(|p| p.feed_id);

        if let Some(feed) = removed {
            debug!(target: "room.roster", feed_id = %feed, "Participant removed");
        }

        removed
    }

    #[must_use]
    pub fn contains(&self, feed: FeedId) -> bool {
        self.participants.contains_key(&feed)
    }

    #[must_use]
    pub fn get(&self, feed: FeedId) -> Option<&Participant> {
        self.participants.get(&feed)
    }

    /// Participants sorted by feed id.
    #[must_use]
    pub fn participants(&self) -> Vec<Participant> {
        self.participants.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn clear(&mut self) {
        self.local_feed = None;
        self.participants.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn participant(id: u64, name: &str) -> Participant {
        Participant {
            feed_id: FeedId(id),
            display_name: Some(name.to_string()),
        }
    }

    #[test]
    fn test_snapshot_filters_local_feed() {
        let mut roster = RosterTracker::new();
        roster.apply_snapshot(
            FeedId(1),
            vec![participant(1, "me"), participant(7, "User-7")],
        );

        assert_eq!(roster.participants(), vec![participant(7, "User-7")]);
        assert!(!roster.contains(FeedId(1)));
    }

    #[test]
    fn test_snapshot_replaces_previous_contents() {
        let mut roster = RosterTracker::new();
        roster.apply_snapshot(FeedId(1), vec![participant(7, "a")]);
        roster.apply_snapshot(FeedId(1), vec![participant(9, "b")]);

        assert_eq!(roster.len(), 1);
        assert!(roster.contains(FeedId(9)));
        assert!(!roster.contains(FeedId(7)));
    }

    #[test]
    fn test_delta_add_skips_local_feed() {
        let mut roster = RosterTracker::new();
        roster.apply_snapshot(FeedId(1), Vec::new());

        let removed = roster.apply_delta(RosterDelta {
            added: vec![participant(1, "me"), participant(8, "User-8")],
            removed: None,
        });

        assert_eq!(removed, None);
        assert_eq!(roster.participants(), vec![participant(8, "User-8")]);
    }

    #[test]
    fn test_delta_removal_reports_only_present_feeds() {
        let mut roster = RosterTracker::new();
        roster.apply_snapshot(FeedId(1), vec![participant(7, "User-7")]);

        let missing = roster.apply_delta(RosterDelta {
            added: Vec::new(),
            removed: Some(FeedId(99)),
        });
        assert_eq!(missing, None);

        let removed = roster.apply_delta(RosterDelta {
            added: Vec::new(),
            removed: Some(FeedId(7)),
        });
        assert_eq!(removed, Some(FeedId(7)));
        assert!(roster.is_empty());
    }

    #[test]
    fn test_participants_sorted_by_feed() {
        let mut roster = RosterTracker::new();
        roster.apply_snapshot(
            FeedId(1),
            vec![participant(30, "c"), participant(10, "a"), participant(20, "b")],
        );

        let ids: Vec<u64> = roster.participants().iter().map(|p| p.feed_id.0).collect();
        assert_eq!(ids, vec![10, 20, 30]);
        assert_eq!(
            roster.get(FeedId(20)).unwrap().display_name.as_deref(),
            Some("b")
        );
    }

    #[test]
    fn test_clear_forgets_local_feed() {
        let mut roster = RosterTracker::new();
        roster.apply_snapshot(FeedId(1), vec![participant(7, "x")]);
        roster.clear();
        assert!(roster.is_empty());

        roster.apply_delta(RosterDelta {
            added: vec![participant(1, "former self")],
            removed: None,
        });
        assert!(roster.contains(FeedId(1)));
    }

    #[test]
    fn test_participant_from_publisher() {
        let p: Participant = Publisher {
            id: FeedId(5),
            display: None,
        }
        .into();
        assert_eq!(p.feed_id, FeedId(5));
        assert!(p.display_name.is_none());
    }
}
