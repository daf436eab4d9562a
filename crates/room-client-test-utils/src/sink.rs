//! Recording `SessionSink`.

use common::types::SlotId;
use room_client::{ClientError, MediaTrack, SessionSink};
use std::sync::{Arc, Mutex};

/// One sink callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    LocalTrack(MediaTrack),
    RemoteTrack {
        slot: SlotId,
        track: MediaTrack,
        added: bool,
    },
    SessionError(ClientError),
}

/// Sink that records every callback in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn local_tracks(&self) -> Vec<MediaTrack> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::LocalTrack(track) => Some(track),
                _ => None,
            })
            .collect()
    }

    /// `(track id, added)` pairs reported for `slot`.
    pub fn remote_tracks(&self, slot: SlotId) -> Vec<(String, bool)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::RemoteTrack {
                    slot: s,
                    track,
                    added,
                } if s == slot => Some((track.id, added)),
                _ => None,
            })
            .collect()
    }

    /// Tracks currently shown in `slot` (added and not yet removed).
    pub fn visible_tracks(&self, slot: SlotId) -> Vec<String> {
        let mut visible: Vec<String> = Vec::new();
        for (id, added) in self.remote_tracks(slot) {
            if added {
                visible.push(id);
            } else {
                visible.retain(|v| *v != id);
            }
        }
        visible
    }

    pub fn session_errors(&self) -> Vec<ClientError> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::SessionError(error) => Some(error),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: SinkEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl SessionSink for RecordingSink {
    fn on_local_track(&self, track: &MediaTrack) {
        self.push(SinkEvent::LocalTrack(track.clone()));
    }

    fn on_remote_track(&self, slot: SlotId, track: &MediaTrack, added: bool) {
        self.push(SinkEvent::RemoteTrack {
            slot,
            track: track.clone(),
            added,
        });
    }

    fn on_session_error(&self, error: &ClientError) {
        self.push(SinkEvent::SessionError(error.clone()));
    }
}
