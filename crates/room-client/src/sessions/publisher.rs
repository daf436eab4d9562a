//! `PublisherSession` - the local publisher handle.
//!
//! Lifecycle: `Idle → Attaching → JoinRequested → Negotiating → Published →
//! Detaching → Detached`.
//!
//! The session attaches a handle, creates the room (best effort), and asks
//! to join as publisher. On the `joined` confirmation it creates an offer
//! and sends it with `configure`. Remote answers may arrive any number of
//! times afterwards and are applied without changing state.

use super::{spawn_negotiation, NegotiationOutcome};
use crate::config::RoomSettings;
use crate::errors::ClientError;
use crate::negotiation::{
    MediaDirections, MediaTrack, NegotiationContext, NegotiationFactory, TrackEvent, TrackKind,
    TrackReporter,
};
use crate::observability::metrics;
use crate::session::{SessionHandle, SessionRole};
use crate::signaling::SignalingChannel;
use common::types::HandleId;
use gateway_protocol::videoroom::ERROR_ROOM_EXISTS;
use gateway_protocol::{JoinRequest, Jsep, JsepKind, RoomEvent, RoomRequest};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound (exclusive) of the numeric display name suffix.
const DISPLAY_SUFFIX_RANGE: u32 = 1000;

/// Publisher lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Idle,
    Attaching,
    JoinRequested,
    Negotiating,
    Published,
    Detaching,
    Detached,
}

impl PublisherState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PublisherState::Idle => "idle",
            PublisherState::Attaching => "attaching",
            PublisherState::JoinRequested => "join_requested",
            PublisherState::Negotiating => "negotiating",
            PublisherState::Published => "published",
            PublisherState::Detaching => "detaching",
            PublisherState::Detached => "detached",
        }
    }
}

#[derive(Debug)]
struct LocalTrack {
    track: MediaTrack,
    enabled: bool,
}

/// The local publisher and its negotiation context.
pub struct PublisherSession {
    state: PublisherState,
    handle: Option<SessionHandle>,
    context: Option<Arc<dyn NegotiationContext>>,
    offer_sent: bool,
    local_tracks: Vec<LocalTrack>,
}

impl Default for PublisherSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PublisherSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: PublisherState::Idle,
            handle: None,
            context: None,
            offer_sent: false,
            local_tracks: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> PublisherState {
        self.state
    }

    #[must_use]
    pub fn handle_id(&self) -> Option<HandleId> {
        self.handle.as_ref().map(SessionHandle::id)
    }

    /// Whether `handle` is this publisher's current handle.
    #[must_use]
    pub fn owns(&self, handle: HandleId) -> bool {
        self.handle_id() == Some(handle)
    }

    /// Attach, create the room, and request the publisher join.
    ///
    /// Refusal of create-room is logged only. Transport failures are
    /// returned; the caller is responsible for detaching afterwards.
    pub async fn attach(
        &mut self,
        channel: &dyn SignalingChannel,
        negotiator: &dyn NegotiationFactory,
        tracks: mpsc::UnboundedSender<TrackEvent>,
        parent: &CancellationToken,
        settings: &RoomSettings,
    ) -> Result<(), ClientError> {
        if self.state != PublisherState::Idle {
            return Err(ClientError::State(format!(
                "publisher attach while {}",
                self.state.as_str()
            )));
        }

        self.state = PublisherState::Attaching;
        let handle_id = channel.attach().await?;
        let handle = SessionHandle::new(handle_id, SessionRole::Publisher, parent);
        self.context = Some(negotiator.create(
            &SessionRole::Publisher,
            TrackReporter::new(handle_id, tracks),
        ));
        self.handle = Some(handle);

        debug!(
            target: "room.publisher",
            handle_id = %handle_id,
            "Publisher handle attached"
        );

        let create = RoomRequest::Create {
            room: settings.room_id,
            description: settings.description.clone(),
            bitrate: None,
        };
        match channel.request(handle_id, create).await {
            Ok(RoomEvent::Event(notification)) => {
                if let Some((code, reason)) = notification.failure() {
                    if code == ERROR_ROOM_EXISTS {
                        debug!(
                            target: "room.publisher",
                            room_id = %settings.room_id,
                            "Room already exists"
                        );
                    } else {
                        warn!(
                            target: "room.publisher",
                            room_id = %settings.room_id,
                            code,
                            reason = %reason,
                            "Gateway refused room creation, joining anyway"
                        );
                    }
                }
            }
            Ok(event) => {
                debug!(
                    target: "room.publisher",
                    room_id = %settings.room_id,
                    reply = event.name(),
                    "Room create acknowledged"
                );
            }
            Err(e) if e.is_session_fatal() => return Err(e),
            Err(e) => {
                warn!(
                    target: "room.publisher",
                    room_id = %settings.room_id,
                    error = %e,
                    "Room create failed, joining anyway"
                );
            }
        }

        let display_name = generate_display_name(&settings.display_name_prefix);
        self.state = PublisherState::JoinRequested;
        channel
            .message(
                handle_id,
                RoomRequest::Join(JoinRequest::Publisher {
                    room: settings.room_id,
                    display: display_name.clone(),
                }),
                None,
            )
            .await?;

        info!(
            target: "room.publisher",
            handle_id = %handle_id,
            room_id = %settings.room_id,
            display_name = %display_name,
            "Publisher join requested"
        );

        Ok(())
    }

    /// Join confirmed: start creating the offer.
    pub fn on_joined(
        &mut self,
        results: &mpsc::UnboundedSender<NegotiationOutcome>,
    ) -> Result<(), ClientError> {
        if self.state != PublisherState::JoinRequested {
            return Err(ClientError::Protocol(format!(
                "joined confirmation while publisher {}",
                self.state.as_str()
            )));
        }

        let (Some(handle), Some(context)) = (self.handle.as_ref(), self.context.as_ref()) else {
            return Err(ClientError::State("publisher has no handle".to_string()));
        };

        self.state = PublisherState::Negotiating;
        let handle_id = handle.id();
        let context = Arc::clone(context);

        spawn_negotiation(handle.token(), results.clone(), async move {
            let result = context.create_offer(MediaDirections::publish()).await;
            NegotiationOutcome::Offer {
                handle: handle_id,
                result,
            }
        });

        debug!(
            target: "room.publisher",
            handle_id = %handle_id,
            "Creating publisher offer"
        );

        Ok(())
    }

    /// Offer ready: send it with `configure` and mark the publisher published.
    pub async fn on_offer_ready(
        &mut self,
        channel: &dyn SignalingChannel,
        offer: Jsep,
    ) -> Result<(), ClientError> {
        if self.state != PublisherState::Negotiating {
            return Err(ClientError::Protocol(format!(
                "offer ready while publisher {}",
                self.state.as_str()
            )));
        }
        let Some(handle_id) = self.handle_id() else {
            return Err(ClientError::State("publisher has no handle".to_string()));
        };

        let directions = MediaDirections::publish();
        channel
            .message(
                handle_id,
                RoomRequest::Configure {
                    audio: directions.send_audio,
                    video: directions.send_video,
                },
                Some(offer),
            )
            .await?;

        self.offer_sent = true;
        self.state = PublisherState::Published;

        info!(
            target: "room.publisher",
            handle_id = %handle_id,
            "Publisher configured"
        );

        Ok(())
    }

    /// Route a negotiation blob received on the publisher handle.
    ///
    /// Answers are applied in the background; anything else is a protocol
    /// anomaly returned to the caller for logging.
    pub fn on_remote_jsep(
        &mut self,
        jsep: Jsep,
        results: &mpsc::UnboundedSender<NegotiationOutcome>,
    ) -> Result<(), ClientError> {
        match jsep.kind {
            JsepKind::Offer => Err(ClientError::Protocol(
                "unexpected offer on publisher handle".to_string(),
            )),
            JsepKind::Answer if !self.offer_sent => Err(ClientError::Protocol(
                "answer received before any offer was sent".to_string(),
            )),
            JsepKind::Answer => {
                let (Some(handle), Some(context)) = (self.handle.as_ref(), self.context.as_ref())
                else {
                    return Err(ClientError::State("publisher has no handle".to_string()));
                };

                let handle_id = handle.id();
                let context = Arc::clone(context);
                spawn_negotiation(handle.token(), results.clone(), async move {
                    let result = context.apply_answer(jsep).await;
                    NegotiationOutcome::AnswerApplied {
                        handle: handle_id,
                        result,
                    }
                });
                Ok(())
            }
        }
    }

    /// Remember a local track. Returns true if it is newly added.
    pub fn record_track(&mut self, track: &MediaTrack, added: bool) -> bool {
        if added {
            if self.local_tracks.iter().any(|t| t.track.id == track.id) {
                return false;
            }
            self.local_tracks.push(LocalTrack {
                track: track.clone(),
                enabled: true,
            });
            true
        } else {
            self.local_tracks.retain(|t| t.track.id != track.id);
            false
        }
    }

    /// Flip the enabled flag of the first local track of `kind`.
    ///
    /// Returns the new flag, or `None` if no such track exists.
    pub fn toggle_track(&mut self, kind: TrackKind) -> Result<Option<bool>, ClientError> {
        let Some(context) = self.context.as_ref() else {
            return Ok(None);
        };
        let Some(local) = self.local_tracks.iter_mut().find(|t| t.track.kind == kind) else {
            return Ok(None);
        };

        let enabled = !local.enabled;
        context.set_track_enabled(&local.track.id, enabled)?;
        local.enabled = enabled;

        debug!(
            target: "room.publisher",
            kind = %kind,
            enabled,
            "Local track toggled"
        );

        Ok(Some(enabled))
    }

    /// Leave (if published), release media, and detach the handle.
    ///
    /// Safe from any state; a no-op when nothing was attached. Gateway
    /// failures during teardown are logged, never returned.
    pub async fn detach(&mut self, channel: &dyn SignalingChannel) {
        if matches!(self.state, PublisherState::Idle | PublisherState::Detached) {
            return;
        }

        let was_published = self.state == PublisherState::Published;
        self.state = PublisherState::Detaching;

        if let Some(handle) = self.handle.take() {
            handle.cancel();

            if was_published {
                if let Err(e) = channel.message(handle.id(), RoomRequest::Leave, None).await {
                    warn!(
                        target: "room.publisher",
                        handle_id = %handle.id(),
                        error = %e,
                        "Leave request failed"
                    );
                }
            }

            if let Some(context) = self.context.take() {
                context.close();
            }

            if let Err(e) = channel.detach(handle.id()).await {
                warn!(
                    target: "room.publisher",
                    handle_id = %handle.id(),
                    error = %e,
                    "Publisher detach failed"
                );
            }

            metrics::record_detach(handle.role().as_str());
            info!(
                target: "room.publisher",
                handle_id = %handle.id(),
                "Publisher detached"
            );
        }

        if let Some(context) = self.context.take() {
            context.close();
        }
        self.local_tracks.clear();
        self.offer_sent = false;
        self.state = PublisherState::Detached;
    }
}

/// `<prefix>-<0..999>`
fn generate_display_name(prefix: &str) -> String {
    let suffix = rand::thread_rng().gen_range(0..DISPLAY_SUFFIX_RANGE);
    format!("{prefix}-{suffix}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_format() {
        for _ in 0..50 {
            let name = generate_display_name("User");
            let suffix = name.strip_prefix("User-").unwrap();
            let value: u32 = suffix.parse().unwrap();
            assert!(value < DISPLAY_SUFFIX_RANGE);
        }
    }

    #[test]
    fn test_new_publisher_is_idle() {
        let publisher = PublisherSession::new();
        assert_eq!(publisher.state(), PublisherState::Idle);
        assert_eq!(publisher.handle_id(), None);
        assert!(!publisher.owns(HandleId(1)));
    }

    #[test]
    fn test_joined_outside_join_request_is_protocol_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut publisher = PublisherSession::new();

        let err = publisher.on_joined(&tx).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
        assert_eq!(publisher.state(), PublisherState::Idle);
    }

    #[test]
    fn test_answer_before_offer_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut publisher = PublisherSession::new();

        let err = publisher
            .on_remote_jsep(Jsep::answer("v=0"), &tx)
            .unwrap_err();
        assert!(matches!(err, ClientError::Protocol(msg) if msg.contains("before any offer")));
    }

    #[test]
    fn test_offer_on_publisher_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut publisher = PublisherSession::new();

        let err = publisher.on_remote_jsep(Jsep::offer("v=0"), &tx).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn test_record_track_deduplicates() {
        let mut publisher = PublisherSession::new();
        let mic = MediaTrack::new("mic", TrackKind::Audio);

        assert!(publisher.record_track(&mic, true));
        assert!(!publisher.record_track(&mic, true));
        assert!(!publisher.record_track(&mic, false));
        assert!(publisher.record_track(&mic, true));
    }

    #[test]
    fn test_toggle_without_context_is_none() {
        let mut publisher = PublisherSession::new();
        publisher.record_track(&MediaTrack::new("mic", TrackKind::Audio), true);
        assert_eq!(publisher.toggle_track(TrackKind::Audio).unwrap(), None);
    }
}
