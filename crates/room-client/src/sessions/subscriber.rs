//! `SubscriberSession` - one remote-feed subscription.
//!
//! Lifecycle: `Idle → Attaching → JoinRequested → Negotiating → Active →
//! Detaching → Idle`. A session is bound to exactly one feed for its whole
//! life; switching feeds means detaching and attaching a new session.

use super::{spawn_negotiation, NegotiationOutcome};
use crate::errors::ClientError;
use crate::negotiation::{
    MediaDirections, MediaTrack, NegotiationContext, NegotiationFactory, TrackEvent, TrackReporter,
};
use crate::observability::metrics;
use crate::session::{SessionHandle, SessionIdentity, SessionRole};
use crate::signaling::SignalingChannel;
use common::types::{FeedId, HandleId, RoomId, SlotId};
use gateway_protocol::{JoinRequest, Jsep, JsepKind, RoomRequest};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Subscription lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Idle,
    Attaching,
    JoinRequested,
    Negotiating,
    Active,
    Detaching,
}

impl SubscriberState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SubscriberState::Idle => "idle",
            SubscriberState::Attaching => "attaching",
            SubscriberState::JoinRequested => "join_requested",
            SubscriberState::Negotiating => "negotiating",
            SubscriberState::Active => "active",
            SubscriberState::Detaching => "detaching",
        }
    }
}

/// Subscription to one remote feed in one slot.
pub struct SubscriberSession {
    slot: SlotId,
    feed: FeedId,
    room: RoomId,
    state: SubscriberState,
    handle: SessionHandle,
    context: Arc<dyn NegotiationContext>,
    held_tracks: Vec<MediaTrack>,
}

impl SubscriberSession {
    /// Attach a handle and send the subscriber join for `feed`.
    ///
    /// If the join cannot be sent the handle is released before returning.
    #[allow(clippy::too_many_arguments)]
    pub async fn attach(
        slot: SlotId,
        feed: FeedId,
        room: RoomId,
        identity: &SessionIdentity,
        channel: &dyn SignalingChannel,
        negotiator: &dyn NegotiationFactory,
        tracks: mpsc::UnboundedSender<TrackEvent>,
        parent: &CancellationToken,
    ) -> Result<Self, ClientError> {
        let handle_id = channel.attach().await?;
        let role = SessionRole::Subscriber { slot, feed };
        let context = negotiator.create(&role, TrackReporter::new(handle_id, tracks));

        let mut session = Self {
            slot,
            feed,
            room,
            state: SubscriberState::Attaching,
            handle: SessionHandle::new(handle_id, role, parent),
            context,
            held_tracks: Vec::new(),
        };

        let join = RoomRequest::Join(JoinRequest::Subscriber {
            room,
            feed,
            private_id: identity.private_id,
        });
        if let Err(e) = channel.message(handle_id, join, None).await {
            session.detach(channel).await;
            return Err(e);
        }

        session.state = SubscriberState::JoinRequested;
        info!(
            target: "room.subscriber",
            slot = %slot,
            feed_id = %feed,
            handle_id = %handle_id,
            "Subscription requested"
        );

        Ok(session)
    }

    #[must_use]
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    #[must_use]
    pub fn feed(&self) -> FeedId {
        self.feed
    }

    #[must_use]
    pub fn state(&self) -> SubscriberState {
        self.state
    }

    #[must_use]
    pub fn handle_id(&self) -> HandleId {
        self.handle.id()
    }

    /// Subscriber join confirmed for `feed`.
    pub fn on_attached(&self, feed: FeedId) -> Result<(), ClientError> {
        if feed != self.feed {
            return Err(ClientError::Protocol(format!(
                "attached to feed {feed} but subscribed to {}",
                self.feed
            )));
        }

        debug!(
            target: "room.subscriber",
            slot = %self.slot,
            feed_id = %feed,
            "Subscription attached"
        );
        Ok(())
    }

    /// Route a negotiation blob received on this handle.
    ///
    /// Offers start answer creation; answers are not expected here.
    pub fn on_remote_jsep(
        &mut self,
        jsep: Jsep,
        results: &mpsc::UnboundedSender<NegotiationOutcome>,
    ) -> Result<(), ClientError> {
        match jsep.kind {
            JsepKind::Answer => Err(ClientError::Protocol(
                "unexpected answer on subscriber handle".to_string(),
            )),
            JsepKind::Offer => {
                if !matches!(
                    self.state,
                    SubscriberState::JoinRequested | SubscriberState::Active
                ) {
                    return Err(ClientError::Protocol(format!(
                        "offer while subscriber {}",
                        self.state.as_str()
                    )));
                }

                self.state = SubscriberState::Negotiating;
                let handle_id = self.handle.id();
                let context = Arc::clone(&self.context);
                spawn_negotiation(self.handle.token(), results.clone(), async move {
                    let result = context
                        .create_answer(jsep, MediaDirections::receive_only())
                        .await;
                    NegotiationOutcome::Answer {
                        handle: handle_id,
                        result,
                    }
                });

                debug!(
                    target: "room.subscriber",
                    slot = %self.slot,
                    feed_id = %self.feed,
                    "Creating subscriber answer"
                );
                Ok(())
            }
        }
    }

    /// Answer ready: send `start` with it.
    pub async fn on_answer_ready(
        &mut self,
        channel: &dyn SignalingChannel,
        answer: Jsep,
    ) -> Result<(), ClientError> {
        if self.state != SubscriberState::Negotiating {
            return Err(ClientError::Protocol(format!(
                "answer ready while subscriber {}",
                self.state.as_str()
            )));
        }

        channel
            .message(
                self.handle.id(),
                RoomRequest::Start { room: self.room },
                Some(answer),
            )
            .await?;

        self.state = SubscriberState::Active;
        info!(
            target: "room.subscriber",
            slot = %self.slot,
            feed_id = %self.feed,
            "Subscription active"
        );
        Ok(())
    }

    /// Remember or forget a remote track.
    pub fn record_track(&mut self, track: &MediaTrack, added: bool) {
        if added {
            if !self.held_tracks.iter().any(|t| t.id == track.id) {
                self.held_tracks.push(track.clone());
            }
        } else {
            self.held_tracks.retain(|t| t.id != track.id);
        }
    }

    /// Release the negotiation context and the handle.
    ///
    /// Safe in any state. Returns the tracks that were still held so the
    /// caller can report their removal.
    pub async fn detach(&mut self, channel: &dyn SignalingChannel) -> Vec<MediaTrack> {
        self.state = SubscriberState::Detaching;
        self.handle.cancel();
        self.context.close();

        if let Err(e) = channel.detach(self.handle.id()).await {
            warn!(
                target: "room.subscriber",
                slot = %self.slot,
                handle_id = %self.handle.id(),
                error = %e,
                "Subscriber detach failed"
            );
        }

        self.state = SubscriberState::Idle;
        metrics::record_detach(self.handle.role().as_str());
        info!(
            target: "room.subscriber",
            slot = %self.slot,
            feed_id = %self.feed,
            handle_id = %self.handle.id(),
            "Subscription detached"
        );

        std::mem::take(&mut self.held_tracks)
    }
}
