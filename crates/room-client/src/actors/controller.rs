//! `SessionController` - single owner of one room session.
//!
//! The controller is the only writer of the session identity, the roster,
//! and the handle table. Caller requests, gateway events, negotiation
//! results and track reports all arrive on channels drained by one task, so
//! every state transition is serialized.
//!
//! # Teardown Order
//!
//! Leave, join failure and transport loss share one teardown path:
//! 1. Detach every occupied slot in slot order
//! 2. Detach the publisher (leave first if published)
//! 3. Close the signaling channel
//! 4. Clear identity and roster

use super::messages::{
    ControllerMessage, ControllerState, ControllerStatus, Diagnostic, SlotStatus,
};
use crate::config::RoomSettings;
use crate::errors::{ClientError, ErrorKind};
use crate::negotiation::{NegotiationFactory, TrackEvent, TrackKind};
use crate::observability::metrics;
use crate::roster::{Participant, RosterDelta, RosterTracker};
use crate::session::SessionIdentity;
use crate::sessions::{
    NegotiationOutcome, PublisherSession, PublisherState, SubscriberSession, SubscriberState,
};
use crate::signaling::{GatewayEvent, GatewayEventKind, SignalingChannel};
use crate::sink::SessionSink;
use common::types::{FeedId, HandleId, PrivateId, SlotId};
use gateway_protocol::{Jsep, Publisher, RoomEvent, RoomNotification};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 64;

/// Number of diagnostics kept for `status()`.
const MAX_DIAGNOSTICS: usize = 32;

/// Handle to the `SessionController`.
///
/// This is the public interface for driving a session. All methods are
/// async and return results via oneshot channels. Dropping every handle
/// stops the controller after a full teardown.
#[derive(Clone)]
pub struct SessionControllerHandle {
    sender: mpsc::Sender<ControllerMessage>,
    state: watch::Receiver<ControllerState>,
    cancel_token: CancellationToken,
}

impl SessionControllerHandle {
    /// Create a new `SessionController` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(
        settings: RoomSettings,
        channel: Arc<dyn SignalingChannel>,
        negotiator: Arc<dyn NegotiationFactory>,
        sink: Arc<dyn SessionSink>,
    ) -> Self {
        let (handle, _task) = SessionController::spawn(settings, channel, negotiator, sink);
        handle
    }

    /// Join the room and publish local media.
    ///
    /// Resolves once the publisher is published, or with the first error
    /// after everything created so far has been torn down.
    pub async fn join(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::Join { respond_to: tx })
            .await
            .map_err(|e| ClientError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))?
    }

    /// Leave the room. A no-op when already disconnected.
    pub async fn leave(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::Leave { respond_to: tx })
            .await
            .map_err(|e| ClientError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))?
    }

    /// Bind `slot` to `feed`, or empty it with `None`.
    ///
    /// Resolves once the subscriber join has been sent; media arrives later
    /// through the sink.
    pub async fn select_feed(&self, slot: SlotId, feed: Option<FeedId>) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::SelectFeed {
                slot,
                feed,
                respond_to: tx,
            })
            .await
            .map_err(|e| ClientError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))?
    }

    /// Flip the enabled flag of the local track of `kind`.
    ///
    /// Returns the new flag, or `None` if there is no such local track.
    pub async fn toggle_local_track(&self, kind: TrackKind) -> Result<Option<bool>, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::ToggleLocalTrack {
                kind,
                respond_to: tx,
            })
            .await
            .map_err(|e| ClientError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get a snapshot of the controller.
    pub async fn status(&self) -> Result<ControllerStatus, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| ClientError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ClientError::Internal(format!("response receive failed: {e}")))
    }

    /// Current controller state.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Watch controller state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.state.clone()
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// A `join()` waiting for the publisher to be published.
struct PendingJoin {
    respond_to: oneshot::Sender<Result<(), ClientError>>,
    started: Instant,
    /// `None` when the configured timeout does not fit in an `Instant`.
    deadline: Option<Instant>,
}

/// The `SessionController` implementation.
///
/// This struct owns the session state and runs the message loop.
pub struct SessionController {
    settings: RoomSettings,
    /// Caller requests.
    receiver: mpsc::Receiver<ControllerMessage>,
    /// Root token; session handles hold children of it.
    cancel_token: CancellationToken,
    channel: Arc<dyn SignalingChannel>,
    negotiator: Arc<dyn NegotiationFactory>,
    sink: Arc<dyn SessionSink>,
    gateway_tx: mpsc::UnboundedSender<GatewayEvent>,
    gateway_rx: mpsc::UnboundedReceiver<GatewayEvent>,
    results_tx: mpsc::UnboundedSender<NegotiationOutcome>,
    results_rx: mpsc::UnboundedReceiver<NegotiationOutcome>,
    tracks_tx: mpsc::UnboundedSender<TrackEvent>,
    tracks_rx: mpsc::UnboundedReceiver<TrackEvent>,
    state: ControllerState,
    state_tx: watch::Sender<ControllerState>,
    identity: Option<SessionIdentity>,
    roster: RosterTracker,
    publisher: Option<PublisherSession>,
    /// One entry per slot; `None` is an idle slot.
    slots: Vec<Option<SubscriberSession>>,
    pending_join: Option<PendingJoin>,
    channel_open: bool,
    /// Most recent first.
    diagnostics: VecDeque<Diagnostic>,
}

impl SessionController {
    /// Spawn the controller task.
    ///
    /// Returns the handle and the task's `JoinHandle` for supervision.
    pub fn spawn(
        settings: RoomSettings,
        channel: Arc<dyn SignalingChannel>,
        negotiator: Arc<dyn NegotiationFactory>,
        sink: Arc<dyn SessionSink>,
    ) -> (SessionControllerHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let (state_tx, state_rx) = watch::channel(ControllerState::Disconnected);
        let cancel_token = CancellationToken::new();

        let actor = Self::new(
            settings,
            receiver,
            cancel_token.clone(),
            channel,
            negotiator,
            sink,
            state_tx,
        );
        let task = tokio::spawn(actor.run());

        (
            SessionControllerHandle {
                sender,
                state: state_rx,
                cancel_token,
            },
            task,
        )
    }

    fn new(
        settings: RoomSettings,
        receiver: mpsc::Receiver<ControllerMessage>,
        cancel_token: CancellationToken,
        channel: Arc<dyn SignalingChannel>,
        negotiator: Arc<dyn NegotiationFactory>,
        sink: Arc<dyn SessionSink>,
        state_tx: watch::Sender<ControllerState>,
    ) -> Self {
        let (gateway_tx, gateway_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (tracks_tx, tracks_rx) = mpsc::unbounded_channel();
        let slots = (0..settings.slot_count).map(|_| None).collect();

        Self {
            settings,
            receiver,
            cancel_token,
            channel,
            negotiator,
            sink,
            gateway_tx,
            gateway_rx,
            results_tx,
            results_rx,
            tracks_tx,
            tracks_rx,
            state: ControllerState::Disconnected,
            state_tx,
            identity: None,
            roster: RosterTracker::new(),
            publisher: None,
            slots,
            pending_join: None,
            channel_open: false,
            diagnostics: VecDeque::with_capacity(MAX_DIAGNOSTICS),
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "room.controller", fields(room_id = %self.settings.room_id))]
    async fn run(mut self) {
        info!(
            target: "room.controller",
            room_id = %self.settings.room_id,
            slot_count = self.slots.len(),
            "SessionController started"
        );

        loop {
            let join_deadline = self.pending_join.as_ref().and_then(|p| p.deadline);

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "room.controller",
                        "SessionController received cancellation signal"
                    );
                    self.shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    if let Some(message) = msg {
                        self.handle_message(message).await;
                    } else {
                        info!(
                            target: "room.controller",
                            "SessionController channel closed, exiting"
                        );
                        self.shutdown().await;
                        break;
                    }
                }

                Some(event) = self.gateway_rx.recv() => {
                    self.handle_gateway_event(event).await;
                }

                Some(outcome) = self.results_rx.recv() => {
                    self.handle_outcome(outcome).await;
                }

                Some(track) = self.tracks_rx.recv() => {
                    self.handle_track_event(track);
                }

                () = sleep_until(join_deadline) => {
                    self.on_join_timeout().await;
                }
            }
        }

        info!(
            target: "room.controller",
            diagnostics = self.diagnostics.len(),
            "SessionController stopped"
        );
    }

    /// Handle a single caller request.
    async fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::Join { respond_to } => {
                self.join(respond_to).await;
            }

            ControllerMessage::Leave { respond_to } => {
                let result = self.leave().await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::SelectFeed {
                slot,
                feed,
                respond_to,
            } => {
                let result = self.select_feed(slot, feed).await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::ToggleLocalTrack { kind, respond_to } => {
                let result = self.toggle_local_track(kind);
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
        }
    }

    // ------------------------------------------------------------------
    // Caller operations
    // ------------------------------------------------------------------

    /// Start a join. The reply is held until the publisher is published.
    async fn join(&mut self, respond_to: oneshot::Sender<Result<(), ClientError>>) {
        if self.state != ControllerState::Disconnected {
            let _ = respond_to.send(Err(ClientError::State(format!(
                "join not allowed while {}",
                self.state
            ))));
            return;
        }

        let started = Instant::now();
        self.pending_join = Some(PendingJoin {
            respond_to,
            started,
            deadline: started.checked_add(self.settings.join_timeout),
        });

        info!(
            target: "room.controller",
            room_id = %self.settings.room_id,
            "Joining room"
        );

        self.set_state(ControllerState::Connecting);
        let channel = Arc::clone(&self.channel);
        if let Err(e) = channel.open(self.gateway_tx.clone()).await {
            self.fail_join(e).await;
            return;
        }
        self.channel_open = true;

        self.set_state(ControllerState::Joining);
        let negotiator = Arc::clone(&self.negotiator);
        let mut publisher = PublisherSession::new();
        let result = publisher
            .attach(
                channel.as_ref(),
                negotiator.as_ref(),
                self.tracks_tx.clone(),
                &self.cancel_token,
                &self.settings,
            )
            .await;
        self.publisher = Some(publisher);

        if let Err(e) = result {
            self.fail_join(e).await;
        }
    }

    async fn leave(&mut self) -> Result<(), ClientError> {
        if self.state == ControllerState::Disconnected {
            debug!(target: "room.controller", "Leave while disconnected ignored");
            return Ok(());
        }

        info!(target: "room.controller", "Leaving room");
        self.set_state(ControllerState::Leaving);

        if let Some(pending) = self.pending_join.take() {
            metrics::record_join("cancelled", pending.started.elapsed());
            let _ = pending
                .respond_to
                .send(Err(ClientError::State("join cancelled by leave".to_string())));
        }

        self.teardown().await;
        Ok(())
    }

    async fn select_feed(&mut self, slot: SlotId, feed: Option<FeedId>) -> Result<(), ClientError> {
        if self.state != ControllerState::Joined {
            return Err(ClientError::State(format!(
                "select_feed not allowed while {}",
                self.state
            )));
        }

        let slot_count = self.slots.len();
        if slot.index() >= slot_count {
            return Err(ClientError::InvalidSlot { slot, slot_count });
        }

        let Some(identity) = self.identity else {
            return Err(ClientError::State("no session identity".to_string()));
        };

        let channel = Arc::clone(&self.channel);
        if let Some(existing) = self.slots.get_mut(slot.index()).and_then(Option::take) {
            debug!(
                target: "room.controller",
                slot = %slot,
                feed_id = %existing.feed(),
                "Releasing slot before rebinding"
            );
            self.release_subscriber(existing, channel.as_ref()).await;
        }

        let Some(feed) = feed else {
            info!(target: "room.controller", slot = %slot, "Slot cleared");
            return Ok(());
        };

        if !self.roster.contains(feed) {
            return Err(ClientError::FeedNotFound(feed));
        }

        let negotiator = Arc::clone(&self.negotiator);
        let attached = SubscriberSession::attach(
            slot,
            feed,
            self.settings.room_id,
            &identity,
            channel.as_ref(),
            negotiator.as_ref(),
            self.tracks_tx.clone(),
            &self.cancel_token,
        )
        .await;

        match attached {
            Ok(session) => {
                if let Some(entry) = self.slots.get_mut(slot.index()) {
                    *entry = Some(session);
                }
                metrics::record_subscription("requested");
                metrics::set_active_subscriptions(self.active_subscriptions());
                Ok(())
            }
            Err(e) => {
                metrics::record_subscription("failed");
                warn!(
                    target: "room.controller",
                    slot = %slot,
                    feed_id = %feed,
                    error = %e,
                    "Subscription could not be requested"
                );
                if e.is_session_fatal() {
                    self.end_session(e.clone()).await;
                }
                Err(e)
            }
        }
    }

    fn toggle_local_track(&mut self, kind: TrackKind) -> Result<Option<bool>, ClientError> {
        if self.state != ControllerState::Joined {
            return Err(ClientError::State(format!(
                "toggle_local_track not allowed while {}",
                self.state
            )));
        }

        match self.publisher.as_mut() {
            Some(publisher) => publisher.toggle_track(kind),
            None => Ok(None),
        }
    }

    fn status(&self) -> ControllerStatus {
        ControllerStatus {
            state: self.state,
            self_feed_id: self.identity.map(|i| i.self_feed_id),
            publisher: self
                .publisher
                .as_ref()
                .map_or(PublisherState::Idle, PublisherSession::state),
            participants: self.roster.participants(),
            slots: self
                .slots
                .iter()
                .enumerate()
                .map(|(index, entry)| SlotStatus {
                    slot: SlotId(index),
                    feed: entry.as_ref().map(SubscriberSession::feed),
                    handle: entry.as_ref().map(SubscriberSession::handle_id),
                    state: entry
                        .as_ref()
                        .map_or(SubscriberState::Idle, SubscriberSession::state),
                })
                .collect(),
            diagnostics: self.diagnostics.iter().cloned().collect(),
        }
    }

    // ------------------------------------------------------------------
    // Join completion and teardown
    // ------------------------------------------------------------------

    fn complete_join(&mut self) {
        self.set_state(ControllerState::Joined);

        if let Some(pending) = self.pending_join.take() {
            metrics::record_join("success", pending.started.elapsed());
            let _ = pending.respond_to.send(Ok(()));
        }

        info!(
            target: "room.controller",
            self_feed_id = ?self.identity.map(|i| i.self_feed_id),
            participants = self.roster.len(),
            "Joined room"
        );
    }

    async fn fail_join(&mut self, error: ClientError) {
        warn!(
            target: "room.controller",
            error = %error,
            "Join failed"
        );
        self.record_diagnostic(None, error.label(), error.to_string());
        self.teardown().await;

        if let Some(pending) = self.pending_join.take() {
            metrics::record_join(error.label(), pending.started.elapsed());
            let _ = pending.respond_to.send(Err(error));
        }
    }

    async fn on_join_timeout(&mut self) {
        if self.pending_join.is_none() {
            return;
        }

        let error = ClientError::Timeout(format!(
            "join not completed within {}s",
            self.settings.join_timeout.as_secs()
        ));
        self.fail_join(error).await;
    }

    /// End the session on a fatal error outside the caller's control.
    async fn end_session(&mut self, error: ClientError) {
        if self.pending_join.is_some() {
            self.fail_join(error).await;
            return;
        }
        if self.state == ControllerState::Disconnected {
            return;
        }

        error!(
            target: "room.controller",
            error = %error,
            "Session ended"
        );
        self.record_diagnostic(None, error.label(), error.to_string());
        self.teardown().await;
        self.sink.on_session_error(&error);
    }

    /// Stop on cancellation or when every handle is gone.
    async fn shutdown(&mut self) {
        if let Some(pending) = self.pending_join.take() {
            metrics::record_join("cancelled", pending.started.elapsed());
            let _ = pending
                .respond_to
                .send(Err(ClientError::Internal("controller stopped".to_string())));
        }

        if self.state != ControllerState::Disconnected || self.channel_open {
            self.teardown().await;
        }
    }

    async fn teardown(&mut self) {
        let channel = Arc::clone(&self.channel);

        for index in 0..self.slots.len() {
            if let Some(session) = self.slots.get_mut(index).and_then(Option::take) {
                self.release_subscriber(session, channel.as_ref()).await;
            }
        }

        if let Some(mut publisher) = self.publisher.take() {
            publisher.detach(channel.as_ref()).await;
        }

        if self.channel_open {
            if let Err(e) = channel.close().await {
                warn!(
                    target: "room.controller",
                    error = %e,
                    "Closing signaling channel failed"
                );
            }
            self.channel_open = false;
        }

        self.identity = None;
        self.roster.clear();
        metrics::set_active_subscriptions(0);
        self.set_state(ControllerState::Disconnected);
    }

    /// Detach a subscription and report its tracks as removed.
    async fn release_subscriber(
        &mut self,
        mut session: SubscriberSession,
        channel: &dyn SignalingChannel,
    ) {
        let slot = session.slot();
        let tracks = session.detach(channel).await;

        for track in &tracks {
            self.sink.on_remote_track(slot, track, false);
        }

        metrics::set_active_subscriptions(self.active_subscriptions());
    }

    /// Tear down one slot after a per-slot failure.
    async fn fail_slot(&mut self, index: usize, error: ClientError) {
        let Some(session) = self.slots.get_mut(index).and_then(Option::take) else {
            return;
        };

        warn!(
            target: "room.controller",
            slot = %session.slot(),
            feed_id = %session.feed(),
            handle_id = %session.handle_id(),
            error = %error,
            "Subscription failed"
        );

        if error.kind() == ErrorKind::Negotiation {
            metrics::record_negotiation_failure("subscriber");
        } else {
            metrics::record_protocol_error(error.label());
        }
        metrics::record_subscription("failed");
        self.record_diagnostic(Some(session.handle_id()), error.label(), error.to_string());

        let channel = Arc::clone(&self.channel);
        self.release_subscriber(session, channel.as_ref()).await;
    }

    async fn on_feed_departed(&mut self, feed: FeedId) {
        info!(
            target: "room.controller",
            feed_id = %feed,
            "Publisher left room"
        );

        let channel = Arc::clone(&self.channel);
        for index in 0..self.slots.len() {
            let bound = self
                .slots
                .get(index)
                .and_then(Option::as_ref)
                .is_some_and(|s| s.feed() == feed);
            if !bound {
                continue;
            }

            if let Some(session) = self.slots.get_mut(index).and_then(Option::take) {
                info!(
                    target: "room.controller",
                    slot = %session.slot(),
                    feed_id = %feed,
                    "Releasing slot bound to departed feed"
                );
                self.release_subscriber(session, channel.as_ref()).await;
                metrics::record_subscription("feed_departed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Gateway events
    // ------------------------------------------------------------------

    async fn handle_gateway_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::TransportClosed { reason } => {
                if self.state == ControllerState::Disconnected {
                    debug!(
                        target: "room.controller",
                        reason = %reason,
                        "Transport closed while disconnected"
                    );
                    return;
                }
                self.end_session(ClientError::Transport(reason)).await;
            }

            GatewayEvent::Handle { handle, kind } => {
                if self.publisher.as_ref().is_some_and(|p| p.owns(handle)) {
                    self.on_publisher_event(handle, kind).await;
                } else if let Some(index) = self.slot_for_handle(handle) {
                    self.on_subscriber_event(index, kind).await;
                } else {
                    debug!(
                        target: "room.controller",
                        handle_id = %handle,
                        event = kind.name(),
                        "Event for unknown handle dropped"
                    );
                    metrics::record_stale_result("gateway_event");
                }
            }
        }
    }

    async fn on_publisher_event(&mut self, handle: HandleId, kind: GatewayEventKind) {
        match kind {
            GatewayEventKind::Plugin { event, jsep } => {
                match event {
                    RoomEvent::Joined {
                        id,
                        private_id,
                        publishers,
                        ..
                    } => {
                        self.on_joined(handle, id, private_id, publishers).await;
                    }
                    RoomEvent::Event(notification) => {
                        self.on_publisher_notification(handle, notification).await;
                    }
                    RoomEvent::Destroyed { room } => {
                        self.end_session(ClientError::Protocol(format!("room {room} destroyed")))
                            .await;
                    }
                    other => {
                        debug!(
                            target: "room.controller",
                            handle_id = %handle,
                            event = other.name(),
                            "Publisher event ignored"
                        );
                    }
                }

                if let Some(jsep) = jsep {
                    self.on_publisher_jsep(handle, jsep);
                }
            }

            GatewayEventKind::Malformed { reason } => {
                self.record_protocol_anomaly(Some(handle), &ClientError::Protocol(reason));
            }

            GatewayEventKind::WebrtcUp => {
                info!(
                    target: "room.controller",
                    handle_id = %handle,
                    "Publisher media path up"
                );
            }

            GatewayEventKind::Media { kind, receiving } => {
                debug!(
                    target: "room.controller",
                    handle_id = %handle,
                    media = %kind,
                    receiving,
                    "Gateway media state changed"
                );
            }

            GatewayEventKind::Hangup { reason } => {
                self.record_protocol_anomaly(
                    Some(handle),
                    &ClientError::Protocol(format!("publisher hangup: {reason}")),
                );
            }

            GatewayEventKind::Detached => {
                self.end_session(ClientError::Protocol(
                    "publisher handle detached by gateway".to_string(),
                ))
                .await;
            }
        }
    }

    async fn on_joined(
        &mut self,
        handle: HandleId,
        self_feed_id: FeedId,
        private_id: PrivateId,
        publishers: Vec<Publisher>,
    ) {
        if self.pending_join.is_none() || self.identity.is_some() {
            self.record_protocol_anomaly(
                Some(handle),
                &ClientError::Protocol("unexpected joined confirmation".to_string()),
            );
            return;
        }

        self.identity = Some(SessionIdentity {
            self_feed_id,
            private_id,
        });
        self.roster.apply_snapshot(
            self_feed_id,
            publishers.into_iter().map(Participant::from),
        );

        info!(
            target: "room.controller",
            self_feed_id = %self_feed_id,
            participants = self.roster.len(),
            "Join confirmed"
        );

        let results = self.results_tx.clone();
        let started = match self.publisher.as_mut() {
            Some(publisher) => publisher.on_joined(&results),
            None => Err(ClientError::State("no publisher session".to_string())),
        };

        if let Err(e) = started {
            self.fail_join(e).await;
        }
    }

    async fn on_publisher_notification(&mut self, handle: HandleId, notification: RoomNotification) {
        if let Some((code, reason)) = notification.failure() {
            let error = ClientError::Rejected { code, reason };
            let join_requested = self
                .publisher
                .as_ref()
                .is_some_and(|p| p.state() == PublisherState::JoinRequested);

            if join_requested && self.pending_join.is_some() {
                self.fail_join(error).await;
                return;
            }
            self.record_protocol_anomaly(Some(handle), &error);
        }

        if notification.configured.is_some() {
            debug!(
                target: "room.controller",
                handle_id = %handle,
                "Publisher configuration acknowledged"
            );
        }

        if self.identity.is_none() {
            return;
        }

        let removed = notification.departed_feed();
        let delta = RosterDelta {
            added: notification
                .publishers
                .into_iter()
                .map(Participant::from)
                .collect(),
            removed,
        };
        if delta.is_empty() {
            return;
        }

        if let Some(feed) = self.roster.apply_delta(delta) {
            self.on_feed_departed(feed).await;
        }
    }

    fn on_publisher_jsep(&mut self, handle: HandleId, jsep: Jsep) {
        let results = self.results_tx.clone();
        let routed = match self.publisher.as_mut() {
            Some(publisher) if publisher.owns(handle) => publisher.on_remote_jsep(jsep, &results),
            _ => return,
        };

        if let Err(e) = routed {
            self.record_protocol_anomaly(Some(handle), &e);
        }
    }

    async fn on_subscriber_event(&mut self, index: usize, kind: GatewayEventKind) {
        let results = self.results_tx.clone();
        let routed = {
            let roster = &self.roster;
            let Some(session) = self.slots.get_mut(index).and_then(Option::as_mut) else {
                return;
            };
            route_subscriber_event(session, roster, kind, &results)
        };

        if let Err(e) = routed {
            self.fail_slot(index, e).await;
        }
    }

    // ------------------------------------------------------------------
    // Negotiation results and tracks
    // ------------------------------------------------------------------

    async fn handle_outcome(&mut self, outcome: NegotiationOutcome) {
        let handle = outcome.handle();

        if self.publisher.as_ref().is_some_and(|p| p.owns(handle)) {
            self.on_publisher_outcome(outcome).await;
        } else if let Some(index) = self.slot_for_handle(handle) {
            self.on_subscriber_outcome(index, outcome).await;
        } else {
            debug!(
                target: "room.controller",
                handle_id = %handle,
                step = outcome.step(),
                "Negotiation result for detached handle dropped"
            );
            metrics::record_stale_result("negotiation");
        }
    }

    async fn on_publisher_outcome(&mut self, outcome: NegotiationOutcome) {
        let handle = outcome.handle();

        match outcome {
            NegotiationOutcome::Offer {
                result: Ok(offer), ..
            } => {
                let channel = Arc::clone(&self.channel);
                let sent = match self.publisher.as_mut() {
                    Some(publisher) => publisher.on_offer_ready(channel.as_ref(), offer).await,
                    None => return,
                };

                match sent {
                    Ok(()) if self.pending_join.is_some() => self.complete_join(),
                    Ok(()) => {}
                    Err(e) if self.pending_join.is_some() => self.fail_join(e).await,
                    Err(e) if e.is_session_fatal() => self.end_session(e).await,
                    Err(e) => self.record_protocol_anomaly(Some(handle), &e),
                }
            }

            NegotiationOutcome::Offer {
                result: Err(e), ..
            } => {
                metrics::record_negotiation_failure("publisher");
                let error = ClientError::from(e);
                if self.pending_join.is_some() {
                    self.fail_join(error).await;
                } else {
                    self.record_diagnostic(Some(handle), error.label(), error.to_string());
                }
            }

            NegotiationOutcome::AnswerApplied { result: Ok(()), .. } => {
                debug!(
                    target: "room.controller",
                    handle_id = %handle,
                    "Remote answer applied"
                );
            }

            NegotiationOutcome::AnswerApplied {
                result: Err(e), ..
            } => {
                metrics::record_negotiation_failure("publisher");
                let error = ClientError::from(e);
                warn!(
                    target: "room.controller",
                    handle_id = %handle,
                    error = %error,
                    "Applying remote answer failed"
                );
                self.record_diagnostic(Some(handle), error.label(), error.to_string());
            }

            NegotiationOutcome::Answer { .. } => {
                debug!(
                    target: "room.controller",
                    handle_id = %handle,
                    "Answer result on publisher handle dropped"
                );
                metrics::record_stale_result("negotiation");
            }
        }
    }

    async fn on_subscriber_outcome(&mut self, index: usize, outcome: NegotiationOutcome) {
        match outcome {
            NegotiationOutcome::Answer {
                result: Ok(answer),
                ..
            } => {
                let channel = Arc::clone(&self.channel);
                let sent = match self.slots.get_mut(index).and_then(Option::as_mut) {
                    Some(session) => session.on_answer_ready(channel.as_ref(), answer).await,
                    None => return,
                };

                match sent {
                    Ok(()) => metrics::record_subscription("active"),
                    Err(e) if e.is_session_fatal() => self.end_session(e).await,
                    Err(e) => self.fail_slot(index, e).await,
                }
            }

            NegotiationOutcome::Answer {
                result: Err(e), ..
            } => {
                self.fail_slot(index, ClientError::from(e)).await;
            }

            other => {
                debug!(
                    target: "room.controller",
                    handle_id = %other.handle(),
                    step = other.step(),
                    "Publisher-only result on subscriber handle dropped"
                );
                metrics::record_stale_result("negotiation");
            }
        }
    }

    fn handle_track_event(&mut self, event: TrackEvent) {
        let TrackEvent {
            handle,
            track,
            added,
        } = event;

        if let Some(publisher) = self.publisher.as_mut().filter(|p| p.owns(handle)) {
            if publisher.record_track(&track, added) {
                self.sink.on_local_track(&track);
            }
            return;
        }

        if let Some(session) = self
            .slots
            .iter_mut()
            .flatten()
            .find(|s| s.handle_id() == handle)
        {
            session.record_track(&track, added);
            self.sink.on_remote_track(session.slot(), &track, added);
            return;
        }

        debug!(
            target: "room.controller",
            handle_id = %handle,
            track_id = %track.id,
            "Track event for detached handle dropped"
        );
        metrics::record_stale_result("track");
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn set_state(&mut self, state: ControllerState) {
        if self.state == state {
            return;
        }

        debug!(
            target: "room.controller",
            from = self.state.as_str(),
            to = state.as_str(),
            "Controller state changed"
        );
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn slot_for_handle(&self, handle: HandleId) -> Option<usize> {
        self.slots
            .iter()
            .position(|entry| entry.as_ref().is_some_and(|s| s.handle_id() == handle))
    }

    fn active_subscriptions(&self) -> usize {
        self.slots.iter().filter(|entry| entry.is_some()).count()
    }

    fn record_protocol_anomaly(&mut self, handle: Option<HandleId>, error: &ClientError) {
        warn!(
            target: "room.controller",
            handle_id = ?handle,
            error = %error,
            "Gateway protocol anomaly"
        );
        metrics::record_protocol_error(error.label());
        self.record_diagnostic(handle, error.label(), error.to_string());
    }

    fn record_diagnostic(&mut self, handle: Option<HandleId>, kind: &'static str, message: String) {
        self.diagnostics.push_front(Diagnostic {
            at: chrono::Utc::now(),
            handle,
            kind,
            message,
        });
        self.diagnostics.truncate(MAX_DIAGNOSTICS);
    }
}

/// Apply one gateway event to a subscription.
///
/// An `Err` means the slot must be torn down.
fn route_subscriber_event(
    session: &mut SubscriberSession,
    roster: &RosterTracker,
    kind: GatewayEventKind,
    results: &mpsc::UnboundedSender<NegotiationOutcome>,
) -> Result<(), ClientError> {
    match kind {
        GatewayEventKind::Plugin { event, jsep } => {
            match event {
                RoomEvent::Attached { id, .. } => {
                    if !roster.contains(id) {
                        return Err(ClientError::Protocol(format!(
                            "attached to feed {id} which is no longer in the room"
                        )));
                    }
                    session.on_attached(id)?;
                }
                RoomEvent::Event(notification) => {
                    if let Some((code, reason)) = notification.failure() {
                        return Err(ClientError::Rejected { code, reason });
                    }
                    if notification.started.is_some() {
                        debug!(
                            target: "room.controller",
                            slot = %session.slot(),
                            "Subscription start acknowledged"
                        );
                    }
                }
                other => {
                    debug!(
                        target: "room.controller",
                        slot = %session.slot(),
                        event = other.name(),
                        "Subscriber event ignored"
                    );
                }
            }

            if let Some(jsep) = jsep {
                session.on_remote_jsep(jsep, results)?;
            }
            Ok(())
        }

        GatewayEventKind::Malformed { reason } => Err(ClientError::Protocol(format!(
            "malformed plugin event: {reason}"
        ))),

        GatewayEventKind::WebrtcUp => {
            debug!(
                target: "room.controller",
                slot = %session.slot(),
                "Subscription media path up"
            );
            Ok(())
        }

        GatewayEventKind::Media { kind, receiving } => {
            debug!(
                target: "room.controller",
                slot = %session.slot(),
                media = %kind,
                receiving,
                "Subscription media state changed"
            );
            Ok(())
        }

        GatewayEventKind::Hangup { reason } => {
            Err(ClientError::Protocol(format!("media hangup: {reason}")))
        }

        GatewayEventKind::Detached => Err(ClientError::Protocol(
            "handle detached by gateway".to_string(),
        )),
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
