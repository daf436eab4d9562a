//! Scripted in-memory gateway for controller testing.
//!
//! `MockGateway` implements `SignalingChannel` without a socket. Every call
//! is recorded, and the usual gateway reactions are emitted as events:
//! - publisher join: `joined` with the scripted roster
//! - `configure` with an offer: an answer blob
//! - subscriber join: `attached` plus an offer blob
//! - `start`: a `started` acknowledgement
//!
//! A message kind can also be scripted to time out, as a gateway that never
//! answers would.
//!
//! Each reaction can be switched off or turned into a refusal through the
//! builder, and tests can inject arbitrary events with [`MockGateway::emit`].
//!
//! # Example
//!
//! ```rust,ignore
//! use room_client_test_utils::MockGateway;
//!
//! let gateway = MockGateway::builder()
//!     .self_feed(FeedId(1))
//!     .publisher(FeedId(7), "User-7")
//!     .build();
//! ```

use common::types::{FeedId, HandleId, PrivateId};
use gateway_protocol::{
    JoinRequest, Jsep, Publisher, RoomEvent, RoomNotification, RoomRequest, ERROR_ROOM_EXISTS,
};
use room_client::{ClientError, GatewayEvent, GatewayEventKind, SignalingChannel};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// First handle id handed out by `attach`.
pub const FIRST_HANDLE_ID: u64 = 1000;

/// A call made on the mock gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Open,
    Attach(HandleId),
    Request {
        handle: HandleId,
        body: RoomRequest,
    },
    Message {
        handle: HandleId,
        body: RoomRequest,
        jsep: Option<Jsep>,
    },
    Detach(HandleId),
    Close,
}

impl GatewayCall {
    /// Whether this is a plugin message with the given request name.
    pub fn is_message(&self, name: &str) -> bool {
        matches!(self, GatewayCall::Message { body, .. } if body.name() == name)
    }
}

/// How the mock gateway reacts to requests.
#[derive(Debug, Clone)]
pub struct GatewayScript {
    pub self_feed: FeedId,
    pub private_id: PrivateId,
    /// Roster returned with the publisher join confirmation.
    pub publishers: Vec<Publisher>,
    /// Answer create-room with "already exists".
    pub room_exists: bool,
    /// Refuse the publisher join with this code and reason.
    pub join_rejection: Option<(u32, String)>,
    /// Refuse subscriber joins with this code and reason.
    pub subscriber_rejection: Option<(u32, String)>,
    pub fail_open: bool,
    pub confirm_join: bool,
    pub answer_publisher: bool,
    pub offer_subscribers: bool,
    /// Plugin message that fails with `Timeout` instead of being sent.
    pub unanswered_message: Option<&'static str>,
}

impl Default for GatewayScript {
    fn default() -> Self {
        Self {
            self_feed: FeedId(1),
            private_id: PrivateId(424_242),
            publishers: Vec::new(),
            room_exists: false,
            join_rejection: None,
            subscriber_rejection: None,
            fail_open: false,
            confirm_join: true,
            answer_publisher: true,
            offer_subscribers: true,
            unanswered_message: None,
        }
    }
}

/// Builder for [`MockGateway`].
#[derive(Debug, Default)]
pub struct MockGatewayBuilder {
    script: GatewayScript,
}

impl MockGatewayBuilder {
    /// Feed id assigned to the local publisher.
    pub fn self_feed(mut self, feed: FeedId) -> Self {
        self.script.self_feed = feed;
        self
    }

    pub fn private_id(mut self, private_id: PrivateId) -> Self {
        self.script.private_id = private_id;
        self
    }

    /// Add a remote publisher to the join snapshot.
    pub fn publisher(mut self, feed: FeedId, display: &str) -> Self {
        self.script.publishers.push(Publisher {
            id: feed,
            display: Some(display.to_string()),
        });
        self
    }

    pub fn room_exists(mut self) -> Self {
        self.script.room_exists = true;
        self
    }

    pub fn reject_join(mut self, code: u32, reason: &str) -> Self {
        self.script.join_rejection = Some((code, reason.to_string()));
        self
    }

    pub fn reject_subscriptions(mut self, code: u32, reason: &str) -> Self {
        self.script.subscriber_rejection = Some((code, reason.to_string()));
        self
    }

    pub fn fail_open(mut self) -> Self {
        self.script.fail_open = true;
        self
    }

    /// Never send the publisher join confirmation.
    pub fn never_confirm_join(mut self) -> Self {
        self.script.confirm_join = false;
        self
    }

    /// Do not answer the publisher offer.
    pub fn without_publisher_answer(mut self) -> Self {
        self.script.answer_publisher = false;
        self
    }

    /// Do not send offers to subscribers.
    pub fn without_subscriber_offer(mut self) -> Self {
        self.script.offer_subscribers = false;
        self
    }

    /// Fail every plugin message named `name` with `Timeout`.
    pub fn time_out_message(mut self, name: &'static str) -> Self {
        self.script.unanswered_message = Some(name);
        self
    }

    pub fn build(self) -> MockGateway {
        MockGateway {
            inner: Arc::new(Mutex::new(GatewayInner {
                script: self.script,
                events: None,
                calls: Vec::new(),
                next_handle: FIRST_HANDLE_ID,
                publisher_handle: None,
                subscriptions: Vec::new(),
                open: false,
            })),
        }
    }
}

/// In-memory `SignalingChannel`.
#[derive(Debug, Clone)]
pub struct MockGateway {
    inner: Arc<Mutex<GatewayInner>>,
}

#[derive(Debug)]
struct GatewayInner {
    script: GatewayScript,
    events: Option<mpsc::UnboundedSender<GatewayEvent>>,
    calls: Vec<GatewayCall>,
    next_handle: u64,
    publisher_handle: Option<HandleId>,
    /// Subscriber joins in request order.
    subscriptions: Vec<(HandleId, FeedId)>,
    open: bool,
}

impl MockGateway {
    pub fn builder() -> MockGatewayBuilder {
        MockGatewayBuilder::default()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Calls made after the first `skip`.
    pub fn calls_since(&self, skip: usize) -> Vec<GatewayCall> {
        self.calls().into_iter().skip(skip).collect()
    }

    pub fn call_count(&self) -> usize {
        self.inner.lock().unwrap().calls.len()
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().unwrap().open
    }

    /// Handle that sent the publisher join.
    pub fn publisher_handle(&self) -> Option<HandleId> {
        self.inner.lock().unwrap().publisher_handle
    }

    /// Most recent subscriber handle for `feed`.
    pub fn subscriber_handle(&self, feed: FeedId) -> Option<HandleId> {
        self.inner
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .rev()
            .find(|(_, f)| *f == feed)
            .map(|(handle, _)| *handle)
    }

    /// Handles detached so far, in order.
    pub fn detached_handles(&self) -> Vec<HandleId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Detach(handle) => Some(handle),
                _ => None,
            })
            .collect()
    }

    /// Push an event for `handle` to the controller.
    pub async fn emit(&self, handle: HandleId, kind: GatewayEventKind) {
        self.send(vec![GatewayEvent::Handle { handle, kind }]).await;
    }

    /// Push a plugin event for `handle`.
    pub async fn emit_room_event(&self, handle: HandleId, event: RoomEvent, jsep: Option<Jsep>) {
        self.emit(handle, GatewayEventKind::Plugin { event, jsep })
            .await;
    }

    /// Announce a newly published feed on the publisher handle.
    pub async fn announce_publisher(&self, feed: FeedId, display: &str) {
        let handle = self.publisher_handle().expect("publisher handle");
        let notification = RoomNotification {
            publishers: vec![Publisher {
                id: feed,
                display: Some(display.to_string()),
            }],
            ..RoomNotification::default()
        };
        self.emit_room_event(handle, RoomEvent::Event(notification), None)
            .await;
    }

    /// Announce that `feed` left the room on the publisher handle.
    pub async fn announce_leaving(&self, feed: FeedId) {
        let handle = self.publisher_handle().expect("publisher handle");
        let notification = RoomNotification {
            leaving: Some(gateway_protocol::FeedRef::Feed(feed)),
            ..RoomNotification::default()
        };
        self.emit_room_event(handle, RoomEvent::Event(notification), None)
            .await;
    }

    /// Simulate loss of the connection.
    pub async fn drop_transport(&self, reason: &str) {
        self.inner.lock().unwrap().open = false;
        self.send(vec![GatewayEvent::TransportClosed {
            reason: reason.to_string(),
        }])
        .await;
    }

    /// Poll until `predicate` holds for the recorded calls.
    pub async fn wait_for_calls(&self, predicate: impl Fn(&[GatewayCall]) -> bool) {
        for _ in 0..400 {
            if predicate(&self.calls()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("gateway calls never matched: {:#?}", self.calls());
    }

    async fn send(&self, events: Vec<GatewayEvent>) {
        let sender = self.inner.lock().unwrap().events.clone();
        let Some(sender) = sender else {
            return;
        };
        for event in events {
            let _ = sender.send(event);
        }
    }

    fn ensure_open(inner: &GatewayInner) -> Result<(), ClientError> {
        if inner.open {
            Ok(())
        } else {
            Err(ClientError::Transport("mock gateway not open".to_string()))
        }
    }
}

/// Reaction to a plugin message.
fn react(
    inner: &mut GatewayInner,
    handle: HandleId,
    body: &RoomRequest,
    jsep: Option<&Jsep>,
) -> Vec<GatewayEvent> {
    let script = inner.script.clone();
    let event = match body {
        RoomRequest::Join(JoinRequest::Publisher { room, .. }) => {
            inner.publisher_handle = Some(handle);
            if let Some((code, reason)) = script.join_rejection.clone() {
                Some((RoomEvent::Event(failure(code, reason)), None))
            } else if script.confirm_join {
                Some((
                    RoomEvent::Joined {
                        room: *room,
                        id: script.self_feed,
                        private_id: script.private_id,
                        publishers: script.publishers.clone(),
                    },
                    None,
                ))
            } else {
                None
            }
        }
        RoomRequest::Join(JoinRequest::Subscriber { room, feed, .. }) => {
            let event = if let Some((code, reason)) = script.subscriber_rejection.clone() {
                Some((RoomEvent::Event(failure(code, reason)), None))
            } else if script.offer_subscribers {
                let display = script
                    .publishers
                    .iter()
                    .find(|p| p.id == *feed)
                    .and_then(|p| p.display.clone());
                Some((
                    RoomEvent::Attached {
                        room: *room,
                        id: *feed,
                        display,
                    },
                    Some(Jsep::offer(format!("v=0 offer for feed {feed}"))),
                ))
            } else {
                None
            };
            inner.subscriptions.push((handle, *feed));
            event
        }
        RoomRequest::Configure { .. } if script.answer_publisher && jsep.is_some() => Some((
            RoomEvent::Event(RoomNotification {
                configured: Some("ok".to_string()),
                ..RoomNotification::default()
            }),
            Some(Jsep::answer("v=0 publisher answer")),
        )),
        RoomRequest::Start { room } => Some((
            RoomEvent::Event(RoomNotification {
                room: Some(*room),
                started: Some("ok".to_string()),
                ..RoomNotification::default()
            }),
            None,
        )),
        _ => None,
    };

    event
        .map(|(event, jsep)| GatewayEvent::Handle {
            handle,
            kind: GatewayEventKind::Plugin { event, jsep },
        })
        .into_iter()
        .collect()
}

fn failure(code: u32, reason: String) -> RoomNotification {
    RoomNotification {
        error_code: Some(code),
        error: Some(reason),
        ..RoomNotification::default()
    }
}

#[async_trait::async_trait]
impl SignalingChannel for MockGateway {
    async fn open(&self, events: mpsc::UnboundedSender<GatewayEvent>) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(GatewayCall::Open);
        if inner.script.fail_open {
            return Err(ClientError::Transport("connection refused".to_string()));
        }
        inner.events = Some(events);
        inner.open = true;
        Ok(())
    }

    async fn attach(&self) -> Result<HandleId, ClientError> {
        let mut inner = self.inner.lock().unwrap();
        Self::ensure_open(&inner)?;
        let handle = HandleId(inner.next_handle);
        inner.next_handle += 1;
        inner.calls.push(GatewayCall::Attach(handle));
        Ok(handle)
    }

    async fn request(&self, handle: HandleId, body: RoomRequest) -> Result<RoomEvent, ClientError> {
        let mut inner = self.inner.lock().unwrap();
        Self::ensure_open(&inner)?;
        inner.calls.push(GatewayCall::Request {
            handle,
            body: body.clone(),
        });

        match body {
            RoomRequest::Create { .. } if inner.script.room_exists => Ok(RoomEvent::Event(
                failure(ERROR_ROOM_EXISTS, "Room already exists".to_string()),
            )),
            RoomRequest::Create { room, .. } => Ok(RoomEvent::Created { room }),
            _ => Ok(RoomEvent::Event(RoomNotification::default())),
        }
    }

    async fn message(
        &self,
        handle: HandleId,
        body: RoomRequest,
        jsep: Option<Jsep>,
    ) -> Result<(), ClientError> {
        let events = {
            let mut inner = self.inner.lock().unwrap();
            Self::ensure_open(&inner)?;
            if inner.script.unanswered_message == Some(body.name()) {
                let error = ClientError::Timeout(format!("{} not answered", body.name()));
                inner.calls.push(GatewayCall::Message { handle, body, jsep });
                return Err(error);
            }
            let events = react(&mut inner, handle, &body, jsep.as_ref());
            inner.calls.push(GatewayCall::Message { handle, body, jsep });
            events
        };
        self.send(events).await;
        Ok(())
    }

    async fn detach(&self, handle: HandleId) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(GatewayCall::Detach(handle));
        Self::ensure_open(&inner)
    }

    async fn close(&self) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(GatewayCall::Close);
        inner.open = false;
        inner.events = None;
        Ok(())
    }
}
