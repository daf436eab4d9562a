//! Mock negotiation primitive.
//!
//! Offers and answers are canned blobs. Creating an offer reports two local
//! tracks; creating an answer reports two remote tracks. Failures can be
//! switched on at any time, and answer creation can be held until the test
//! releases it.

use common::types::HandleId;
use gateway_protocol::Jsep;
use room_client::{
    MediaDirections, MediaTrack, NegotiationContext, NegotiationError, NegotiationFactory,
    SessionRole, TrackKind, TrackReporter,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Permits added by [`MockNegotiator::release_answers`].
const RELEASED_PERMITS: usize = 1024;

/// Mock `NegotiationFactory`.
#[derive(Clone, Default)]
pub struct MockNegotiator {
    fail_offer: Arc<AtomicBool>,
    fail_answer: Arc<AtomicBool>,
    answer_gate: Option<Arc<Semaphore>>,
    contexts: Arc<Mutex<Vec<Arc<MockContext>>>>,
}

impl MockNegotiator {
    /// Create a mock that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock whose offers fail.
    pub fn failing_offer() -> Self {
        let negotiator = Self::new();
        negotiator.set_fail_offer(true);
        negotiator
    }

    /// Create a mock whose answers fail.
    pub fn failing_answer() -> Self {
        let negotiator = Self::new();
        negotiator.set_fail_answer(true);
        negotiator
    }

    /// Create a mock whose answers wait for [`Self::release_answers`].
    pub fn holding_answers() -> Self {
        Self {
            answer_gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn set_fail_offer(&self, fail: bool) {
        self.fail_offer.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_answer(&self, fail: bool) {
        self.fail_answer.store(fail, Ordering::SeqCst);
    }

    /// Let every held and future answer proceed.
    pub fn release_answers(&self) {
        if let Some(gate) = &self.answer_gate {
            gate.add_permits(RELEASED_PERMITS);
        }
    }

    /// Every context created so far.
    pub fn contexts(&self) -> Vec<Arc<MockContext>> {
        self.contexts.lock().unwrap().clone()
    }

    /// Context created for `handle`.
    pub fn context_for(&self, handle: HandleId) -> Option<Arc<MockContext>> {
        self.contexts()
            .into_iter()
            .find(|context| context.handle() == handle)
    }
}

impl NegotiationFactory for MockNegotiator {
    fn create(&self, role: &SessionRole, reporter: TrackReporter) -> Arc<dyn NegotiationContext> {
        let context = Arc::new(MockContext {
            role: *role,
            reporter,
            fail_offer: Arc::clone(&self.fail_offer),
            fail_answer: Arc::clone(&self.fail_answer),
            answer_gate: self.answer_gate.clone(),
            closed: AtomicBool::new(false),
            answers: AtomicUsize::new(0),
            toggles: Mutex::new(Vec::new()),
        });
        self.contexts.lock().unwrap().push(Arc::clone(&context));
        context
    }
}

/// Mock `NegotiationContext` for one handle.
pub struct MockContext {
    role: SessionRole,
    reporter: TrackReporter,
    fail_offer: Arc<AtomicBool>,
    fail_answer: Arc<AtomicBool>,
    answer_gate: Option<Arc<Semaphore>>,
    closed: AtomicBool,
    answers: AtomicUsize,
    toggles: Mutex<Vec<(String, bool)>>,
}

impl MockContext {
    pub fn handle(&self) -> HandleId {
        self.reporter.handle()
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of answers produced.
    pub fn answers(&self) -> usize {
        self.answers.load(Ordering::SeqCst)
    }

    /// `set_track_enabled` calls in order.
    pub fn toggles(&self) -> Vec<(String, bool)> {
        self.toggles.lock().unwrap().clone()
    }

    fn track_id(&self, prefix: &str, kind: TrackKind) -> String {
        format!("{prefix}-{kind}-{}", self.handle())
    }
}

#[async_trait::async_trait]
impl NegotiationContext for MockContext {
    async fn create_offer(&self, directions: MediaDirections) -> Result<Jsep, NegotiationError> {
        if self.is_closed() {
            return Err(NegotiationError::Closed);
        }
        if self.fail_offer.load(Ordering::SeqCst) {
            return Err(NegotiationError::Offer("camera unavailable".to_string()));
        }

        if directions.send_audio {
            self.reporter.track_added(MediaTrack::new(
                self.track_id("local", TrackKind::Audio),
                TrackKind::Audio,
            ));
        }
        if directions.send_video {
            self.reporter.track_added(MediaTrack::new(
                self.track_id("local", TrackKind::Video),
                TrackKind::Video,
            ));
        }

        Ok(Jsep::offer(format!("v=0 local offer {}", self.handle())))
    }

    async fn create_answer(
        &self,
        _offer: Jsep,
        directions: MediaDirections,
    ) -> Result<Jsep, NegotiationError> {
        if let Some(gate) = &self.answer_gate {
            let _permit = gate.acquire().await;
        }
        if self.is_closed() {
            return Err(NegotiationError::Closed);
        }
        if self.fail_answer.load(Ordering::SeqCst) {
            return Err(NegotiationError::Answer("unsupported codec".to_string()));
        }

        if directions.receive_audio {
            self.reporter.track_added(MediaTrack::new(
                self.track_id("remote", TrackKind::Audio),
                TrackKind::Audio,
            ));
        }
        if directions.receive_video {
            self.reporter.track_added(MediaTrack::new(
                self.track_id("remote", TrackKind::Video),
                TrackKind::Video,
            ));
        }

        self.answers.fetch_add(1, Ordering::SeqCst);
        Ok(Jsep::answer(format!("v=0 answer {}", self.handle())))
    }

    async fn apply_answer(&self, _answer: Jsep) -> Result<(), NegotiationError> {
        if self.is_closed() {
            return Err(NegotiationError::Closed);
        }
        Ok(())
    }

    fn set_track_enabled(&self, track_id: &str, enabled: bool) -> Result<(), NegotiationError> {
        if !track_id.starts_with("local-") {
            return Err(NegotiationError::UnknownTrack(track_id.to_string()));
        }
        self.toggles
            .lock()
            .unwrap()
            .push((track_id.to_string(), enabled));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
