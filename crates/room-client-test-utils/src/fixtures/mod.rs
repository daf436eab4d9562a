//! Pre-configured fixtures for controller testing.
//!
//! Provides:
//! - Room settings with short timeouts
//! - A controller harness wired to the mocks
//! - Status polling for asynchronous outcomes
//! - Tracing setup honouring `RUST_LOG`

use crate::mock_gateway::MockGateway;
use crate::mock_negotiator::MockNegotiator;
use crate::sink::RecordingSink;
use common::types::{RoomId, SlotId};
use room_client::{
    ControllerStatus, RoomSettings, SessionController, SessionControllerHandle, SubscriberState,
};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Room used by every fixture.
pub const TEST_ROOM: RoomId = RoomId(12345);

/// Poll interval of [`wait_for_status`].
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Polls before [`wait_for_status`] gives up.
const MAX_POLLS: usize = 400;

static TRACING: Once = Once::new();

/// Install a test subscriber once per process. Filter with `RUST_LOG`.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Two slots, default display prefix, five-second join timeout.
pub fn test_settings() -> RoomSettings {
    RoomSettings {
        join_timeout: Duration::from_secs(5),
        ..RoomSettings::for_room(TEST_ROOM)
    }
}

/// A running controller wired to mocks.
pub struct TestController {
    pub handle: SessionControllerHandle,
    pub task: JoinHandle<()>,
    pub gateway: MockGateway,
    pub negotiator: MockNegotiator,
    pub sink: RecordingSink,
}

impl TestController {
    /// Start with a succeeding negotiator and [`test_settings`].
    pub fn start(gateway: MockGateway) -> Self {
        Self::start_with(gateway, MockNegotiator::new(), test_settings())
    }

    pub fn start_with(
        gateway: MockGateway,
        negotiator: MockNegotiator,
        settings: RoomSettings,
    ) -> Self {
        init_test_tracing();
        let sink = RecordingSink::new();
        let (handle, task) = SessionController::spawn(
            settings,
            Arc::new(gateway.clone()),
            Arc::new(negotiator.clone()),
            Arc::new(sink.clone()),
        );

        Self {
            handle,
            task,
            gateway,
            negotiator,
            sink,
        }
    }

    /// Start and complete a join.
    pub async fn joined(gateway: MockGateway, negotiator: MockNegotiator) -> Self {
        let harness = Self::start_with(gateway, negotiator, test_settings());
        harness.handle.join().await.expect("join should succeed");
        harness
    }

    pub async fn status(&self) -> ControllerStatus {
        self.handle.status().await.expect("status")
    }

    /// Wait until `slot` reaches `state`.
    pub async fn wait_for_slot(&self, slot: SlotId, state: SubscriberState) -> ControllerStatus {
        wait_for_status(&self.handle, |status| {
            status
                .slots
                .iter()
                .any(|s| s.slot == slot && s.state == state)
        })
        .await
    }
}

/// Poll `status()` until `predicate` holds.
///
/// Panics with the last status if it never does.
pub async fn wait_for_status(
    handle: &SessionControllerHandle,
    predicate: impl Fn(&ControllerStatus) -> bool,
) -> ControllerStatus {
    let mut last = None;
    for _ in 0..MAX_POLLS {
        let status = handle.status().await.expect("status");
        if predicate(&status) {
            return status;
        }
        last = Some(status);
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    panic!("status never matched: {last:#?}");
}

/// Poll `check` until it holds. Panics if it never does.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..MAX_POLLS {
        if check() {
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    panic!("condition never held: {what}");
}
