//! Slot subscriptions: feed selection, roster-driven teardown and
//! per-slot failure isolation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::{FeedId, SlotId};
use gateway_protocol::{Jsep, JsepKind, RoomEvent, RoomRequest, ERROR_NO_SUCH_FEED};
use room_client::{
    ClientError, ControllerState, GatewayEventKind, PublisherState, SessionRole, SubscriberState,
};
use room_client_test_utils::{
    eventually, wait_for_status, GatewayCall, MockGateway, MockNegotiator, TestController,
    TEST_ROOM,
};
use std::time::Duration;

fn gateway_with_peers() -> MockGateway {
    MockGateway::builder()
        .self_feed(FeedId(1))
        .publisher(FeedId(7), "User-7")
        .publisher(FeedId(8), "User-8")
        .build()
}

async fn joined() -> TestController {
    TestController::joined(gateway_with_peers(), MockNegotiator::new()).await
}

// ============================================================================
// Selection
// ============================================================================

#[tokio::test]
async fn test_select_feed_before_join_is_state_error() {
    let harness = TestController::start(gateway_with_peers());

    let err = harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::State(_)));
    assert!(harness.gateway.calls().is_empty());
    assert!(harness.negotiator.contexts().is_empty());
}

#[tokio::test]
async fn test_select_feed_while_joining_is_state_error() {
    let gateway = MockGateway::builder()
        .self_feed(FeedId(1))
        .publisher(FeedId(7), "User-7")
        .never_confirm_join()
        .build();
    let harness = TestController::start(gateway);

    let joiner = {
        let handle = harness.handle.clone();
        tokio::spawn(async move { handle.join().await })
    };
    wait_for_status(&harness.handle, |s| s.state == ControllerState::Joining).await;
    let before = harness.gateway.call_count();

    let err = harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::State(_)));
    assert!(!harness
        .gateway
        .calls_since(before)
        .iter()
        .any(|c| matches!(c, GatewayCall::Attach(_))));
    assert!(harness
        .negotiator
        .contexts()
        .iter()
        .all(|c| c.role() == SessionRole::Publisher));
    assert_eq!(harness.status().await.slot_feed(SlotId(0)), None);

    harness.handle.leave().await.unwrap();
    assert!(matches!(joiner.await.unwrap(), Err(ClientError::State(_))));
}

#[tokio::test]
async fn test_select_feed_subscribes_and_renders_tracks() {
    let harness = joined().await;

    harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap();
    let status = harness.wait_for_slot(SlotId(0), SubscriberState::Active).await;

    assert_eq!(status.slot_feed(SlotId(0)), Some(FeedId(7)));
    let handle = harness.gateway.subscriber_handle(FeedId(7)).unwrap();

    let calls = harness.gateway.calls();
    let join = calls
        .iter()
        .find_map(|c| match c {
            GatewayCall::Message {
                handle: h,
                body: RoomRequest::Join(join),
                ..
            } if *h == handle => Some(join.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        join,
        gateway_protocol::JoinRequest::Subscriber {
            room: TEST_ROOM,
            feed: FeedId(7),
            private_id: common::types::PrivateId(424_242),
        }
    );

    let start = calls
        .iter()
        .find(|c| matches!(c, GatewayCall::Message { handle: h, .. } if *h == handle) && c.is_message("start"))
        .unwrap();
    let GatewayCall::Message { jsep: Some(answer), .. } = start else {
        panic!("start without answer: {start:?}");
    };
    assert_eq!(answer.kind, JsepKind::Answer);

    let sink = harness.sink.clone();
    eventually("two remote tracks in slot 0", || {
        sink.visible_tracks(SlotId(0)).len() == 2
    })
    .await;
    assert!(harness.sink.visible_tracks(SlotId(1)).is_empty());
}

#[tokio::test]
async fn test_invalid_slot_is_rejected() {
    let harness = joined().await;
    let before = harness.gateway.call_count();

    let err = harness
        .handle
        .select_feed(SlotId(5), Some(FeedId(7)))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ClientError::InvalidSlot {
            slot: SlotId(5),
            slot_count: 2
        }
    );
    assert_eq!(harness.gateway.call_count(), before);
}

#[tokio::test]
async fn test_unknown_feed_is_rejected() {
    let harness = joined().await;
    let before = harness.gateway.call_count();

    let err = harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(99)))
        .await
        .unwrap_err();

    assert_eq!(err, ClientError::FeedNotFound(FeedId(99)));
    assert_eq!(harness.gateway.call_count(), before);
    assert_eq!(harness.status().await.slot_feed(SlotId(0)), None);
}

#[tokio::test]
async fn test_unknown_feed_empties_occupied_slot() {
    let harness = joined().await;
    harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap();
    harness.wait_for_slot(SlotId(0), SubscriberState::Active).await;
    let handle = harness.gateway.subscriber_handle(FeedId(7)).unwrap();

    let err = harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(99)))
        .await
        .unwrap_err();

    assert_eq!(err, ClientError::FeedNotFound(FeedId(99)));
    assert_eq!(harness.status().await.slot_feed(SlotId(0)), None);
    assert!(harness.gateway.detached_handles().contains(&handle));
}

#[tokio::test]
async fn test_switching_feed_detaches_before_attaching() {
    let harness = joined().await;
    harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap();
    harness.wait_for_slot(SlotId(0), SubscriberState::Active).await;
    let old_handle = harness.gateway.subscriber_handle(FeedId(7)).unwrap();
    let before = harness.gateway.call_count();

    harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(8)))
        .await
        .unwrap();

    let calls = harness.gateway.calls_since(before);
    assert_eq!(calls[0], GatewayCall::Detach(old_handle));
    assert!(matches!(calls[1], GatewayCall::Attach(_)));

    let status = harness.wait_for_slot(SlotId(0), SubscriberState::Active).await;
    assert_eq!(status.slot_feed(SlotId(0)), Some(FeedId(8)));
    assert!(harness
        .negotiator
        .context_for(old_handle)
        .unwrap()
        .is_closed());
}

#[tokio::test]
async fn test_select_none_clears_slot() {
    let harness = joined().await;
    harness
        .handle
        .select_feed(SlotId(1), Some(FeedId(8)))
        .await
        .unwrap();
    harness.wait_for_slot(SlotId(1), SubscriberState::Active).await;
    let handle = harness.gateway.subscriber_handle(FeedId(8)).unwrap();
    let sink = harness.sink.clone();
    eventually("tracks shown", || sink.visible_tracks(SlotId(1)).len() == 2).await;

    harness.handle.select_feed(SlotId(1), None).await.unwrap();

    let status = harness.status().await;
    assert_eq!(status.slot_feed(SlotId(1)), None);
    assert!(harness.gateway.detached_handles().contains(&handle));
    assert!(harness.sink.visible_tracks(SlotId(1)).is_empty());
}

#[tokio::test]
async fn test_same_feed_in_two_slots() {
    let harness = joined().await;

    harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap();
    harness
        .handle
        .select_feed(SlotId(1), Some(FeedId(7)))
        .await
        .unwrap();

    let status = wait_for_status(&harness.handle, |s| {
        s.slots.iter().all(|slot| slot.state == SubscriberState::Active)
    })
    .await;
    assert_eq!(status.slot_feed(SlotId(0)), Some(FeedId(7)));
    assert_eq!(status.slot_feed(SlotId(1)), Some(FeedId(7)));
    assert_ne!(status.slots[0].handle, status.slots[1].handle);
}

// ============================================================================
// Roster-driven teardown
// ============================================================================

#[tokio::test]
async fn test_departed_feed_releases_bound_slot() {
    let harness = joined().await;
    harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap();
    harness.wait_for_slot(SlotId(0), SubscriberState::Active).await;
    let handle = harness.gateway.subscriber_handle(FeedId(7)).unwrap();
    let sink = harness.sink.clone();
    eventually("tracks shown", || sink.visible_tracks(SlotId(0)).len() == 2).await;

    harness.gateway.announce_leaving(FeedId(7)).await;

    let status = wait_for_status(&harness.handle, |s| {
        s.slot_feed(SlotId(0)).is_none() && s.participants.len() == 1
    })
    .await;
    assert_eq!(status.state, ControllerState::Joined);
    assert_eq!(status.participants[0].feed_id, FeedId(8));
    assert_eq!(status.slots[0].state, SubscriberState::Idle);
    assert!(harness.gateway.detached_handles().contains(&handle));
    assert!(harness.sink.visible_tracks(SlotId(0)).is_empty());
}

#[tokio::test]
async fn test_departure_of_unbound_feed_only_updates_roster() {
    let harness = joined().await;
    harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap();
    harness.wait_for_slot(SlotId(0), SubscriberState::Active).await;

    harness.gateway.announce_leaving(FeedId(8)).await;

    let status = wait_for_status(&harness.handle, |s| s.participants.len() == 1).await;
    assert_eq!(status.slot_feed(SlotId(0)), Some(FeedId(7)));
    assert_eq!(status.slots[0].state, SubscriberState::Active);
}

#[tokio::test]
async fn test_new_publisher_can_be_selected() {
    let harness = joined().await;

    harness.gateway.announce_publisher(FeedId(9), "User-9").await;
    wait_for_status(&harness.handle, |s| {
        s.participants.iter().any(|p| p.feed_id == FeedId(9))
    })
    .await;

    harness
        .handle
        .select_feed(SlotId(1), Some(FeedId(9)))
        .await
        .unwrap();
    let status = harness.wait_for_slot(SlotId(1), SubscriberState::Active).await;
    assert_eq!(status.slot_feed(SlotId(1)), Some(FeedId(9)));
}

#[tokio::test]
async fn test_own_feed_is_never_listed() {
    let harness = joined().await;

    harness.gateway.announce_publisher(FeedId(1), "me").await;
    harness.gateway.announce_publisher(FeedId(9), "User-9").await;

    let status = wait_for_status(&harness.handle, |s| s.participants.len() == 3).await;
    assert!(status.participants.iter().all(|p| p.feed_id != FeedId(1)));
}

// ============================================================================
// Per-slot failures
// ============================================================================

#[tokio::test]
async fn test_answer_failure_releases_only_that_slot() {
    let harness = joined().await;
    harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap();
    harness.wait_for_slot(SlotId(0), SubscriberState::Active).await;

    harness.negotiator.set_fail_answer(true);
    harness
        .handle
        .select_feed(SlotId(1), Some(FeedId(8)))
        .await
        .unwrap();
    let failed = harness.gateway.subscriber_handle(FeedId(8)).unwrap();
    harness
        .gateway
        .wait_for_calls(|calls| calls.contains(&GatewayCall::Detach(failed)))
        .await;

    let status = harness.status().await;
    assert_eq!(status.state, ControllerState::Joined);
    assert_eq!(status.publisher, PublisherState::Published);
    assert_eq!(status.slot_feed(SlotId(0)), Some(FeedId(7)));
    assert_eq!(status.slots[0].state, SubscriberState::Active);
    assert_eq!(status.slot_feed(SlotId(1)), None);
    assert_eq!(status.diagnostics[0].kind, "negotiation");
    assert_eq!(status.diagnostics[0].handle, Some(failed));
    assert!(!harness
        .gateway
        .calls()
        .iter()
        .any(|c| matches!(c, GatewayCall::Message { handle, .. } if *handle == failed) && c.is_message("start")));
}

#[tokio::test]
async fn test_unanswered_start_releases_only_that_slot() {
    let gateway = MockGateway::builder()
        .self_feed(FeedId(1))
        .publisher(FeedId(7), "User-7")
        .publisher(FeedId(8), "User-8")
        .time_out_message("start")
        .build();
    let harness = TestController::joined(gateway, MockNegotiator::new()).await;

    harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap();
    let failed = harness.gateway.subscriber_handle(FeedId(7)).unwrap();
    harness
        .gateway
        .wait_for_calls(|calls| calls.contains(&GatewayCall::Detach(failed)))
        .await;

    let status = harness.status().await;
    assert_eq!(status.state, ControllerState::Joined);
    assert_eq!(status.publisher, PublisherState::Published);
    assert_eq!(status.slot_feed(SlotId(0)), None);
    assert_eq!(status.diagnostics[0].kind, "timeout");
    assert_eq!(status.diagnostics[0].handle, Some(failed));
    assert!(harness.gateway.is_open());
    assert!(harness.sink.session_errors().is_empty());
}

#[tokio::test]
async fn test_unanswered_subscriber_join_keeps_session() {
    let gateway = MockGateway::builder()
        .self_feed(FeedId(1))
        .publisher(FeedId(7), "User-7")
        .time_out_message("join_subscriber")
        .build();
    let harness = TestController::joined(gateway, MockNegotiator::new()).await;
    let before = harness.gateway.call_count();

    let err = harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Timeout(_)));
    let status = harness.status().await;
    assert_eq!(status.state, ControllerState::Joined);
    assert_eq!(status.slot_feed(SlotId(0)), None);
    assert!(harness.sink.session_errors().is_empty());

    let calls = harness.gateway.calls_since(before);
    let Some(GatewayCall::Attach(handle)) = calls.first() else {
        panic!("expected attach first: {calls:?}");
    };
    assert_eq!(calls.last(), Some(&GatewayCall::Detach(*handle)));
    assert!(harness
        .negotiator
        .context_for(*handle)
        .unwrap()
        .is_closed());
}

#[tokio::test]
async fn test_refused_subscription_releases_slot() {
    let gateway = MockGateway::builder()
        .publisher(FeedId(7), "User-7")
        .reject_subscriptions(ERROR_NO_SUCH_FEED, "No such feed")
        .build();
    let harness = TestController::joined(gateway, MockNegotiator::new()).await;

    harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap();
    let handle = harness.gateway.subscriber_handle(FeedId(7)).unwrap();
    harness
        .gateway
        .wait_for_calls(|calls| calls.contains(&GatewayCall::Detach(handle)))
        .await;

    let status = harness.status().await;
    assert_eq!(status.state, ControllerState::Joined);
    assert_eq!(status.slot_feed(SlotId(0)), None);
    assert_eq!(status.diagnostics[0].kind, "rejected");
}

#[tokio::test]
async fn test_attached_for_other_feed_is_protocol_error() {
    let gateway = MockGateway::builder()
        .publisher(FeedId(7), "User-7")
        .publisher(FeedId(8), "User-8")
        .without_subscriber_offer()
        .build();
    let harness = TestController::joined(gateway, MockNegotiator::new()).await;
    harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap();
    let handle = harness.gateway.subscriber_handle(FeedId(7)).unwrap();

    harness
        .gateway
        .emit_room_event(
            handle,
            RoomEvent::Attached {
                room: TEST_ROOM,
                id: FeedId(8),
                display: None,
            },
            Some(Jsep::offer("v=0")),
        )
        .await;
    harness
        .gateway
        .wait_for_calls(|calls| calls.contains(&GatewayCall::Detach(handle)))
        .await;

    let status = harness.status().await;
    assert_eq!(status.slot_feed(SlotId(0)), None);
    assert_eq!(status.diagnostics[0].kind, "protocol");
    assert_eq!(status.state, ControllerState::Joined);
}

#[tokio::test]
async fn test_hangup_releases_slot() {
    let harness = joined().await;
    harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap();
    harness.wait_for_slot(SlotId(0), SubscriberState::Active).await;
    let handle = harness.gateway.subscriber_handle(FeedId(7)).unwrap();

    harness
        .gateway
        .emit(
            handle,
            GatewayEventKind::Hangup {
                reason: "ICE failed".to_string(),
            },
        )
        .await;

    let status = wait_for_status(&harness.handle, |s| s.slot_feed(SlotId(0)).is_none()).await;
    assert_eq!(status.state, ControllerState::Joined);
}

// ============================================================================
// Stale results
// ============================================================================

#[tokio::test]
async fn test_answer_completing_after_detach_is_discarded() {
    let harness = TestController::joined(gateway_with_peers(), MockNegotiator::holding_answers()).await;
    harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap();
    harness
        .wait_for_slot(SlotId(0), SubscriberState::Negotiating)
        .await;
    let handle = harness.gateway.subscriber_handle(FeedId(7)).unwrap();

    harness.handle.select_feed(SlotId(0), None).await.unwrap();
    harness.negotiator.release_answers();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = harness.status().await;
    assert_eq!(status.slot_feed(SlotId(0)), None);
    assert!(!harness.gateway.calls().iter().any(|c| c.is_message("start")));
    assert!(harness.sink.remote_tracks(SlotId(0)).is_empty());
    assert!(harness.negotiator.context_for(handle).unwrap().is_closed());
}

#[tokio::test]
async fn test_events_for_detached_handle_are_ignored() {
    let harness = joined().await;
    harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap();
    harness.wait_for_slot(SlotId(0), SubscriberState::Active).await;
    let old_handle = harness.gateway.subscriber_handle(FeedId(7)).unwrap();
    harness.handle.select_feed(SlotId(0), None).await.unwrap();
    let before = harness.gateway.call_count();

    harness
        .gateway
        .emit_room_event(
            old_handle,
            RoomEvent::Attached {
                room: TEST_ROOM,
                id: FeedId(7),
                display: None,
            },
            Some(Jsep::offer("v=0 late")),
        )
        .await;
    let status = harness.status().await;

    assert_eq!(status.state, ControllerState::Joined);
    assert_eq!(status.slot_feed(SlotId(0)), None);
    assert!(status.diagnostics.is_empty());
    assert_eq!(harness.gateway.call_count(), before);
}
