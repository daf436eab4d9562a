//! Join, leave and teardown behavior of the session controller.
//!
//! Drives a real `SessionController` against the scripted gateway and
//! negotiator from `room-client-test-utils`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::{FeedId, HandleId, SlotId};
use gateway_protocol::{JoinRequest, Jsep, JsepKind, RoomEvent, RoomRequest};
use room_client::{
    ClientError, ControllerState, GatewayEventKind, Participant, PublisherState, SubscriberState,
    TrackKind,
};
use room_client_test_utils::{
    eventually, test_settings, wait_for_status, GatewayCall, MockGateway, MockNegotiator,
    TestController, TEST_ROOM,
};
use std::time::Duration;

const PUBLISHER_HANDLE: HandleId = HandleId(1000);

fn two_peer_gateway() -> MockGateway {
    MockGateway::builder()
        .self_feed(FeedId(1))
        .publisher(FeedId(7), "User-7")
        .publisher(FeedId(8), "User-8")
        .build()
}

// ============================================================================
// Join
// ============================================================================

#[tokio::test]
async fn test_join_publishes_and_populates_roster() {
    let gateway = MockGateway::builder()
        .self_feed(FeedId(1))
        .publisher(FeedId(7), "User-7")
        .build();
    let harness = TestController::start(gateway);

    harness.handle.join().await.unwrap();

    let status = harness.status().await;
    assert_eq!(status.state, ControllerState::Joined);
    assert_eq!(status.self_feed_id, Some(FeedId(1)));
    assert_eq!(status.publisher, PublisherState::Published);
    assert_eq!(
        status.participants,
        vec![Participant {
            feed_id: FeedId(7),
            display_name: Some("User-7".to_string()),
        }]
    );
    assert_eq!(harness.handle.state(), ControllerState::Joined);
}

#[tokio::test]
async fn test_join_request_sequence() {
    let harness = TestController::start(two_peer_gateway());
    harness.handle.join().await.unwrap();

    let calls = harness.gateway.calls();
    assert_eq!(calls.len(), 5, "unexpected calls: {calls:#?}");
    assert_eq!(calls[0], GatewayCall::Open);
    assert_eq!(calls[1], GatewayCall::Attach(PUBLISHER_HANDLE));
    assert_eq!(
        calls[2],
        GatewayCall::Request {
            handle: PUBLISHER_HANDLE,
            body: RoomRequest::Create {
                room: TEST_ROOM,
                description: format!("room-{TEST_ROOM}"),
                bitrate: None,
            },
        }
    );

    let GatewayCall::Message {
        handle,
        body: RoomRequest::Join(JoinRequest::Publisher { room, display }),
        jsep: None,
    } = &calls[3]
    else {
        panic!("expected publisher join, got {:?}", calls[3]);
    };
    assert_eq!(*handle, PUBLISHER_HANDLE);
    assert_eq!(*room, TEST_ROOM);
    let suffix: u32 = display.strip_prefix("User-").unwrap().parse().unwrap();
    assert!(suffix < 1000);

    let GatewayCall::Message {
        body: RoomRequest::Configure { audio, video },
        jsep: Some(offer),
        ..
    } = &calls[4]
    else {
        panic!("expected configure, got {:?}", calls[4]);
    };
    assert!(*audio && *video);
    assert_eq!(offer.kind, JsepKind::Offer);
}

#[tokio::test]
async fn test_join_reports_local_tracks() {
    let harness = TestController::start(two_peer_gateway());
    harness.handle.join().await.unwrap();

    let sink = harness.sink.clone();
    eventually("two local tracks", || sink.local_tracks().len() == 2).await;

    let kinds: Vec<TrackKind> = harness.sink.local_tracks().iter().map(|t| t.kind).collect();
    assert!(kinds.contains(&TrackKind::Audio));
    assert!(kinds.contains(&TrackKind::Video));
}

#[tokio::test]
async fn test_join_succeeds_when_room_already_exists() {
    let gateway = MockGateway::builder().room_exists().build();
    let harness = TestController::start(gateway);

    harness.handle.join().await.unwrap();

    assert_eq!(harness.status().await.state, ControllerState::Joined);
}

#[tokio::test]
async fn test_second_join_is_rejected() {
    let harness = TestController::start(two_peer_gateway());
    harness.handle.join().await.unwrap();

    let err = harness.handle.join().await.unwrap_err();

    assert!(matches!(err, ClientError::State(_)));
    assert_eq!(harness.status().await.state, ControllerState::Joined);
}

// ============================================================================
// Join failures
// ============================================================================

#[tokio::test]
async fn test_join_refused_by_gateway_tears_down() {
    let gateway = MockGateway::builder()
        .reject_join(426, "No such room")
        .build();
    let harness = TestController::start(gateway);

    let err = harness.handle.join().await.unwrap_err();

    assert_eq!(
        err,
        ClientError::Rejected {
            code: 426,
            reason: "No such room".to_string()
        }
    );
    let status = harness.status().await;
    assert_eq!(status.state, ControllerState::Disconnected);
    assert_eq!(status.self_feed_id, None);

    let calls = harness.gateway.calls();
    let tail = &calls[calls.len() - 2..];
    assert_eq!(
        tail,
        &[GatewayCall::Detach(PUBLISHER_HANDLE), GatewayCall::Close]
    );
    // Never published, so no leave
    assert!(!calls.iter().any(|c| c.is_message("leave")));
}

#[tokio::test]
async fn test_join_fails_when_channel_cannot_open() {
    let gateway = MockGateway::builder().fail_open().build();
    let harness = TestController::start(gateway);

    let err = harness.handle.join().await.unwrap_err();

    assert!(matches!(err, ClientError::Transport(_)));
    assert_eq!(harness.gateway.calls(), vec![GatewayCall::Open]);
    assert_eq!(harness.status().await.state, ControllerState::Disconnected);
}

#[tokio::test]
async fn test_offer_failure_fails_join() {
    let harness = TestController::start_with(
        two_peer_gateway(),
        MockNegotiator::failing_offer(),
        test_settings(),
    );

    let err = harness.handle.join().await.unwrap_err();

    assert!(matches!(err, ClientError::Negotiation(_)));
    let calls = harness.gateway.calls();
    assert!(!calls.iter().any(|c| c.is_message("configure")));
    assert_eq!(calls.last(), Some(&GatewayCall::Close));

    let contexts = harness.negotiator.contexts();
    assert_eq!(contexts.len(), 1);
    assert!(contexts[0].is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_join_times_out_without_confirmation() {
    let gateway = MockGateway::builder().never_confirm_join().build();
    let harness = TestController::start(gateway);

    let err = harness.handle.join().await.unwrap_err();

    assert!(matches!(err, ClientError::Timeout(_)));
    assert_eq!(harness.status().await.state, ControllerState::Disconnected);
    let calls = harness.gateway.calls();
    assert_eq!(calls.last(), Some(&GatewayCall::Close));
    assert!(calls.contains(&GatewayCall::Detach(PUBLISHER_HANDLE)));
}

#[tokio::test]
async fn test_unrepresentable_join_timeout_waits_without_deadline() {
    let gateway = MockGateway::builder().never_confirm_join().build();
    let settings = room_client::RoomSettings {
        join_timeout: Duration::MAX,
        ..test_settings()
    };
    let harness = TestController::start_with(gateway, MockNegotiator::new(), settings);

    let joiner = {
        let handle = harness.handle.clone();
        tokio::spawn(async move { handle.join().await })
    };
    wait_for_status(&harness.handle, |s| s.state == ControllerState::Joining).await;
    assert!(!harness.task.is_finished());

    harness.handle.leave().await.unwrap();

    assert!(matches!(joiner.await.unwrap(), Err(ClientError::State(_))));
    assert_eq!(harness.status().await.state, ControllerState::Disconnected);
}

#[tokio::test]
async fn test_join_can_be_retried_after_failure() {
    let gateway = MockGateway::builder().publisher(FeedId(7), "User-7").build();
    let harness = TestController::start_with(
        gateway,
        MockNegotiator::failing_offer(),
        test_settings(),
    );

    harness.handle.join().await.unwrap_err();
    harness.negotiator.set_fail_offer(false);
    harness.handle.join().await.unwrap();

    let status = harness.status().await;
    assert_eq!(status.state, ControllerState::Joined);
    assert_eq!(status.participants.len(), 1);
}

// ============================================================================
// Leave and teardown
// ============================================================================

#[tokio::test]
async fn test_leave_when_disconnected_is_noop() {
    let harness = TestController::start(two_peer_gateway());

    harness.handle.leave().await.unwrap();

    assert!(harness.gateway.calls().is_empty());
    assert_eq!(harness.status().await.state, ControllerState::Disconnected);
}

#[tokio::test]
async fn test_leave_detaches_slots_then_publisher_then_closes() {
    let harness = TestController::joined(two_peer_gateway(), MockNegotiator::new()).await;

    harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap();
    harness
        .handle
        .select_feed(SlotId(1), Some(FeedId(8)))
        .await
        .unwrap();
    harness.wait_for_slot(SlotId(0), SubscriberState::Active).await;
    harness.wait_for_slot(SlotId(1), SubscriberState::Active).await;

    let slot_a = harness.gateway.subscriber_handle(FeedId(7)).unwrap();
    let slot_b = harness.gateway.subscriber_handle(FeedId(8)).unwrap();
    let before = harness.gateway.call_count();

    harness.handle.leave().await.unwrap();

    assert_eq!(
        harness.gateway.calls_since(before),
        vec![
            GatewayCall::Detach(slot_a),
            GatewayCall::Detach(slot_b),
            GatewayCall::Message {
                handle: PUBLISHER_HANDLE,
                body: RoomRequest::Leave,
                jsep: None,
            },
            GatewayCall::Detach(PUBLISHER_HANDLE),
            GatewayCall::Close,
        ]
    );

    let status = harness.status().await;
    assert_eq!(status.state, ControllerState::Disconnected);
    assert_eq!(status.self_feed_id, None);
    assert!(status.participants.is_empty());
    assert!(status.slots.iter().all(|s| s.feed.is_none()));
    assert!(harness.negotiator.contexts().iter().all(|c| c.is_closed()));
}

#[tokio::test]
async fn test_leave_during_join_resolves_pending_join() {
    let gateway = MockGateway::builder().never_confirm_join().build();
    let harness = TestController::start(gateway);

    let joiner = {
        let handle = harness.handle.clone();
        tokio::spawn(async move { handle.join().await })
    };
    wait_for_status(&harness.handle, |s| s.state == ControllerState::Joining).await;

    harness.handle.leave().await.unwrap();

    let result = joiner.await.unwrap();
    assert!(matches!(result, Err(ClientError::State(_))));
    assert_eq!(harness.status().await.state, ControllerState::Disconnected);
}

#[tokio::test]
async fn test_rejoin_after_leave() {
    let harness = TestController::joined(two_peer_gateway(), MockNegotiator::new()).await;

    harness.handle.leave().await.unwrap();
    harness.handle.join().await.unwrap();

    let status = harness.status().await;
    assert_eq!(status.state, ControllerState::Joined);
    assert_eq!(status.participants.len(), 2);
}

#[tokio::test]
async fn test_transport_loss_ends_session_and_notifies_sink() {
    let harness = TestController::joined(two_peer_gateway(), MockNegotiator::new()).await;
    harness
        .handle
        .select_feed(SlotId(0), Some(FeedId(7)))
        .await
        .unwrap();
    harness.wait_for_slot(SlotId(0), SubscriberState::Active).await;
    let sink = harness.sink.clone();
    eventually("remote tracks shown", || sink.visible_tracks(SlotId(0)).len() == 2).await;

    harness.gateway.drop_transport("socket reset").await;

    wait_for_status(&harness.handle, |s| s.state == ControllerState::Disconnected).await;
    assert_eq!(
        harness.sink.session_errors(),
        vec![ClientError::Transport("socket reset".to_string())]
    );
    assert!(harness.sink.visible_tracks(SlotId(0)).is_empty());
}

#[tokio::test]
async fn test_transport_loss_while_disconnected_is_ignored() {
    let harness = TestController::start(two_peer_gateway());
    harness.handle.join().await.unwrap();
    harness.handle.leave().await.unwrap();

    harness.gateway.drop_transport("late close").await;
    let status = harness.status().await;

    assert_eq!(status.state, ControllerState::Disconnected);
    assert!(harness.sink.session_errors().is_empty());
}

#[tokio::test]
async fn test_room_destroyed_ends_session() {
    let harness = TestController::joined(two_peer_gateway(), MockNegotiator::new()).await;

    harness
        .gateway
        .emit_room_event(
            PUBLISHER_HANDLE,
            RoomEvent::Destroyed { room: TEST_ROOM },
            None,
        )
        .await;

    wait_for_status(&harness.handle, |s| s.state == ControllerState::Disconnected).await;
    assert_eq!(harness.sink.session_errors().len(), 1);
}

#[tokio::test]
async fn test_cancel_tears_down_and_stops_actor() {
    let harness = TestController::joined(two_peer_gateway(), MockNegotiator::new()).await;

    harness.handle.cancel();
    harness.task.await.unwrap();

    assert_eq!(harness.gateway.calls().last(), Some(&GatewayCall::Close));
    assert!(harness.handle.is_cancelled());
    assert!(matches!(
        harness.handle.status().await,
        Err(ClientError::Internal(_))
    ));
}

// ============================================================================
// Publisher anomalies and local tracks
// ============================================================================

#[tokio::test]
async fn test_unexpected_offer_on_publisher_is_recorded_not_fatal() {
    let harness = TestController::joined(two_peer_gateway(), MockNegotiator::new()).await;

    harness
        .gateway
        .emit(
            PUBLISHER_HANDLE,
            GatewayEventKind::Plugin {
                event: RoomEvent::Other,
                jsep: Some(Jsep::offer("v=0 unexpected")),
            },
        )
        .await;

    let status = wait_for_status(&harness.handle, |s| !s.diagnostics.is_empty()).await;
    assert_eq!(status.state, ControllerState::Joined);
    assert_eq!(status.diagnostics[0].kind, "protocol");
    assert_eq!(status.diagnostics[0].handle, Some(PUBLISHER_HANDLE));
}

#[tokio::test]
async fn test_toggle_local_track_flips_enabled_flag() {
    let harness = TestController::joined(two_peer_gateway(), MockNegotiator::new()).await;
    let sink = harness.sink.clone();
    eventually("local tracks recorded", || sink.local_tracks().len() == 2).await;

    let first = harness
        .handle
        .toggle_local_track(TrackKind::Audio)
        .await
        .unwrap();
    let second = harness
        .handle
        .toggle_local_track(TrackKind::Audio)
        .await
        .unwrap();

    assert_eq!(first, Some(false));
    assert_eq!(second, Some(true));
    let context = harness.negotiator.context_for(PUBLISHER_HANDLE).unwrap();
    assert_eq!(
        context.toggles(),
        vec![
            ("local-audio-1000".to_string(), false),
            ("local-audio-1000".to_string(), true),
        ]
    );
}

#[tokio::test]
async fn test_toggle_before_join_is_state_error() {
    let harness = TestController::start(two_peer_gateway());

    let err = harness
        .handle
        .toggle_local_track(TrackKind::Video)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::State(_)));
}
