//! # Room Client Test Utilities
//!
//! Shared test utilities for the room client.
//!
//! This crate provides mock implementations and test fixtures for driving a
//! `SessionController` without a gateway or a media stack.
//!
//! ## Modules
//!
//! - `mock_gateway` - Scripted in-memory `SignalingChannel`
//! - `mock_negotiator` - `NegotiationFactory` producing canned blobs and tracks
//! - `sink` - `SessionSink` that records every callback
//! - `fixtures` - Settings, controller harness, tracing setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_client_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let gateway = MockGateway::builder()
//!         .self_feed(FeedId(1))
//!         .publisher(FeedId(7), "User-7")
//!         .build();
//!     let harness = TestController::start(gateway);
//!
//!     harness.handle.join().await.unwrap();
//!     harness.handle.select_feed(SlotId(0), Some(FeedId(7))).await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod mock_gateway;
pub mod mock_negotiator;
pub mod sink;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_gateway::*;
pub use mock_negotiator::*;
pub use sink::*;
