//! Per-handle session state machines.
//!
//! - [`publisher`] - the single local publisher
//! - [`subscriber`] - one remote-feed subscription per slot
//!
//! Sessions are owned by the controller actor and never run on their own
//! task. Negotiation work is spawned with the handle's cancellation token
//! and reports back as a [`NegotiationOutcome`].

pub mod publisher;
pub mod subscriber;

pub use publisher::{PublisherSession, PublisherState};
pub use subscriber::{SubscriberSession, SubscriberState};

use crate::negotiation::NegotiationError;
use common::types::HandleId;
use gateway_protocol::Jsep;
use std::future::Future;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Result of a spawned negotiation step.
#[derive(Debug)]
pub enum NegotiationOutcome {
    /// Publisher offer ready (or failed).
    Offer {
        handle: HandleId,
        result: Result<Jsep, NegotiationError>,
    },
    /// Subscriber answer ready (or failed).
    Answer {
        handle: HandleId,
        result: Result<Jsep, NegotiationError>,
    },
    /// Remote answer applied to the publisher context.
    AnswerApplied {
        handle: HandleId,
        result: Result<(), NegotiationError>,
    },
}

impl NegotiationOutcome {
    #[must_use]
    pub fn handle(&self) -> HandleId {
        match self {
            NegotiationOutcome::Offer { handle, .. }
            | NegotiationOutcome::Answer { handle, .. }
            | NegotiationOutcome::AnswerApplied { handle, .. } => *handle,
        }
    }

    #[must_use]
    pub const fn step(&self) -> &'static str {
        match self {
            NegotiationOutcome::Offer { .. } => "offer",
            NegotiationOutcome::Answer { .. } => "answer",
            NegotiationOutcome::AnswerApplied { .. } => "apply_answer",
        }
    }
}

/// Spawn a negotiation step bound to a handle's token.
///
/// Nothing is reported if the token is cancelled first.
pub(crate) fn spawn_negotiation<F>(
    token: CancellationToken,
    results: mpsc::UnboundedSender<NegotiationOutcome>,
    step: F,
) where
    F: Future<Output = NegotiationOutcome> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            outcome = step => {
                let _ = results.send(outcome);
            }
        }
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawned_step_reports_outcome() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        spawn_negotiation(token, tx, async {
            NegotiationOutcome::Offer {
                handle: HandleId(3),
                result: Ok(Jsep::offer("v=0")),
            }
        });

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.handle(), HandleId(3));
        assert_eq!(outcome.step(), "offer");
    }

    #[tokio::test]
    async fn test_cancelled_step_reports_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        spawn_negotiation(token.clone(), tx, async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            NegotiationOutcome::Answer {
                handle: HandleId(4),
                result: Ok(Jsep::answer("v=0")),
            }
        });

        token.cancel();
        // Sender is dropped with the task, so the channel closes empty
        assert!(rx.recv().await.is_none());
    }
}
