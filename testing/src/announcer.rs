//! Announcer test doubles.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use turnout_core::{AnnounceError, Announcer, BoxFuture, ChangeEnvelope};

/// A message captured by [`RecordingAnnouncer`].
#[derive(Clone, Debug)]
pub struct RecordedMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// Partition key (the originating event id).
    pub key: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl RecordedMessage {
    /// Decode the payload as a change envelope.
    ///
    /// # Panics
    ///
    /// Panics if the payload is not a valid envelope.
    #[must_use]
    pub fn envelope(&self) -> ChangeEnvelope {
        serde_json::from_slice(&self.payload).unwrap()
    }
}

/// Announcer that records every publish instead of talking to a broker.
///
/// Flip [`fail_next`](Self::fail_next) to make the following publishes
/// fail, for exercising the outbox relay's retry path.
#[derive(Clone, Debug, Default)]
pub struct RecordingAnnouncer {
    messages: Arc<Mutex<Vec<RecordedMessage>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingAnnouncer {
    /// Create an empty recording announcer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages published so far, in publish order.
    #[must_use]
    pub fn messages(&self) -> Vec<RecordedMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Kinds of all published envelopes, in publish order.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        self.messages()
            .iter()
            .map(|m| m.envelope().kind().to_string())
            .collect()
    }

    /// Make subsequent publishes fail (until switched back).
    pub fn fail_next(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Drop all recorded messages.
    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

impl Announcer for RecordingAnnouncer {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> BoxFuture<'_, Result<(), AnnounceError>> {
        let message = RecordedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
        };
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AnnounceError::PublishFailed {
                    topic: message.topic,
                    reason: "injected failure".to_string(),
                });
            }
            self.messages.lock().unwrap().push(message);
            Ok(())
        })
    }
}
