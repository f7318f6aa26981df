//! Redpanda change announcer.
//!
//! Publishes committed change envelopes to a Kafka-compatible topic.
//! Only the outbox relay calls this: envelopes reach the broker strictly
//! after the transaction that produced them committed.
//!
//! # Delivery semantics
//!
//! At-least-once. A crash between a broker acknowledgment and the
//! outbox row being marked published causes a redelivery; consumers
//! deduplicate on the envelope's `message_id`.
//!
//! # Partitioning
//!
//! Records are keyed by the originating event id, so all changes for
//! one event land on one partition and keep their commit order. No
//! cross-event ordering is guaranteed.
//!
//! # Example
//!
//! ```no_run
//! use turnout_redpanda::RedpandaAnnouncer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let announcer = RedpandaAnnouncer::builder()
//!     .brokers("localhost:9092")
//!     .producer_acks("all")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use turnout_core::{AnnounceError, Announcer, BoxFuture};

/// Redpanda-backed [`Announcer`].
pub struct RedpandaAnnouncer {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
}

impl std::fmt::Debug for RedpandaAnnouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // FutureProducer does not implement Debug, so it is skipped.
        f.debug_struct("RedpandaAnnouncer")
            .field("brokers", &self.brokers)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedpandaAnnouncer {
    /// Create an announcer with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AnnounceError::ConnectionFailed`] if the producer
    /// cannot be created.
    pub fn new(brokers: &str) -> Result<Self, AnnounceError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder for custom configuration.
    #[must_use]
    pub fn builder() -> RedpandaAnnouncerBuilder {
        RedpandaAnnouncerBuilder::default()
    }

    /// Broker addresses this announcer was built with.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for a [`RedpandaAnnouncer`].
#[derive(Default)]
pub struct RedpandaAnnouncerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaAnnouncerBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all" — the outbox relay marks a row published on the
    /// strength of this acknowledgment, so it should mean something.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the announcer.
    ///
    /// # Errors
    ///
    /// Returns [`AnnounceError::ConnectionFailed`] if brokers are not
    /// set or the producer cannot be created.
    pub fn build(self) -> Result<RedpandaAnnouncer, AnnounceError> {
        let brokers = self
            .brokers
            .ok_or_else(|| AnnounceError::ConnectionFailed("brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("all"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            AnnounceError::ConnectionFailed(format!("failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("all"),
            compression = self.compression.as_deref().unwrap_or("none"),
            "RedpandaAnnouncer created"
        );

        Ok(RedpandaAnnouncer {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
        })
    }
}

impl Announcer for RedpandaAnnouncer {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> BoxFuture<'_, Result<(), AnnounceError>> {
        let topic = topic.to_string();
        let key = key.to_string();
        let payload = payload.to_vec();
        let timeout = self.timeout;

        Box::pin(async move {
            let record = FutureRecord::to(&topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        key = %key,
                        partition = partition,
                        offset = offset,
                        "change published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        key = %key,
                        error = %kafka_error,
                        "failed to publish change"
                    );
                    Err(AnnounceError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }
}
