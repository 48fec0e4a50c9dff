//! The ingestion loop: poll, decode, persist, acknowledge.
use std::time::Duration;

use rdkafka::{
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::{KafkaError, RDKafkaErrorCode},
    ClientConfig, Message,
};
use thiserror::Error;
use tokio::{
    sync::watch,
    time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};

use crate::event::{ClickEvent, MalformedEventError};
use crate::settings::Settings;
use crate::store::{ClickStore, StorageError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to create consumer: {0}")]
    Consumer(#[source] KafkaError),
    #[error("failed to subscribe to topic {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: KafkaError,
    },
    #[error("fatal broker error: {0}")]
    BrokerFatal(#[source] KafkaError),
}

/// Consumes click events from one topic and writes each to the store.
///
/// An event's offset is committed only after both of its rows are durable,
/// so a crash mid-message causes redelivery rather than loss. Redelivery
/// duplicates the raw row and bumps the aggregate again --- `total_clicks`
/// counts ingestion attempts, not distinct events.
pub struct Ingester<S> {
    consumer: StreamConsumer,
    store: S,
    poll_timeout: Duration,
    max_attempts: u32,
    base_backoff: Duration,
}

impl<S: ClickStore> Ingester<S> {
    pub fn new(settings: &Settings, store: S) -> Result<Ingester<S>, IngestError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &settings.kafka_bootstrap_servers)
            .set("group.id", &settings.kafka_consumer_group)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .create()
            .map_err(IngestError::Consumer)?;
        consumer
            .subscribe(&[settings.kafka_topic_click_events.as_str()])
            .map_err(|source| IngestError::Subscribe {
                topic: settings.kafka_topic_click_events.clone(),
                source,
            })?;
        Ok(Ingester {
            consumer,
            store,
            poll_timeout: Duration::from_secs(settings.poll_timeout_seconds),
            max_attempts: settings.storage_max_attempts,
            base_backoff: Duration::from_millis(settings.storage_backoff_ms),
        })
    }

    /// Runs until a fatal broker error or until `shutdown` fires. Shutdown
    /// is observed only between messages, never between the append and the
    /// aggregate update of a message in flight.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), IngestError> {
        info!("consuming click events");
        loop {
            let polled = tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown requested, releasing subscription");
                    self.consumer.unsubscribe();
                    return Ok(());
                }
                polled = timeout(self.poll_timeout, self.consumer.recv()) => polled,
            };

            let msg = match polled {
                // idle topic, not a failure
                Err(_) => continue,
                Ok(Err(KafkaError::PartitionEOF(partition))) => {
                    debug!(partition, "reached end of partition");
                    continue;
                }
                Ok(Err(e)) if is_fatal(&e) => {
                    error!(error = %e, "fatal broker error, stopping");
                    return Err(IngestError::BrokerFatal(e));
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "error receiving message");
                    continue;
                }
                Ok(Ok(msg)) => msg,
            };

            match decode_payload(msg.payload()) {
                Err(e) => {
                    // a malformed payload can never become valid by retrying
                    warn!(error = %e, offset = msg.offset(), "skipping undecodable message");
                }
                Ok(event) => {
                    match store_with_retry(&self.store, &event, self.max_attempts, self.base_backoff)
                        .await
                    {
                        Ok(record_id) => {
                            debug!(short_code = %event.short_code, record_id, "stored click")
                        }
                        Err(e) => error!(
                            error = %e,
                            short_code = %event.short_code,
                            attempts = self.max_attempts,
                            "dead-lettering event, storage kept failing"
                        ),
                    }
                }
            }

            // offset moves only after the writes above have settled
            if let Err(e) = self.consumer.commit_message(&msg, CommitMode::Sync) {
                warn!(error = %e, "failed to commit offsets");
            }
        }
    }
}

fn decode_payload(payload: Option<&[u8]>) -> Result<ClickEvent, MalformedEventError> {
    match payload {
        None => Err(MalformedEventError::Empty),
        Some(bytes) => ClickEvent::decode(bytes),
    }
}

/// Auth and no-broker conditions terminate the loop; everything else is
/// left to the client's own recovery.
fn is_fatal(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::Authentication
                | RDKafkaErrorCode::TopicAuthorizationFailed
                | RDKafkaErrorCode::GroupAuthorizationFailed
        )
    )
}

/// Appends the raw event, then bumps the aggregate. Keeps trying with
/// doubling backoff until the writes succeed or `max_attempts` is spent.
/// A retry after a failed aggregate update re-appends the raw row, the
/// same duplicate broker redelivery would produce.
async fn store_with_retry<S: ClickStore>(
    store: &S,
    event: &ClickEvent,
    max_attempts: u32,
    base_backoff: Duration,
) -> Result<i64, StorageError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match store_once(store, event).await {
            Ok(record_id) => return Ok(record_id),
            Err(e) if attempt < max_attempts => {
                let backoff = base_backoff * 2_u32.saturating_pow(attempt - 1);
                warn!(error = %e, attempt, "storing click failed, retrying in {:?}", backoff);
                sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn store_once<S: ClickStore>(store: &S, event: &ClickEvent) -> Result<i64, StorageError> {
    let record_id = store.append_event(event).await?;
    store
        .upsert_aggregate(&event.short_code, event.occurred_at)
        .await?;
    Ok(record_id)
}
