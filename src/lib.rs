//! ## streampulse
//! Real-time ingestion of link-click events from Kafka into PostgreSQL.
//!
//! The ingestion loop consumes JSON click events from a topic, appends every
//! event to a raw log table and maintains a per-short-code aggregate
//! (total clicks, last seen timestamp). A synthetic event generator and a
//! read-only stats API ship as companion binaries.
//!
//! ## Configuration
//! Settings come from environment variables (a `.env` file is honored),
//! optionally layered over a TOML file passed via `--config`:
//! ```text
//! KAFKA_BOOTSTRAP_SERVERS=localhost:9092
//! KAFKA_TOPIC_CLICK_EVENTS=click-events
//! KAFKA_CONSUMER_GROUP=streampulse-consumer
//! POSTGRES_HOST=localhost
//! POSTGRES_PORT=5432
//! POSTGRES_DB=streampulse
//! POSTGRES_USER=streampulse
//! POSTGRES_PASSWORD=streampulse
//! ```
//! See [Settings] for the full surface and defaults.
//!
//! ## Kafka and PostgreSQL
//! Streampulse uses Kafka consumer groups and performs safe offset
//! management --- an offset is only committed once the event's raw row and
//! aggregate update are durable in PostgreSQL. Malformed payloads are
//! skipped, since they can never become valid by retrying. Storage failures
//! are retried with exponential backoff; once the attempt ceiling is
//! exhausted the event is dead-lettered to the log and the loop moves on.
//!
//! [Settings]: settings::Settings

pub mod api;
pub mod event;
pub mod ingester;
pub mod settings;
pub mod store;
