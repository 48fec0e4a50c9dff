//! Application config
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// address of bootstrap kafka brokers
    pub kafka_bootstrap_servers: String,
    /// topic carrying click events
    pub kafka_topic_click_events: String,
    /// consumer group of the ingestion loop
    pub kafka_consumer_group: String,
    /// how long a single poll blocks when the topic is idle (default: 1s)
    pub poll_timeout_seconds: u64,
    pub postgres_host: String,
    pub postgres_port: u16,
    pub postgres_db: String,
    pub postgres_user: String,
    pub postgres_password: String,
    pub postgres_max_connections: u32,
    /// storage attempts per message before the event is dead-lettered (default: 5)
    pub storage_max_attempts: u32,
    /// base delay between storage retries, doubled on every attempt (default: 500ms)
    pub storage_backoff_ms: u64,
    /// listen address of the stats API
    pub analytics_bind: String,
}

impl Settings {
    /// Loads settings from defaults, an optional config file and the
    /// environment, in that order of precedence (environment wins).
    pub fn new(cfgfile: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("kafka_bootstrap_servers", "localhost:9092")?
            .set_default("kafka_topic_click_events", "click-events")?
            .set_default("kafka_consumer_group", "streampulse-consumer")?
            .set_default("poll_timeout_seconds", 1_i64)?
            .set_default("postgres_host", "localhost")?
            .set_default("postgres_port", 5432_i64)?
            .set_default("postgres_db", "streampulse")?
            .set_default("postgres_user", "streampulse")?
            .set_default("postgres_password", "streampulse")?
            .set_default("postgres_max_connections", 5_i64)?
            .set_default("storage_max_attempts", 5_i64)?
            .set_default("storage_backoff_ms", 500_i64)?
            .set_default("analytics_bind", "127.0.0.1:4000")?
            .add_source(File::with_name("config/default").required(false));
        if let Some(cfgfile) = cfgfile {
            builder = builder.add_source(File::with_name(cfgfile).required(true));
        }
        builder
            .add_source(Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_defaults() {
        let settings = Settings::new(None).expect("defaults must load");
        assert_eq!(settings.kafka_topic_click_events, "click-events");
        assert_eq!(settings.kafka_consumer_group, "streampulse-consumer");
        assert_eq!(settings.storage_max_attempts, 5);
        assert_eq!(settings.analytics_bind, "127.0.0.1:4000");
    }

    #[test]
    fn environment_overrides_defaults() {
        std::env::set_var("STORAGE_BACKOFF_MS", "250");
        let settings = Settings::new(None).expect("settings must load");
        assert_eq!(settings.storage_backoff_ms, 250);
        std::env::remove_var("STORAGE_BACKOFF_MS");
    }
}
