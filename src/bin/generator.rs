//! Synthetic click-event producer for exercising the ingestion pipeline.
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use rand::{seq::SliceRandom, Rng};
use rdkafka::{
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
    ClientConfig,
};
use streampulse::{event::ClickEvent, settings::Settings};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SHORT_CODES: &[&str] = &["abc123", "xyz789", "url456"];

const REFERRERS: &[&str] = &[
    "https://news.ycombinator.com/",
    "https://twitter.com/",
    "https://www.reddit.com/r/programming/",
    "https://duckduckgo.com/",
    // direct visits carry an empty referrer
    "",
];

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148",
];

#[doc(hidden)]
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// optional config file layered under the environment
    #[arg(short, long)]
    config: Option<String>,

    /// delay between events
    #[arg(long, default_value_t = 200)]
    interval_ms: u64,

    /// stop after this many events (default: run until interrupted)
    #[arg(long)]
    count: Option<u64>,
}

fn random_event() -> ClickEvent {
    let mut rng = rand::thread_rng();
    ClickEvent {
        short_code: SHORT_CODES.choose(&mut rng).unwrap().to_string(),
        user_id: Some(rng.gen_range(1..=10)),
        occurred_at: Utc::now(),
        referrer: Some(REFERRERS.choose(&mut rng).unwrap().to_string()),
        user_agent: Some(USER_AGENTS.choose(&mut rng).unwrap().to_string()),
        ip: Some(format!(
            "{}.{}.{}.{}",
            rng.gen_range(1..=223),
            rng.gen_range(0..=255),
            rng.gen_range(0..=255),
            rng.gen_range(1..=254)
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let settings = Settings::new(args.config.as_deref()).context("cannot load config")?;

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &settings.kafka_bootstrap_servers)
        .create()
        .context("creating kafka producer")?;

    info!(topic = %settings.kafka_topic_click_events, "producing click events");
    let mut produced = 0_u64;
    loop {
        if args.count.is_some_and(|count| produced >= count) {
            break;
        }

        let event = random_event();
        let payload = serde_json::to_vec(&event).context("encoding event")?;
        let record = FutureRecord::<(), _>::to(&settings.kafka_topic_click_events).payload(&payload);
        // await the delivery future per send so failures surface here
        match producer.send(record, Timeout::Never).await {
            Ok((partition, offset)) => {
                info!(short_code = %event.short_code, partition, offset, "delivered")
            }
            Err((e, _)) => warn!(error = %e, "delivery failed"),
        }
        produced += 1;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(Duration::from_millis(args.interval_ms)) => {}
        }
    }
    info!(produced, "generator stopped");
    Ok(())
}
