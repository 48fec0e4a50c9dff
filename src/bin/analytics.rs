//! Read-only stats API over the tables the ingester maintains.
use anyhow::Context;
use clap::Parser;
use streampulse::{api, settings::Settings, store::PgStore};
use tracing_subscriber::EnvFilter;

#[doc(hidden)]
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// optional config file layered under the environment
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let settings = Settings::new(args.config.as_deref()).context("cannot load config")?;

    let store = PgStore::connect(&settings)
        .await
        .context("connecting to postgres")?;

    api::serve(store, &settings.analytics_bind).await
}
