//! Engine entry point: load configuration, spawn one watcher per enabled
//! platform, run the aggregator until shutdown.

use poolwatch::{Engine, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let settings = Settings::load()?;
    Engine::start(settings).await
}
