use std::time::Duration;

use tracing_subscriber::EnvFilter;

use waggle_bus::{callback, reporting, Bus, BusConfig};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = BusConfig::load()?;
    let name = config.agent_name();
    tracing::info!(
        name = %name,
        endpoint = %config.endpoint(),
        binding = ?config.binding,
        "waggle-agent starting"
    );

    let (reporter, feed) = reporting::channel(name.clone());
    let bus = Bus::start(config, reporter.clone(), feed).await?;

    bus.subscribe(
        "monitoring/#",
        callback(|topic, body| async move {
            tracing::info!(%topic, %body, "report received");
        }),
    )
    .await?;

    let mut monitor = bus.monitor();
    monitor.wait_connected().await;
    tracing::info!("connected, publishing heartbeats");

    let mut beat = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut sequence: u64 = 0;
    loop {
        tokio::select! {
            _ = beat.tick() => {
                sequence += 1;
                let id = bus
                    .publish_own(serde_json::json!({ "beat": sequence }))
                    .await;
                tracing::debug!(%id, sequence, "heartbeat published");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    bus.stop().await;
    Ok(())
}
