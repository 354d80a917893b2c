use alerts::LogSink;
use common::logger::init_logger;
use market::feed::JsonLinesFeed;
use scanner::{ScanConfig, ScanOrchestrator};

fn load_config() -> anyhow::Result<ScanConfig> {
    let cfg = match std::env::var("SCAN_CONFIG_PATH") {
        Ok(path) => ScanConfig::from_json_file(path)?,
        Err(_) => ScanConfig::from_env()?,
    };
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_logger("scanner", is_production);

    let cfg = load_config()?;

    let feed = match std::env::var("SCAN_FEED_PATH") {
        Ok(path) => JsonLinesFeed::file(path),
        Err(_) => JsonLinesFeed::stdin(),
    };

    let handle = ScanOrchestrator::new(cfg, feed, LogSink)?.start();

    let stop = handle.stop_signal();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("ctrl-c received; stopping scan");
                stop.stop();
            }
            Err(e) => tracing::error!(error = %e, "cannot listen for ctrl-c"),
        }
    });

    let report = handle.join().await?;
    tracing::info!(report = %serde_json::to_string(&report)?, "final report");

    Ok(())
}
