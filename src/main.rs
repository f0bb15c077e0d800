//! Security news aggregator: binary entrypoint.
//! Loads configuration, wires the sources and runs the hourly batch loop.
//!
//! See `README.md` for the environment variables and `config/aggregator.toml`.

use security_news_aggregator::app::{build_runner, source_adapters, Capabilities};
use security_news_aggregator::config::AppConfig;
use security_news_aggregator::telemetry;

#[tokio::main]
async fn main() {
    // .env may carry LOG_FORMAT, so load it before the subscriber.
    let _ = dotenvy::dotenv();
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.trim().eq_ignore_ascii_case("json"));
    telemetry::init_tracing(json_logs);

    let cfg = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "configuration error; not starting");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cfg).await {
        tracing::error!(error = %format!("{e:#}"), "startup failed");
        std::process::exit(1);
    }
}

async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    telemetry::init_metrics(cfg.metrics_addr)?;

    let caps = Capabilities::from_config(&cfg)?;
    let adapters = source_adapters(&cfg)?;
    let runner = build_runner(&cfg, caps, adapters);
    tracing::info!(
        tasks = ?runner.task_names(),
        dry_run = cfg.dry_run,
        scheduler = cfg.run_scheduler,
        "aggregator starting"
    );

    runner.run_forever(cfg.run_scheduler).await;
    Ok(())
}
