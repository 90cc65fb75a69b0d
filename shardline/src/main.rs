mod config;
mod discovery;

use anyhow::{Context, Result};
use config::Config;
use shardline_coordination::{router, CoordinationClient, Worker};
use shardline_model::WorkerCapabilities;
use shardline_ratelimit::RateLimiter;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn capabilities() -> WorkerCapabilities {
    WorkerCapabilities { memory_mb: 0, cores: std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1), platform: std::env::consts::OS.to_owned() }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let config = Config::from_env().context("loading configuration")?;
    let http = reqwest::Client::new();
    let limiter = RateLimiter::new();

    let event_sink = Arc::new(|shard_id: u32, event: shardline_model::DispatchEvent| {
        tracing::debug!(shard_id, %event, "dispatch event");
    });

    let worker = Worker::new(
        config.process_id.clone(),
        config.public_url.clone(),
        config.discord_token.clone(),
        config.intents,
        capabilities(),
        config.coordinator_url.clone().unwrap_or_else(|| config.public_url.clone()),
        config.is_original_coordinator,
        event_sink,
        CoordinationClient::new(),
    );

    let app = router(Arc::clone(&worker));
    let listen_addr = config.listen_addr;
    tracing::info!(addr = %listen_addr, "coordination server listening");
    let server = tokio::spawn(async move {
        if let Err(error) = axum::Server::bind(&listen_addr).serve(app.into_make_service()).await {
            tracing::error!(%error, "coordination server exited");
        }
    });

    match (&config.coordinator_url, config.is_original_coordinator) {
        (None, _) => {
            tracing::info!("no coordinator url configured; bootstrapping as the cluster's first node");
            let total_shards = match discovery::recommended_shard_count(&http, &limiter, &config.discord_token).await {
                Ok(count) => count,
                Err(error) => {
                    tracing::warn!(%error, "failed to auto-discover shard count from /gateway/bot; defaulting to 1");
                    1
                }
            };
            worker.bootstrap_as_coordinator(total_shards, now_ms()).await;
        }
        (Some(_), true) => {
            tracing::info!("attempting to resume as the original coordinator");
            worker.resume_as_original().await.context("resuming as original coordinator")?;
        }
        (Some(_), false) => {
            worker.register().await.context("registering with the coordinator")?;
        }
    }

    worker.spawn_health_probe_loop();
    worker.spawn_metrics_push_loop();

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutting down");
    server.abort();

    Ok(())
}
