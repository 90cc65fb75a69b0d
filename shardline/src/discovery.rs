//! Shard-count auto-discovery (§4.5, §10.5): `GET /gateway/bot`, routed
//! through the same [`RateLimiter`] the rest of the REST traffic would use.

use anyhow::{Context, Result};
use serde::Deserialize;
use shardline_ratelimit::{RateLimiter, RatelimitedResponse};

const GATEWAY_BOT_URL: &str = "https://discord.com/api/v10/gateway/bot";

#[derive(Deserialize)]
struct GatewayBotResponse {
    shards: u32,
}

struct Response(reqwest::Response);

impl RatelimitedResponse for Response {
    fn status_code(&self) -> u16 {
        self.0.status().as_u16()
    }

    fn header_pairs(&self) -> Vec<(String, Vec<u8>)> {
        self.0.headers().iter().map(|(name, value)| (name.to_string(), value.as_bytes().to_vec())).collect()
    }
}

/// Asks Discord how many shards this bot token should run, per the
/// recommendation in `/gateway/bot`.
pub async fn recommended_shard_count(http: &reqwest::Client, limiter: &RateLimiter, token: &str) -> Result<u32> {
    let response = limiter
        .execute("GET /gateway/bot", || async {
            http.get(GATEWAY_BOT_URL).header("Authorization", format!("Bot {token}")).send().await.map(Response)
        })
        .await
        .context("failed to reach Discord's /gateway/bot endpoint")?;

    let body: GatewayBotResponse = response.0.json().await.context("malformed /gateway/bot response body")?;
    Ok(body.shards.max(1))
}
