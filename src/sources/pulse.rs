// =============================================================================
// Pulse adapter — bonding-curve graduation candidates with holder anatomy
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{get_json, http_client, with_retries, DataSourceError, TokenBucket};
use crate::config::ProviderConfig;
use crate::types::PulseStage;

/// One candidate on or just off the bonding curve, with the holder
/// categorisation the pulse provider computes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseCandidate {
    pub token_mint: String,
    pub token_symbol: String,
    pub stage: PulseStage,
    /// Fraction of buys judged organic (not bundled/sniped), 0..1.
    pub organic_ratio: f64,
    /// Percent of supply held by bundler wallets.
    pub bundler_pct: f64,
    /// Percent of supply held by first-block snipers.
    pub sniper_pct: f64,
    /// Percent of holders classified as profitable pro traders.
    pub pro_trader_pct: f64,
    /// How many prior launches this deployer has migrated.
    pub deployer_migrations: u32,
    /// Token has a website/telegram/x presence.
    pub socials_present: bool,
    pub holder_count: u32,
    pub market_cap_usd: f64,
    pub liquidity_usd: f64,
    /// Seconds since token creation.
    pub token_age_secs: u64,
    /// When the provider snapshotted the candidate (epoch seconds).
    pub observed_at: i64,
}

/// Rate-limited client for the pulse (graduation-stage) provider.
pub struct PulseClient {
    client: reqwest::Client,
    base_url: String,
    bucket: Arc<TokenBucket>,
    max_retries: u32,
}

impl PulseClient {
    pub fn new(cfg: &ProviderConfig) -> Self {
        Self {
            client: http_client(cfg.timeout_secs),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            bucket: Arc::new(TokenBucket::new("pulse", cfg.requests_per_second, cfg.burst)),
            max_retries: cfg.max_retries,
        }
    }

    /// Fetch bonding/bonded candidates, sorted by mint.
    pub async fn fetch_candidates(&self) -> Result<Vec<PulseCandidate>, DataSourceError> {
        let url = format!("{}/v1/graduations", self.base_url);
        let body = with_retries("pulse", self.max_retries, || async {
            self.bucket.acquire().await;
            get_json(&self.client, &url).await
        })
        .await?;

        let mut candidates = parse_candidates(&body)?;
        candidates.sort_by(|a, b| a.token_mint.cmp(&b.token_mint));
        debug!(count = candidates.len(), "pulse candidates fetched");
        Ok(candidates)
    }
}

/// Decode the provider's `{"candidates": [...]}` envelope.
pub fn parse_candidates(
    body: &serde_json::Value,
) -> Result<Vec<PulseCandidate>, DataSourceError> {
    let items = body
        .get("candidates")
        .and_then(|v| v.as_array())
        .ok_or_else(|| DataSourceError::Decode("missing candidates array".to_string()))?;

    items
        .iter()
        .map(|item| {
            serde_json::from_value::<PulseCandidate>(item.clone())
                .map_err(|e| DataSourceError::Decode(format!("bad pulse candidate: {e}")))
        })
        .collect()
}
