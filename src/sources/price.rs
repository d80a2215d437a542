// =============================================================================
// Price adapter — token market snapshots (price, market cap, liquidity)
// =============================================================================
//
// PnL is computed from market cap only; the per-token price is carried for
// display but never fed into the PnL formula (the quoter and the price
// provider disagree on units).
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{get_json, http_client, with_retries, DataSourceError, TokenBucket};
use crate::config::ProviderConfig;

/// Market snapshot for a single token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMarket {
    pub token_mint: String,
    pub price_usd: f64,
    pub market_cap_usd: f64,
    pub liquidity_usd: f64,
    /// When the provider computed the snapshot (epoch seconds).
    pub observed_at: i64,
}

/// Rate-limited client for the price provider.
pub struct PriceClient {
    client: reqwest::Client,
    base_url: String,
    bucket: Arc<TokenBucket>,
    max_retries: u32,
}

impl PriceClient {
    pub fn new(cfg: &ProviderConfig) -> Self {
        Self {
            client: http_client(cfg.timeout_secs),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            bucket: Arc::new(TokenBucket::new("price", cfg.requests_per_second, cfg.burst)),
            max_retries: cfg.max_retries,
        }
    }

    /// Fetch the market snapshot for one mint.
    pub async fn fetch_token(&self, mint: &str) -> Result<TokenMarket, DataSourceError> {
        let url = format!("{}/v1/token/{}", self.base_url, mint);
        let body = with_retries("price", self.max_retries, || async {
            self.bucket.acquire().await;
            get_json(&self.client, &url).await
        })
        .await?;

        let market = parse_token(&body)?;
        debug!(mint, mcap = market.market_cap_usd, "token market fetched");
        Ok(market)
    }

    /// Current SOL/USD price, for sizing caps.
    pub async fn fetch_sol_price(&self) -> Result<f64, DataSourceError> {
        let url = format!("{}/v1/sol", self.base_url);
        let body = with_retries("price", self.max_retries, || async {
            self.bucket.acquire().await;
            get_json(&self.client, &url).await
        })
        .await?;

        body.get("price_usd")
            .and_then(|v| v.as_f64())
            .filter(|p| *p > 0.0)
            .ok_or_else(|| DataSourceError::Decode("missing or non-positive price_usd".to_string()))
    }
}

/// Decode the provider's `{"token": {...}}` envelope.
pub fn parse_token(body: &serde_json::Value) -> Result<TokenMarket, DataSourceError> {
    let token = body
        .get("token")
        .ok_or_else(|| DataSourceError::Decode("missing token object".to_string()))?;
    serde_json::from_value::<TokenMarket>(token.clone())
        .map_err(|e| DataSourceError::Decode(format!("bad token market: {e}")))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_snapshot() {
        let body = serde_json::json!({
            "token": {
                "token_mint": "Mint1",
                "price_usd": 0.000032,
                "market_cap_usd": 92000.0,
                "liquidity_usd": 18000.0,
                "observed_at": 1700000000
            }
        });
        let market = parse_token(&body).unwrap();
        assert!((market.market_cap_usd - 92000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_token_is_decode_error() {
        assert!(matches!(
            parse_token(&serde_json::json!({"price_usd": 1.0})),
            Err(DataSourceError::Decode(_))
        ));
    }
}
