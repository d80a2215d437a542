// =============================================================================
// Whale-flow adapter — smart-money accumulation events (the oracle feed)
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{get_json, http_client, with_retries, DataSourceError, TokenBucket};
use crate::config::ProviderConfig;

/// One token's aggregated whale activity over the provider's window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleFlow {
    pub token_mint: String,
    pub token_symbol: String,
    /// Distinct accumulating whale wallets.
    pub whale_count: u32,
    /// Whale wallets classified as distribution/dumping.
    pub dumper_count: u32,
    /// USD inflow from wallets younger than the provider's freshness window.
    pub fresh_wallet_inflow_usd: f64,
    /// USD inflow originating from exchange hot wallets.
    pub exchange_inflow_usd: f64,
    /// Gini coefficient of volume concentration across buyers, 0..1.
    pub volume_gini: f64,
    /// When the provider observed the window end (epoch seconds).
    pub observed_at: i64,
}

/// Rate-limited client for the whale-flow provider.
pub struct WhaleClient {
    client: reqwest::Client,
    base_url: String,
    bucket: Arc<TokenBucket>,
    max_retries: u32,
}

impl WhaleClient {
    pub fn new(cfg: &ProviderConfig) -> Self {
        Self {
            client: http_client(cfg.timeout_secs),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            bucket: Arc::new(TokenBucket::new("whale", cfg.requests_per_second, cfg.burst)),
            max_retries: cfg.max_retries,
        }
    }

    /// Fetch the current accumulation window.  Results are sorted by mint so
    /// downstream aggregation is deterministic.
    pub async fn fetch_flows(&self) -> Result<Vec<WhaleFlow>, DataSourceError> {
        let url = format!("{}/v1/flows", self.base_url);
        let body = with_retries("whale", self.max_retries, || async {
            self.bucket.acquire().await;
            get_json(&self.client, &url).await
        })
        .await?;

        let mut flows = parse_flows(&body)?;
        flows.sort_by(|a, b| a.token_mint.cmp(&b.token_mint));
        debug!(count = flows.len(), "whale flows fetched");
        Ok(flows)
    }
}

/// Decode the provider's `{"flows": [...]}` envelope.
pub fn parse_flows(body: &serde_json::Value) -> Result<Vec<WhaleFlow>, DataSourceError> {
    let items = body
        .get("flows")
        .and_then(|v| v.as_array())
        .ok_or_else(|| DataSourceError::Decode("missing flows array".to_string()))?;

    items
        .iter()
        .map(|item| {
            serde_json::from_value::<WhaleFlow>(item.clone())
                .map_err(|e| DataSourceError::Decode(format!("bad whale flow: {e}")))
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> serde_json::Value {
        serde_json::json!({
            "flows": [
                {
                    "token_mint": "ZMint",
                    "token_symbol": "ZZZ",
                    "whale_count": 3,
                    "dumper_count": 0,
                    "fresh_wallet_inflow_usd": 1200.0,
                    "exchange_inflow_usd": 0.0,
                    "volume_gini": 0.42,
                    "observed_at": 1700000000
                },
                {
                    "token_mint": "AMint",
                    "token_symbol": "AAA",
                    "whale_count": 1,
                    "dumper_count": 1,
                    "fresh_wallet_inflow_usd": 60000.0,
                    "exchange_inflow_usd": 500.0,
                    "volume_gini": 0.85,
                    "observed_at": 1700000010
                }
            ]
        })
    }

    #[test]
    fn parses_provider_envelope() {
        let flows = parse_flows(&fixture()).unwrap();
        assert_eq!(flows.len(), 2);
        assert_eq!(flows[0].token_mint, "ZMint");
        assert_eq!(flows[0].whale_count, 3);
        assert!((flows[1].volume_gini - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_envelope_is_decode_error() {
        let err = parse_flows(&serde_json::json!({"data": []})).unwrap_err();
        assert!(matches!(err, DataSourceError::Decode(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn malformed_item_is_decode_error() {
        let body = serde_json::json!({"flows": [{"token_mint": "X"}]});
        assert!(matches!(
            parse_flows(&body),
            Err(DataSourceError::Decode(_))
        ));
    }
}
