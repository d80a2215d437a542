// =============================================================================
// Volume-spike adapter — narrative candidates from abnormal volume
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{get_json, http_client, with_retries, DataSourceError, TokenBucket};
use crate::config::ProviderConfig;

/// A token whose volume is running hot relative to its baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSpike {
    pub token_mint: String,
    pub token_symbol: String,
    /// Current volume over baseline volume (e.g. 6.0 = 6×).
    pub spike_multiple: f64,
    /// A tracked KOL account mentioned the token inside the window.
    pub kol_mentioned: bool,
    /// Minutes since the narrative first surfaced.
    pub narrative_age_minutes: f64,
    /// Free-form narrative tags ("dog", "ai", "election", ...).
    #[serde(default)]
    pub tags: Vec<String>,
    /// When the provider observed the spike (epoch seconds).
    pub observed_at: i64,
}

/// Rate-limited client for the volume/narrative provider.
pub struct VolumeClient {
    client: reqwest::Client,
    base_url: String,
    bucket: Arc<TokenBucket>,
    max_retries: u32,
}

impl VolumeClient {
    pub fn new(cfg: &ProviderConfig) -> Self {
        Self {
            client: http_client(cfg.timeout_secs),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            bucket: Arc::new(TokenBucket::new("volume", cfg.requests_per_second, cfg.burst)),
            max_retries: cfg.max_retries,
        }
    }

    /// Fetch current spikes, sorted by mint for deterministic aggregation.
    pub async fn fetch_spikes(&self) -> Result<Vec<VolumeSpike>, DataSourceError> {
        let url = format!("{}/v1/spikes", self.base_url);
        let body = with_retries("volume", self.max_retries, || async {
            self.bucket.acquire().await;
            get_json(&self.client, &url).await
        })
        .await?;

        let mut spikes = parse_spikes(&body)?;
        spikes.sort_by(|a, b| a.token_mint.cmp(&b.token_mint));
        debug!(count = spikes.len(), "volume spikes fetched");
        Ok(spikes)
    }
}

/// Decode the provider's `{"spikes": [...]}` envelope.
pub fn parse_spikes(body: &serde_json::Value) -> Result<Vec<VolumeSpike>, DataSourceError> {
    let items = body
        .get("spikes")
        .and_then(|v| v.as_array())
        .ok_or_else(|| DataSourceError::Decode("missing spikes array".to_string()))?;

    items
        .iter()
        .map(|item| {
            serde_json::from_value::<VolumeSpike>(item.clone())
                .map_err(|e| DataSourceError::Decode(format!("bad volume spike: {e}")))
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_spikes_with_default_tags() {
        let body = serde_json::json!({
            "spikes": [{
                "token_mint": "Mint1",
                "token_symbol": "ONE",
                "spike_multiple": 6.5,
                "kol_mentioned": true,
                "narrative_age_minutes": 12.0,
                "observed_at": 1700000000
            }]
        });
        let spikes = parse_spikes(&body).unwrap();
        assert_eq!(spikes.len(), 1);
        assert!(spikes[0].kol_mentioned);
        assert!(spikes[0].tags.is_empty());
    }

    #[test]
    fn missing_envelope_is_decode_error() {
        assert!(matches!(
            parse_spikes(&serde_json::json!([])),
            Err(DataSourceError::Decode(_))
        ));
    }
}
