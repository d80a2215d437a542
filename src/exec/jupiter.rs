// =============================================================================
// Jupiter router client — quotes and unsigned swap transactions
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::SwapError;
use crate::config::JupiterConfig;

/// Wrapped-SOL mint; every route here is SOL ↔ token.
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Lamports per SOL.
pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// A usable quote from the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapQuote {
    pub input_mint: String,
    pub output_mint: String,
    /// Raw base units going in.
    pub in_amount: u64,
    /// Raw base units expected out.
    pub out_amount: u64,
    pub slippage_bps: u32,
    /// The router's full quote payload, passed back verbatim when building
    /// the swap transaction.
    pub raw: serde_json::Value,
}

/// Thin client over the quote/swap endpoints.
pub struct JupiterClient {
    client: reqwest::Client,
    quote_url: String,
    swap_url: String,
}

impl JupiterClient {
    pub fn new(cfg: &JupiterConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
                .build()
                .expect("failed to build reqwest client"),
            quote_url: cfg.quote_url.clone(),
            swap_url: cfg.swap_url.clone(),
        }
    }

    /// Fetch a quote for `amount` raw units of `input_mint` into
    /// `output_mint` at the given slippage.
    pub async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u32,
    ) -> Result<SwapQuote, SwapError> {
        let url = format!(
            "{}?inputMint={}&outputMint={}&amount={}&slippageBps={}",
            self.quote_url, input_mint, output_mint, amount, slippage_bps
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SwapError::Quote(format!("quote request failed: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SwapError::Quote(format!("quote decode failed: {e}")))?;

        if !status.is_success() {
            return Err(SwapError::Quote(format!(
                "quote HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let quote = parse_quote(&body, slippage_bps)?;
        debug!(
            input_mint,
            output_mint,
            in_amount = quote.in_amount,
            out_amount = quote.out_amount,
            slippage_bps,
            "quote fetched"
        );
        Ok(quote)
    }

    /// Build the unsigned swap transaction for a quote.  Returns base64.
    pub async fn swap_transaction(
        &self,
        quote: &SwapQuote,
        user_pubkey: &str,
    ) -> Result<String, SwapError> {
        let payload = serde_json::json!({
            "quoteResponse": quote.raw,
            "userPublicKey": user_pubkey,
            "wrapAndUnwrapSol": true,
            "prioritizationFeeLamports": "auto",
        });

        let resp = self
            .client
            .post(&self.swap_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SwapError::Quote(format!("swap build request failed: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SwapError::Quote(format!("swap build decode failed: {e}")))?;

        if !status.is_success() {
            return Err(SwapError::Quote(format!(
                "swap build HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        body.get("swapTransaction")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| SwapError::Quote("swap response missing swapTransaction".to_string()))
    }
}

/// Decode the router's quote body.  Amount fields arrive as strings.
pub fn parse_quote(body: &serde_json::Value, slippage_bps: u32) -> Result<SwapQuote, SwapError> {
    let field_u64 = |name: &str| -> Result<u64, SwapError> {
        body.get(name)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| SwapError::Quote(format!("quote missing {name}")))
    };
    let field_str = |name: &str| -> Result<String, SwapError> {
        body.get(name)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| SwapError::Quote(format!("quote missing {name}")))
    };

    Ok(SwapQuote {
        input_mint: field_str("inputMint")?,
        output_mint: field_str("outputMint")?,
        in_amount: field_u64("inAmount")?,
        out_amount: field_u64("outAmount")?,
        slippage_bps,
        raw: body.clone(),
    })
}

/// SOL → raw lamports, saturating at zero.
pub fn sol_to_lamports(sol: f64) -> u64 {
    (sol * LAMPORTS_PER_SOL).max(0.0) as u64
}

/// Raw lamports → SOL.
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quote_with_string_amounts() {
        let body = serde_json::json!({
            "inputMint": SOL_MINT,
            "outputMint": "Mint1",
            "inAmount": "200000000",
            "outAmount": "123456789000",
            "routePlan": []
        });
        let quote = parse_quote(&body, 500).unwrap();
        assert_eq!(quote.in_amount, 200_000_000);
        assert_eq!(quote.out_amount, 123_456_789_000);
        assert_eq!(quote.slippage_bps, 500);
        assert_eq!(quote.raw["routePlan"], serde_json::json!([]));
    }

    #[test]
    fn missing_amount_is_quote_error() {
        let body = serde_json::json!({
            "inputMint": SOL_MINT,
            "outputMint": "Mint1",
            "inAmount": "200000000"
        });
        assert!(matches!(
            parse_quote(&body, 500),
            Err(SwapError::Quote(_))
        ));
    }

    #[test]
    fn lamport_conversions() {
        assert_eq!(sol_to_lamports(0.2), 200_000_000);
        assert_eq!(sol_to_lamports(-1.0), 0);
        assert!((lamports_to_sol(1_500_000_000) - 1.5).abs() < 1e-12);
    }
}
