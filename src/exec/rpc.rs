// =============================================================================
// Solana JSON-RPC client — submission, confirmation polling, balances
// =============================================================================
//
// Submission policy: skipPreflight=true, 3 attempts with 2 s gaps, then
// poll getSignatureStatuses every 4 s for up to 32 s with
// searchTransactionHistory=true.  SUCCESS iff confirmed with no error.
// Transport errors fall through the configured fallback chain in order.
// =============================================================================

use serde_json::json;
use tracing::{debug, warn};

use super::SwapError;
use crate::config::RpcConfig;

/// Attempts for sendTransaction.
const SEND_ATTEMPTS: u32 = 3;
/// Gap between send attempts.
const SEND_RETRY_GAP_SECS: u64 = 2;
/// Confirmation poll interval.
const CONFIRM_POLL_SECS: u64 = 4;
/// Total confirmation window.
const CONFIRM_WINDOW_SECS: u64 = 32;

/// JSON-RPC client with a primary endpoint and ordered fallbacks.
pub struct RpcClient {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl RpcClient {
    pub fn new(cfg: &RpcConfig) -> Self {
        let mut endpoints = vec![cfg.primary_url.clone()];
        endpoints.extend(cfg.fallback_urls.iter().cloned());
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
                .build()
                .expect("failed to build reqwest client"),
            endpoints,
        }
    }

    /// One JSON-RPC call, walking the fallback chain on transport errors.
    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, SwapError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let mut last_error = String::new();
        for endpoint in &self.endpoints {
            match self.client.post(endpoint).json(&payload).send().await {
                Ok(resp) => {
                    let body: serde_json::Value = match resp.json().await {
                        Ok(b) => b,
                        Err(e) => {
                            last_error = format!("{endpoint}: decode failed: {e}");
                            continue;
                        }
                    };
                    if let Some(error) = body.get("error") {
                        // An RPC-level error is authoritative; fallbacks
                        // would just repeat it.
                        return Err(classify_rpc_error(method, error));
                    }
                    return Ok(body.get("result").cloned().unwrap_or(serde_json::Value::Null));
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, method, error = %e, "rpc endpoint unreachable — trying next");
                    last_error = format!("{endpoint}: {e}");
                }
            }
        }
        Err(SwapError::Submission(format!(
            "all rpc endpoints failed for {method}: {last_error}"
        )))
    }

    /// Submit a signed transaction.  Returns the signature string.
    pub async fn send_transaction(&self, signed_tx_b64: &str) -> Result<String, SwapError> {
        let params = json!([
            signed_tx_b64,
            { "encoding": "base64", "skipPreflight": true, "maxRetries": 0 }
        ]);

        let mut last_err: Option<SwapError> = None;
        for attempt in 1..=SEND_ATTEMPTS {
            match self.call("sendTransaction", params.clone()).await {
                Ok(result) => {
                    let signature = result
                        .as_str()
                        .map(str::to_string)
                        .ok_or_else(|| {
                            SwapError::Submission("sendTransaction returned no signature".to_string())
                        })?;
                    debug!(signature = %signature, attempt, "transaction submitted");
                    return Ok(signature);
                }
                Err(e @ SwapError::SlippageExceeded) => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "sendTransaction attempt failed");
                    last_err = Some(e);
                    if attempt < SEND_ATTEMPTS {
                        tokio::time::sleep(std::time::Duration::from_secs(SEND_RETRY_GAP_SECS))
                            .await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| SwapError::Submission("sendTransaction failed".to_string())))
    }

    /// Poll until the signature confirms or the window closes.
    pub async fn confirm_signature(&self, signature: &str) -> Result<(), SwapError> {
        let deadline = tokio::time::Instant::now()
            + std::time::Duration::from_secs(CONFIRM_WINDOW_SECS);

        loop {
            let params = json!([[signature], { "searchTransactionHistory": true }]);
            match self.call("getSignatureStatuses", params).await {
                Ok(result) => {
                    let status = result
                        .get("value")
                        .and_then(|v| v.as_array())
                        .and_then(|arr| arr.first())
                        .cloned()
                        .unwrap_or(serde_json::Value::Null);

                    if let Some(outcome) = interpret_status(&status) {
                        return outcome;
                    }
                }
                Err(e) => warn!(signature, error = %e, "status poll failed — will retry"),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(SwapError::Unconfirmed(format!(
                    "{signature} not confirmed within {CONFIRM_WINDOW_SECS}s"
                )));
            }
            tokio::time::sleep(std::time::Duration::from_secs(CONFIRM_POLL_SECS)).await;
        }
    }

    /// SOL balance of a wallet, in lamports.
    pub async fn get_balance_lamports(&self, pubkey: &str) -> Result<u64, SwapError> {
        let result = self.call("getBalance", json!([pubkey])).await?;
        result
            .get("value")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| SwapError::Submission("getBalance returned no value".to_string()))
    }

    /// Raw token balance held by `owner` for `mint`.
    pub async fn get_token_balance(
        &self,
        owner: &str,
        mint: &str,
    ) -> Result<u64, SwapError> {
        let params = json!([
            owner,
            { "mint": mint },
            { "encoding": "jsonParsed" }
        ]);
        let result = self.call("getTokenAccountsByOwner", params).await?;
        let total = result
            .get("value")
            .and_then(|v| v.as_array())
            .map(|accounts| {
                accounts
                    .iter()
                    .filter_map(|acc| {
                        acc.pointer("/account/data/parsed/info/tokenAmount/amount")
                            .and_then(|v| v.as_str())
                            .and_then(|s| s.parse::<u64>().ok())
                    })
                    .sum::<u64>()
            })
            .unwrap_or(0);
        Ok(total)
    }
}

/// Decide success/failure/keep-polling from one status entry.
/// `None` means not yet visible — keep polling.
fn interpret_status(status: &serde_json::Value) -> Option<Result<(), SwapError>> {
    if status.is_null() {
        return None;
    }

    if let Some(err) = status.get("err") {
        if !err.is_null() {
            let text = err.to_string();
            if is_slippage_error(&text) {
                return Some(Err(SwapError::SlippageExceeded));
            }
            return Some(Err(SwapError::Unconfirmed(format!(
                "transaction failed on chain: {text}"
            ))));
        }
    }

    let confirmation = status
        .get("confirmationStatus")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if confirmation == "confirmed" || confirmation == "finalized" {
        return Some(Ok(()));
    }
    None
}

fn classify_rpc_error(method: &str, error: &serde_json::Value) -> SwapError {
    let text = error.to_string();
    if is_slippage_error(&text) {
        return SwapError::SlippageExceeded;
    }
    SwapError::Submission(format!("{method} rpc error: {text}"))
}

/// Jupiter's slippage guard surfaces as custom program error 0x1771
/// (SlippageToleranceExceeded).
fn is_slippage_error(text: &str) -> bool {
    text.contains("0x1771") || text.contains("SlippageToleranceExceeded")
}
