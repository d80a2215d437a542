// =============================================================================
// Swap execution — quote → build → sign → submit → confirm
// =============================================================================
//
// The executor owns the full trade path but never the key: signing crosses
// the subprocess boundary.  Failures are typed so the exit executor can
// escalate slippage on the right ones.
// =============================================================================

pub mod jupiter;
pub mod rpc;
pub mod signer;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub use jupiter::{lamports_to_sol, sol_to_lamports, JupiterClient, SwapQuote, SOL_MINT};
pub use rpc::RpcClient;
pub use signer::SignerBoundary;

// ---------------------------------------------------------------------------
// Errors & results
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("quote error: {0}")]
    Quote(String),

    #[error("slippage tolerance exceeded")]
    SlippageExceeded,

    #[error("signing error: {0}")]
    Signing(String),

    #[error("submission error: {0}")]
    Submission(String),

    #[error("unconfirmed: {0}")]
    Unconfirmed(String),
}

impl SwapError {
    /// Errors the slippage ladder is allowed to answer with a wider quote.
    pub fn is_slippage_retryable(&self) -> bool {
        matches!(self, Self::SlippageExceeded | Self::Quote(_))
    }
}

/// A confirmed swap, with amounts from the router's executed quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapResult {
    pub signature: String,
    /// SOL side of the swap (spent on buys, received on sells).
    pub sol_amount: f64,
    /// Raw token units on the token side.
    pub token_amount: f64,
    pub slippage_bps: u32,
}

// ---------------------------------------------------------------------------
// SwapExecutor
// ---------------------------------------------------------------------------

/// Concrete trade path: Jupiter for routing, the signer subprocess for
/// signatures, JSON-RPC for submission and confirmation.
pub struct SwapExecutor {
    jupiter: JupiterClient,
    rpc: RpcClient,
    signer: SignerBoundary,
    wallet_pubkey: String,
}

impl SwapExecutor {
    pub fn new(
        jupiter: JupiterClient,
        rpc: RpcClient,
        signer: SignerBoundary,
        wallet_pubkey: &str,
    ) -> Self {
        Self {
            jupiter,
            rpc,
            signer,
            wallet_pubkey: wallet_pubkey.to_string(),
        }
    }

    pub fn wallet_pubkey(&self) -> &str {
        &self.wallet_pubkey
    }

    /// On-chain SOL balance for reconciliation.
    pub async fn wallet_balance_sol(&self) -> Result<f64, SwapError> {
        let lamports = self.rpc.get_balance_lamports(&self.wallet_pubkey).await?;
        Ok(lamports_to_sol(lamports))
    }

    /// Raw token balance for a mint (position reconciliation).
    pub async fn token_balance(&self, mint: &str) -> Result<u64, SwapError> {
        self.rpc.get_token_balance(&self.wallet_pubkey, mint).await
    }

    /// Buy `sol_amount` worth of `mint`.  Returns tokens received.
    pub async fn buy_token(
        &self,
        mint: &str,
        sol_amount: f64,
        slippage_bps: u32,
    ) -> Result<SwapResult, SwapError> {
        let lamports = sol_to_lamports(sol_amount);
        let quote = self
            .jupiter
            .quote(SOL_MINT, mint, lamports, slippage_bps)
            .await?;
        let result = self.execute(&quote).await?;

        info!(
            mint,
            sol_spent = sol_amount,
            tokens = quote.out_amount,
            signature = %result.signature,
            "buy confirmed"
        );
        Ok(SwapResult {
            signature: result.signature,
            sol_amount,
            token_amount: quote.out_amount as f64,
            slippage_bps,
        })
    }

    /// Sell `token_amount` raw units of `mint` back to SOL.
    pub async fn sell_token(
        &self,
        mint: &str,
        token_amount: f64,
        slippage_bps: u32,
    ) -> Result<SwapResult, SwapError> {
        let raw_tokens = token_amount.max(0.0) as u64;
        let quote = self
            .jupiter
            .quote(mint, SOL_MINT, raw_tokens, slippage_bps)
            .await?;
        let sol_received = lamports_to_sol(quote.out_amount);
        let result = self.execute(&quote).await?;

        info!(
            mint,
            tokens_sold = raw_tokens,
            sol_received,
            signature = %result.signature,
            "sell confirmed"
        );
        Ok(SwapResult {
            signature: result.signature,
            sol_amount: sol_received,
            token_amount: raw_tokens as f64,
            slippage_bps,
        })
    }

    /// Shared tail: build unsigned tx, sign across the boundary, submit,
    /// confirm.
    async fn execute(&self, quote: &SwapQuote) -> Result<SwapResult, SwapError> {
        let unsigned = self
            .jupiter
            .swap_transaction(quote, &self.wallet_pubkey)
            .await?;
        let signed = self.signer.sign(&unsigned).await?;
        let signature = self.rpc.send_transaction(&signed).await?;

        match self.rpc.confirm_signature(&signature).await {
            Ok(()) => Ok(SwapResult {
                signature,
                sol_amount: 0.0,
                token_amount: 0.0,
                slippage_bps: quote.slippage_bps,
            }),
            Err(e) => {
                warn!(signature = %signature, error = %e, "swap did not confirm");
                Err(e)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slippage_retry_classification() {
        assert!(SwapError::SlippageExceeded.is_slippage_retryable());
        assert!(SwapError::Quote("no route".to_string()).is_slippage_retryable());
        assert!(!SwapError::Signing("boom".to_string()).is_slippage_retryable());
        assert!(!SwapError::Unconfirmed("timeout".to_string()).is_slippage_retryable());
        assert!(!SwapError::Submission("down".to_string()).is_slippage_retryable());
    }
}
