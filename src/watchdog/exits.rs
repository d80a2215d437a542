// =============================================================================
// Exit executor — escalating-slippage sells and win/loss accounting
// =============================================================================
//
// Slippage policy: NORMAL exits try once at the base slippage; CRITICAL and
// HIGH exits walk the configured ladder (500 → 1500 → 4900 bps) whenever the
// venue reports a slippage-class failure.
//
// State discipline: the position snapshot used to size the sell is read
// before the swap, but the mutation afterwards re-reads state from disk
// under the advisory lock — the finalize stage must never clobber us, and
// we must never clobber it.
//
// Accounting: win/loss counters move only on FULL exits (one verdict per
// position lifetime); partial take-profits adjust the position and the
// balance but not the streak.
// =============================================================================

use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::exec::{SwapError, SwapResult};
use crate::state::{Position, StateFile};
use crate::types::ExitUrgency;

use super::ExitDecision;

/// Anything that can turn tokens back into SOL.  The live implementation is
/// the swap executor; tests substitute a scripted venue.
pub trait SellVenue {
    fn sell_tokens(
        &self,
        mint: &str,
        token_amount: f64,
        slippage_bps: u32,
    ) -> impl std::future::Future<Output = Result<SwapResult, SwapError>> + Send;
}

impl SellVenue for crate::exec::SwapExecutor {
    async fn sell_tokens(
        &self,
        mint: &str,
        token_amount: f64,
        slippage_bps: u32,
    ) -> Result<SwapResult, SwapError> {
        crate::exec::SwapExecutor::sell_token(self, mint, token_amount, slippage_bps).await
    }
}

/// What one exit attempt produced.
#[derive(Debug, Clone)]
pub struct ExitOutcome {
    pub decision: ExitDecision,
    /// Confirmed swap, if any attempt landed.
    pub swap: Option<SwapResult>,
    /// Realised PnL in SOL — full exits only.
    pub realized_pnl_sol: Option<f64>,
    /// The removed entry — full exits only.
    pub removed_position: Option<Position>,
    /// Terminal failure description when no attempt landed.
    pub error: Option<String>,
}

impl ExitOutcome {
    pub fn confirmed(&self) -> bool {
        self.swap.is_some()
    }
}

/// Executes exit decisions against a venue and the state file.
pub struct ExitExecutor<'a, V> {
    venue: &'a V,
    state_file: &'a StateFile,
    cfg: &'a RiskConfig,
}

impl<'a, V: SellVenue> ExitExecutor<'a, V> {
    pub fn new(venue: &'a V, state_file: &'a StateFile, cfg: &'a RiskConfig) -> Self {
        Self {
            venue,
            state_file,
            cfg,
        }
    }

    /// Execute one exit decision end to end.
    pub async fn execute(&self, decision: &ExitDecision) -> anyhow::Result<ExitOutcome> {
        // Size the sell from the current first entry for the mint.
        let snapshot = self.state_file.load()?;
        let position = match snapshot
            .positions
            .iter()
            .find(|p| p.token_mint == decision.token_mint)
        {
            Some(p) => p.clone(),
            None => {
                return Ok(ExitOutcome {
                    decision: decision.clone(),
                    swap: None,
                    realized_pnl_sol: None,
                    removed_position: None,
                    error: Some("position vanished before exit".to_string()),
                })
            }
        };

        let tokens_to_sell = position.entry_amount_tokens * decision.sell_fraction;
        let sol_portion_spent = position.entry_amount_sol * decision.sell_fraction;

        // Walk the slippage ladder for urgent exits; one shot otherwise.
        let ladder: Vec<u32> = match decision.urgency {
            ExitUrgency::Critical | ExitUrgency::High => self.cfg.slippage_ladder_bps.clone(),
            ExitUrgency::Normal => self.cfg.slippage_ladder_bps.iter().take(1).copied().collect(),
        };

        let mut swap: Option<SwapResult> = None;
        let mut last_error: Option<SwapError> = None;
        for (rung, slippage_bps) in ladder.iter().enumerate() {
            match self
                .venue
                .sell_tokens(&decision.token_mint, tokens_to_sell, *slippage_bps)
                .await
            {
                Ok(result) => {
                    swap = Some(result);
                    break;
                }
                Err(e) if e.is_slippage_retryable() && rung + 1 < ladder.len() => {
                    warn!(
                        mint = %decision.token_mint,
                        slippage_bps,
                        next_bps = ladder[rung + 1],
                        error = %e,
                        "sell rejected — escalating slippage"
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        let swap = match swap {
            Some(s) => s,
            None => {
                let error = last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no sell attempt made".to_string());
                warn!(mint = %decision.token_mint, error = %error, "exit failed — position unchanged");
                return Ok(ExitOutcome {
                    decision: decision.clone(),
                    swap: None,
                    realized_pnl_sol: None,
                    removed_position: None,
                    error: Some(error),
                });
            }
        };

        // Mutate state from a fresh read, under the lock.
        let sol_received = swap.sol_amount;
        let tokens_sold = swap.token_amount;
        let full_exit = decision.full_exit;
        let mint = decision.token_mint.clone();
        let kind = decision.kind;
        let starting_balance = snapshot.starting_balance_sol;

        let (realized_pnl, removed) = self.state_file.update(move |state| {
            state.current_balance_sol += sol_received;

            if full_exit {
                let removed = state.remove_first_position(&mint);
                let pnl = sol_received - sol_portion_spent;

                if pnl >= 0.0 {
                    state.total_wins += 1;
                    state.consecutive_losses = 0;
                } else {
                    state.total_losses += 1;
                    state.consecutive_losses += 1;
                    if starting_balance > 0.0 {
                        state.daily_loss_pct += (-pnl / starting_balance) * 100.0;
                    }
                }
                Ok((Some(pnl), removed))
            } else {
                if let Some(position) = state
                    .positions
                    .iter_mut()
                    .find(|p| p.token_mint == mint)
                {
                    position.entry_amount_tokens =
                        (position.entry_amount_tokens - tokens_sold).max(0.0);
                    position.entry_amount_sol =
                        (position.entry_amount_sol - sol_portion_spent).max(0.0);
                    match kind {
                        super::ExitKind::TakeProfit1 => position.tier1_exited = true,
                        super::ExitKind::TakeProfit2 => position.tier2_exited = true,
                        _ => {}
                    }
                }
                Ok((None, None))
            }
        })?;

        info!(
            mint = %decision.token_mint,
            kind = %decision.kind,
            urgency = %decision.urgency,
            sol_received,
            full_exit,
            realized_pnl = ?realized_pnl,
            "exit confirmed"
        );

        Ok(ExitOutcome {
            decision: decision.clone(),
            swap: Some(swap),
            realized_pnl_sol: realized_pnl,
            removed_position: removed,
            error: None,
        })
    }
}
