// =============================================================================
// Position watchdog — market-cap PnL and exit tier selection
// =============================================================================
//
// Every open position is evaluated every cycle:
//   1. PnL strictly from market cap: ((current − entry) / entry) × 100.
//      Never from per-token price — the quoter and the price provider
//      disagree on units, and a unit mismatch here once printed a
//      six-digit PnL.
//   2. Exit checks in priority order:
//        price fetch failed > stop loss > liquidity drop > trailing stop >
//        TP2 > TP1 > time decay
//   3. TP1/TP2 are partial exits with monotone flags; everything else is a
//      full exit.
// =============================================================================

pub mod exits;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RiskConfig;
use crate::sources::TokenMarket;
use crate::state::Position;
use crate::types::{ExitUrgency, PlayType};

pub use exits::{ExitExecutor, ExitOutcome};

/// PnL magnitude beyond this is a unit mismatch, not a trade result.
const PNL_TRIPWIRE_PCT: f64 = 10_000.0;

/// Time decay only fires while the position is going nowhere.
const DECAY_FLAT_BAND_PCT: f64 = 5.0;

/// Liquidity drawdown from entry that forces a HIGH-urgency exit.
const LIQUIDITY_DROP_PCT: f64 = 50.0;

/// Floor for the halved graduation decay window, minutes.
const MIN_DECAY_MINUTES: u64 = 15;

// ---------------------------------------------------------------------------
// Exit decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    PriceFetchFailure,
    StopLoss,
    LiquidityDrop,
    TrailingStop,
    TakeProfit1,
    TakeProfit2,
    TimeDecay,
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PriceFetchFailure => "price_fetch_failure",
            Self::StopLoss => "stop_loss",
            Self::LiquidityDrop => "liquidity_drop",
            Self::TrailingStop => "trailing_stop",
            Self::TakeProfit1 => "take_profit_1",
            Self::TakeProfit2 => "take_profit_2",
            Self::TimeDecay => "time_decay",
        };
        write!(f, "{s}")
    }
}

/// One exit instruction for the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitDecision {
    pub token_mint: String,
    pub token_symbol: String,
    pub kind: ExitKind,
    pub urgency: ExitUrgency,
    /// Fraction of the position's current tokens to sell, (0, 1].
    pub sell_fraction: f64,
    /// Full exits remove the position; partials set a tier flag.
    pub full_exit: bool,
    pub pnl_pct: f64,
    pub reason: String,
}

/// Outcome of evaluating one position: an optional exit plus the peak
/// update the caller must persist.
#[derive(Debug, Clone)]
pub struct WatchdogVerdict {
    pub decision: Option<ExitDecision>,
    pub new_peak_market_cap_usd: f64,
    pub pnl_pct: f64,
}

// ---------------------------------------------------------------------------
// PnL
// ---------------------------------------------------------------------------

/// Market-cap PnL.  Zero when either side is non-positive; clamped at the
/// tripwire with a warning, because a value that size is a bug upstream.
pub fn pnl_pct(entry_mcap_usd: f64, current_mcap_usd: f64) -> f64 {
    if entry_mcap_usd <= 0.0 || current_mcap_usd <= 0.0 {
        return 0.0;
    }
    let pnl = ((current_mcap_usd - entry_mcap_usd) / entry_mcap_usd) * 100.0;
    if pnl.abs() > PNL_TRIPWIRE_PCT {
        warn!(
            entry_mcap_usd,
            current_mcap_usd,
            pnl_pct = pnl,
            "pnl tripwire hit — unit mismatch upstream, clamping"
        );
        return pnl.clamp(-PNL_TRIPWIRE_PCT, PNL_TRIPWIRE_PCT);
    }
    pnl
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate one position against the current market snapshot.
///
/// `market` of `None` means the price fetch failed; the position cannot be
/// monitored and is exited at full urgency.
pub fn evaluate_position(
    position: &Position,
    market: Option<&TokenMarket>,
    cfg: &RiskConfig,
    now: DateTime<Utc>,
) -> WatchdogVerdict {
    let market = match market {
        Some(m) => m,
        None => {
            return WatchdogVerdict {
                decision: Some(ExitDecision {
                    token_mint: position.token_mint.clone(),
                    token_symbol: position.token_symbol.clone(),
                    kind: ExitKind::PriceFetchFailure,
                    urgency: ExitUrgency::Critical,
                    sell_fraction: 1.0,
                    full_exit: true,
                    pnl_pct: 0.0,
                    reason: "price fetch failed — flying blind, exiting".to_string(),
                }),
                new_peak_market_cap_usd: position.peak_market_cap_usd,
                pnl_pct: 0.0,
            };
        }
    };

    let pnl = pnl_pct(position.entry_market_cap_usd, market.market_cap_usd);
    let new_peak = position.peak_market_cap_usd.max(market.market_cap_usd);
    let tier = cfg.exit_tier_for(position.entry_market_cap_usd);

    let exit = |kind: ExitKind, urgency: ExitUrgency, fraction: f64, full: bool, reason: String| {
        WatchdogVerdict {
            decision: Some(ExitDecision {
                token_mint: position.token_mint.clone(),
                token_symbol: position.token_symbol.clone(),
                kind,
                urgency,
                sell_fraction: fraction,
                full_exit: full,
                pnl_pct: pnl,
                reason,
            }),
            new_peak_market_cap_usd: new_peak,
            pnl_pct: pnl,
        }
    };

    // Stop loss.
    if pnl <= tier.sl_pnl_pct {
        return exit(
            ExitKind::StopLoss,
            ExitUrgency::Critical,
            1.0,
            true,
            format!("pnl {pnl:.1}% breached stop at {:.1}%", tier.sl_pnl_pct),
        );
    }

    // Liquidity drained since entry.
    if position.entry_liquidity_usd > 0.0 {
        let liq_drop = ((position.entry_liquidity_usd - market.liquidity_usd)
            / position.entry_liquidity_usd)
            * 100.0;
        if liq_drop >= LIQUIDITY_DROP_PCT {
            return exit(
                ExitKind::LiquidityDrop,
                ExitUrgency::High,
                1.0,
                true,
                format!("liquidity down {liq_drop:.0}% from entry"),
            );
        }
    }

    // Trailing stop: only in profit, measured as drawdown from peak mcap.
    if pnl > 0.0 && new_peak > 0.0 {
        let peak_drawdown = ((new_peak - market.market_cap_usd) / new_peak) * 100.0;
        if peak_drawdown >= tier.trail_pct {
            return exit(
                ExitKind::TrailingStop,
                ExitUrgency::High,
                1.0,
                true,
                format!("{peak_drawdown:.1}% off peak (trail {:.0}%)", tier.trail_pct),
            );
        }
    }

    // Take-profit tiers, monotone flags.
    if !position.tier2_exited && pnl >= tier.tp2_pnl_pct {
        return exit(
            ExitKind::TakeProfit2,
            ExitUrgency::Normal,
            tier.tp2_sell_pct / 100.0,
            false,
            format!("pnl {pnl:.1}% past TP2 {:.0}%", tier.tp2_pnl_pct),
        );
    }
    if !position.tier1_exited && pnl >= tier.tp1_pnl_pct {
        return exit(
            ExitKind::TakeProfit1,
            ExitUrgency::Normal,
            tier.tp1_sell_pct / 100.0,
            false,
            format!("pnl {pnl:.1}% past TP1 {:.0}%", tier.tp1_pnl_pct),
        );
    }

    // Time decay: graduation plays get half the window.
    let decay_minutes = match position.play_type {
        PlayType::Graduation => (tier.decay_minutes / 2).max(MIN_DECAY_MINUTES),
        PlayType::Accumulation => tier.decay_minutes,
    };
    let age = position.age_minutes(now);
    if age >= decay_minutes && pnl.abs() < DECAY_FLAT_BAND_PCT {
        return exit(
            ExitKind::TimeDecay,
            ExitUrgency::Normal,
            1.0,
            true,
            format!("{age}m old, pnl {pnl:.1}% — dead money"),
        );
    }

    debug!(
        mint = %position.token_mint,
        pnl_pct = pnl,
        age_minutes = age,
        "position holding"
    );

    WatchdogVerdict {
        decision: None,
        new_peak_market_cap_usd: new_peak,
        pnl_pct: pnl,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn position(entry_mcap: f64, play_type: PlayType, age_minutes: i64) -> Position {
        Position {
            token_mint: "Mint1".to_string(),
            token_symbol: "ONE".to_string(),
            entry_amount_sol: 0.2,
            entry_amount_tokens: 100_000.0,
            entry_market_cap_usd: entry_mcap,
            entry_time: Utc::now() - Duration::minutes(age_minutes),
            peak_market_cap_usd: entry_mcap,
            entry_liquidity_usd: 20_000.0,
            play_type,
            tier1_exited: false,
            tier2_exited: false,
        }
    }

    fn market(mcap: f64, liquidity: f64) -> TokenMarket {
        TokenMarket {
            token_mint: "Mint1".to_string(),
            price_usd: 0.0001,
            market_cap_usd: mcap,
            liquidity_usd: liquidity,
            observed_at: 1_700_000_000,
        }
    }

    #[test]
    fn pnl_formula_and_guards() {
        assert!((pnl_pct(100_000.0, 180_000.0) - 80.0).abs() < 1e-9);
        assert!((pnl_pct(200_000.0, 136_000.0) - -32.0).abs() < 1e-9);
        assert_eq!(pnl_pct(0.0, 100_000.0), 0.0);
        assert_eq!(pnl_pct(100_000.0, 0.0), 0.0);
        assert_eq!(pnl_pct(-5.0, 100.0), 0.0);
    }

    #[test]
    fn pnl_tripwire_clamps() {
        // 1 → 10_000 would be +999_900%; clamp to the tripwire.
        assert_eq!(pnl_pct(1.0, 10_000.0), 10_000.0);
    }

    #[test]
    fn price_fetch_failure_exits_critical() {
        let pos = position(200_000.0, PlayType::Accumulation, 5);
        let verdict = evaluate_position(&pos, None, &RiskConfig::default(), Utc::now());
        let decision = verdict.decision.unwrap();
        assert_eq!(decision.kind, ExitKind::PriceFetchFailure);
        assert_eq!(decision.urgency, ExitUrgency::Critical);
        assert!(decision.full_exit);
        assert!((decision.sell_fraction - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stop_loss_at_tier_threshold() {
        // 200k entry → tier row "< 500k": SL −25.
        let pos = position(200_000.0, PlayType::Accumulation, 5);
        let verdict = evaluate_position(
            &pos,
            Some(&market(136_000.0, 20_000.0)), // −32%
            &RiskConfig::default(),
            Utc::now(),
        );
        let decision = verdict.decision.unwrap();
        assert_eq!(decision.kind, ExitKind::StopLoss);
        assert_eq!(decision.urgency, ExitUrgency::Critical);
        assert!(decision.full_exit);
        assert!((decision.pnl_pct - -32.0).abs() < 1e-9);
    }

    #[test]
    fn tp1_partial_then_tp2_partial() {
        // 80k entry → tier "< 100k": TP1 +80 sell 40%, TP2 +200 sell 40%.
        let mut pos = position(80_000.0, PlayType::Graduation, 5);
        let cfg = RiskConfig::default();

        let verdict =
            evaluate_position(&pos, Some(&market(150_000.0, 20_000.0)), &cfg, Utc::now());
        let decision = verdict.decision.unwrap();
        assert_eq!(decision.kind, ExitKind::TakeProfit1);
        assert_eq!(decision.urgency, ExitUrgency::Normal);
        assert!(!decision.full_exit);
        assert!((decision.sell_fraction - 0.40).abs() < 1e-12);

        // With tier1 done, +90% does nothing; +210% trips TP2.
        pos.tier1_exited = true;
        pos.peak_market_cap_usd = 152_000.0;
        let verdict =
            evaluate_position(&pos, Some(&market(152_000.0, 20_000.0)), &cfg, Utc::now());
        assert!(verdict.decision.is_none());

        pos.peak_market_cap_usd = 248_000.0;
        let verdict =
            evaluate_position(&pos, Some(&market(248_000.0, 20_000.0)), &cfg, Utc::now());
        let decision = verdict.decision.unwrap();
        assert_eq!(decision.kind, ExitKind::TakeProfit2);
        assert!((decision.sell_fraction - 0.40).abs() < 1e-12);
    }

    #[test]
    fn trailing_stop_from_peak() {
        // 80k entry, ran to 200k, now 140k: 30% off peak ≥ trail 25%.
        let mut pos = position(80_000.0, PlayType::Graduation, 5);
        pos.tier1_exited = true;
        pos.tier2_exited = true;
        pos.peak_market_cap_usd = 200_000.0;

        let verdict = evaluate_position(
            &pos,
            Some(&market(140_000.0, 20_000.0)),
            &RiskConfig::default(),
            Utc::now(),
        );
        let decision = verdict.decision.unwrap();
        assert_eq!(decision.kind, ExitKind::TrailingStop);
        assert_eq!(decision.urgency, ExitUrgency::High);
        assert!(decision.full_exit);
    }

    #[test]
    fn trailing_stop_needs_profit() {
        // Below water: a drawdown from peak is the stop loss's business.
        let mut pos = position(100_000.0, PlayType::Accumulation, 5);
        pos.peak_market_cap_usd = 110_000.0;
        let verdict = evaluate_position(
            &pos,
            Some(&market(85_000.0, 20_000.0)), // pnl −15%, above SL −30
            &RiskConfig::default(),
            Utc::now(),
        );
        assert!(verdict.decision.is_none());
    }

    #[test]
    fn liquidity_drop_exits_high() {
        let pos = position(100_000.0, PlayType::Accumulation, 5);
        let verdict = evaluate_position(
            &pos,
            Some(&market(105_000.0, 8_000.0)), // 60% liquidity gone
            &RiskConfig::default(),
            Utc::now(),
        );
        let decision = verdict.decision.unwrap();
        assert_eq!(decision.kind, ExitKind::LiquidityDrop);
        assert_eq!(decision.urgency, ExitUrgency::High);
    }

    #[test]
    fn time_decay_flat_position() {
        // 80k tier decays at 20m; accumulation keeps the full window.
        let pos = position(80_000.0, PlayType::Accumulation, 25);
        let verdict = evaluate_position(
            &pos,
            Some(&market(82_000.0, 20_000.0)), // +2.5%, flat
            &RiskConfig::default(),
            Utc::now(),
        );
        let decision = verdict.decision.unwrap();
        assert_eq!(decision.kind, ExitKind::TimeDecay);
        assert_eq!(decision.urgency, ExitUrgency::Normal);
        assert!(decision.full_exit);
    }

    #[test]
    fn graduation_halves_decay_window() {
        // 80k tier: 20m window → 10m halved → floored at 15m.
        let young = position(80_000.0, PlayType::Graduation, 12);
        let verdict = evaluate_position(
            &young,
            Some(&market(81_000.0, 20_000.0)),
            &RiskConfig::default(),
            Utc::now(),
        );
        assert!(verdict.decision.is_none());

        let old = position(80_000.0, PlayType::Graduation, 16);
        let verdict = evaluate_position(
            &old,
            Some(&market(81_000.0, 20_000.0)),
            &RiskConfig::default(),
            Utc::now(),
        );
        assert_eq!(verdict.decision.unwrap().kind, ExitKind::TimeDecay);
    }

    #[test]
    fn moving_position_does_not_decay() {
        let pos = position(80_000.0, PlayType::Accumulation, 60);
        let verdict = evaluate_position(
            &pos,
            Some(&market(90_000.0, 20_000.0)), // +12.5%
            &RiskConfig::default(),
            Utc::now(),
        );
        assert!(verdict.decision.is_none());
    }

    #[test]
    fn peak_tracks_upward_only() {
        let pos = position(100_000.0, PlayType::Accumulation, 5);
        let up = evaluate_position(
            &pos,
            Some(&market(120_000.0, 20_000.0)),
            &RiskConfig::default(),
            Utc::now(),
        );
        assert!((up.new_peak_market_cap_usd - 120_000.0).abs() < 1e-9);

        let mut peaked = position(100_000.0, PlayType::Accumulation, 5);
        peaked.peak_market_cap_usd = 150_000.0;
        let down = evaluate_position(
            &peaked,
            Some(&market(120_000.0, 20_000.0)),
            &RiskConfig::default(),
            Utc::now(),
        );
        assert!((down.new_peak_market_cap_usd - 150_000.0).abs() < 1e-9);
    }
}
