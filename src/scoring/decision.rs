// =============================================================================
// Decision gate — tiers, permission gates, sizing, human gate
// =============================================================================
//
// Pipeline per candidate:
//   vetoes → components → red flags → partial-data multipliers → tier →
//   primary-source gate → per-mint cap → time-mismatch downgrade →
//   dry-run downgrade → sizing → human gate
//
// The ordering score is computed regardless of outcome so vetoed and
// discarded setups still feed the learning loop.
// =============================================================================

use tracing::debug;

use crate::config::RiskConfig;
use crate::types::{PlayType, Recommendation};

use super::conviction::{detect_play_type, score_components};
use super::red_flags::apply_red_flags;
use super::vetoes::{check_vetoes, VetoContext};
use super::{ConvictionScore, SignalBundle};

/// Multiplier when the whale-flow source is down.
const MISSING_ORACLE_MULT: f64 = 0.7;
/// Multiplier when the volume source is down.
const MISSING_NARRATIVE_MULT: f64 = 0.8;

/// Oracle/narrative timestamps farther apart than this describe two
/// different market moments; the setup is stale somewhere.
const TIME_MISMATCH_SECS: i64 = 300;

/// Portfolio-side inputs the gate needs beyond the bundle.
#[derive(Debug, Clone, Copy)]
pub struct GateContext {
    pub daily_graduation_count: u32,
    pub consecutive_losses: u32,
    pub open_entries_for_mint: usize,
    pub pot_sol: f64,
    pub sol_price_usd: f64,
    pub dry_run: bool,
}

/// Score one candidate end to end.
pub fn decide(bundle: &SignalBundle, ctx: &GateContext, cfg: &RiskConfig) -> ConvictionScore {
    let play_type = detect_play_type(bundle);
    let mut reasons: Vec<String> = Vec::new();

    let vetoes = check_vetoes(
        bundle,
        play_type,
        &VetoContext {
            daily_graduation_count: ctx.daily_graduation_count,
            max_daily_graduation_plays: cfg.max_daily_graduation_plays,
            max_mcap_graduation_usd: cfg.max_mcap_graduation_usd,
            min_entry_liquidity_usd: cfg.min_entry_liquidity_usd,
        },
    );

    let components = score_components(bundle, play_type);
    let red_flags = apply_red_flags(bundle, play_type);
    let penalty: f64 = red_flags.values().sum();

    // Partial-data multipliers apply to what remains after penalties.
    let mut multiplier = 1.0;
    if !bundle.oracle_healthy {
        multiplier *= MISSING_ORACLE_MULT;
        reasons.push("oracle down (x0.7)".to_string());
    }
    if !bundle.narrative_healthy {
        multiplier *= MISSING_NARRATIVE_MULT;
        reasons.push("narrative down (x0.8)".to_string());
    }

    let permission_raw =
        ((components.permission_baseline - penalty).max(0.0) * multiplier).clamp(0.0, 100.0);
    let mut permission_score = permission_raw.round() as u32;

    let primary_sources = bundle.primary_sources();

    let mut recommendation = if !vetoes.is_empty() {
        permission_score = 0;
        for veto in &vetoes {
            reasons.push(format!("VETO {}: {}", veto.veto_id, veto.reason));
        }
        Recommendation::Veto
    } else {
        let tier = match permission_score {
            0..=24 => Recommendation::Discard,
            25..=39 => Recommendation::PaperTrade,
            40..=49 => Recommendation::Watchlist,
            _ => match play_type {
                PlayType::Graduation => Recommendation::AutoExecute,
                PlayType::Accumulation => {
                    if permission_score >= 75 {
                        Recommendation::AutoExecute
                    } else {
                        Recommendation::Watchlist
                    }
                }
            },
        };
        reasons.push(format!(
            "permission {permission_score} ({play_type}) -> {tier}"
        ));
        tier
    };

    // A2: two or more sources dark means we only observe this cycle.
    if recommendation == Recommendation::AutoExecute && bundle.sources_down() >= 2 {
        recommendation = Recommendation::Watchlist;
        reasons.push(format!(
            "{} sources down — observe only",
            bundle.sources_down()
        ));
    }

    // Auto-execution is reserved for warden-PASSed tokens; a WARN can score
    // well enough to watch, never enough to buy.
    if recommendation == Recommendation::AutoExecute
        && bundle.warden_verdict() != Some(crate::types::WardenVerdict::Pass)
    {
        recommendation = Recommendation::Watchlist;
        reasons.push("warden did not PASS — no auto-execution".to_string());
    }

    // A1: the permission gate needs enough independent confirmation.
    if recommendation == Recommendation::AutoExecute {
        let required = match play_type {
            PlayType::Graduation => 1,
            PlayType::Accumulation => 2,
        };
        if primary_sources.len() < required {
            recommendation = Recommendation::Watchlist;
            reasons.push(format!(
                "only {} primary source(s), need {required}",
                primary_sources.len()
            ));
        }
    }

    // Per-mint exposure cap.
    if recommendation == Recommendation::AutoExecute && ctx.open_entries_for_mint >= 2 {
        recommendation = Recommendation::Watchlist;
        reasons.push(format!(
            "already {} entries for this mint",
            ctx.open_entries_for_mint
        ));
    }

    // B2: oracle and narrative telling stories from different moments.
    if let (Some(whale), Some(volume)) = (&bundle.whale, &bundle.volume) {
        let gap = (whale.observed_at - volume.observed_at).abs();
        if gap > TIME_MISMATCH_SECS {
            let downgraded = recommendation.downgrade();
            if downgraded != recommendation {
                reasons.push(format!("oracle/narrative {gap}s apart — one tier down"));
                recommendation = downgraded;
            }
        }
    }

    // Dry-run shakedown: every would-be trade becomes a paper trade.
    if ctx.dry_run && recommendation == Recommendation::AutoExecute {
        recommendation = Recommendation::PaperTrade;
        reasons.push("dry-run mode — paper only".to_string());
    }

    // Sizing only matters when we might actually act.
    let (position_size_sol, human_gate_required) =
        if recommendation == Recommendation::AutoExecute {
            size_position(permission_score, play_type, ctx, cfg, &mut reasons)
        } else {
            (0.0, false)
        };

    debug!(
        mint = %bundle.token_mint,
        play_type = %play_type,
        ordering = components.ordering_score,
        permission = permission_score,
        recommendation = %recommendation,
        "candidate scored"
    );

    ConvictionScore {
        token_mint: bundle.token_mint.clone(),
        token_symbol: bundle.token_symbol.clone(),
        play_type,
        ordering_score: components.ordering_score,
        permission_score,
        breakdown: components.breakdown,
        red_flags,
        vetoes_triggered: vetoes,
        primary_sources,
        recommendation,
        position_size_sol,
        human_gate_required,
        reasoning: reasons.join("; "),
    }
}

/// `min(pot × 5%, score-scaled 1% of pot / volatility)`, halved on a losing
/// streak, capped in USD for graduation plays, human-gated above the limit.
fn size_position(
    permission_score: u32,
    play_type: PlayType,
    ctx: &GateContext,
    cfg: &RiskConfig,
    reasons: &mut Vec<String>,
) -> (f64, bool) {
    let score_frac = f64::from(permission_score) / 100.0;
    let mut size_sol = (ctx.pot_sol * 0.05)
        .min(score_frac * (ctx.pot_sol * 0.01) * (1.0 / cfg.volatility_factor));

    if ctx.consecutive_losses >= cfg.max_consecutive_losses_before_downsize {
        size_sol /= 2.0;
        reasons.push(format!(
            "{} consecutive losses — size halved",
            ctx.consecutive_losses
        ));
    }

    let sol_price = if ctx.sol_price_usd > 0.0 {
        ctx.sol_price_usd
    } else {
        cfg.sol_price_usd_fallback
    };

    if play_type == PlayType::Graduation {
        let cap_sol = cfg.max_position_usd_graduation / sol_price;
        if size_sol > cap_sol {
            size_sol = cap_sol;
            reasons.push(format!(
                "graduation cap {:.0} USD applied",
                cfg.max_position_usd_graduation
            ));
        }
    }

    let size_usd = size_sol * sol_price;
    let human_gate = size_usd > cfg.human_gate_usd;
    if human_gate {
        reasons.push(format!(
            "size {size_usd:.0} USD above human gate — escalating"
        ));
    }

    (size_sol, human_gate)
}
