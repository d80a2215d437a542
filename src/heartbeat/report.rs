// =============================================================================
// Cycle reporting — the boar line, the health line, and latest.md
// =============================================================================
//
// The two report lines go out through the messenger; latest.md is the
// deterministic orientation file regenerated from state every cycle.  Nothing
// else is allowed to write latest.md, and the report must never contain the
// literal ack tokens some chat tooling swallows.
// =============================================================================

use chrono::{DateTime, SecondsFormat, Utc};

use crate::sources::SourceHealth;
use crate::state::PortfolioState;

use super::context::{CycleResult, FunnelMetrics};

/// First report line: action-oriented, one glance.
pub fn boar_line(cycle_seq: u64, pot_sol: f64, open_positions: usize, summary: &str) -> String {
    format!("🐗 HB #{cycle_seq} | {pot_sol:.2} SOL | {open_positions} pos | {summary} | OINK")
}

/// Second report line: per-source counts and statuses plus the funnel.
pub fn health_line(health: &[SourceHealth], funnel: &FunnelMetrics, errors: usize) -> String {
    let sources = if health.is_empty() {
        "no sources polled".to_string()
    } else {
        health
            .iter()
            .map(|h| {
                if h.healthy {
                    format!("{}:{}", h.name, h.items)
                } else {
                    format!("{}:down", h.name)
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    };
    format!(
        "src[{sources}] scored:{} vetoed:{} exec:{} exits:{} errs:{errors}",
        funnel.scored, funnel.vetoed, funnel.auto_executed, funnel.exits_fired
    )
}

/// Summarise the cycle for the boar line.
pub fn cycle_summary(result: &CycleResult) -> String {
    if result.halted {
        return format!(
            "HALTED: {}",
            result.halt_reason.as_deref().unwrap_or("unknown")
        );
    }
    if result.observe_only {
        return "observe-only (budget spent)".to_string();
    }

    let mut parts = Vec::new();
    if result.funnel.auto_executed > 0 {
        parts.push(format!("{} entered", result.funnel.auto_executed));
    }
    if result.funnel.exits_fired > 0 {
        parts.push(format!("{} exited", result.funnel.exits_fired));
    }
    if parts.is_empty() {
        "no trades".to_string()
    } else {
        parts.join(", ")
    }
}

/// Regenerate latest.md from state.  Pure function of its inputs so the
/// file is reproducible; the timestamp is the state's own heartbeat time.
pub fn latest_md(state: &PortfolioState, result: &CycleResult, now: DateTime<Utc>) -> String {
    let timestamp = state.last_heartbeat_time.unwrap_or(now);
    let mut out = String::new();

    out.push_str("# ChadBoar — latest\n\n");
    out.push_str(&format!(
        "Heartbeat #{} at {}\n\n",
        result.cycle_seq,
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));

    out.push_str("## Pot\n\n");
    out.push_str(&format!(
        "- balance: {:.4} SOL (started {:.4})\n",
        state.current_balance_sol, state.starting_balance_sol
    ));
    out.push_str(&format!(
        "- record: {} trades, {} wins, {} losses, streak {}\n",
        state.total_trades, state.total_wins, state.total_losses, state.consecutive_losses
    ));
    out.push_str(&format!(
        "- today: {:.4} SOL deployed, {:.1}% lost, {} graduation plays\n",
        state.daily_exposure_sol, state.daily_loss_pct, state.daily_graduation_count
    ));
    if state.dry_run_mode {
        out.push_str(&format!(
            "- dry run: {}/{} cycles\n",
            state.dry_run_cycles_completed, state.dry_run_target_cycles
        ));
    }
    if state.halted {
        out.push_str(&format!(
            "- HALTED: {}\n",
            state.halt_reason.as_deref().unwrap_or("unknown")
        ));
    }

    out.push_str("\n## Positions\n\n");
    if state.positions.is_empty() {
        out.push_str("none\n");
    } else {
        for p in &state.positions {
            out.push_str(&format!(
                "- {} ({}) {} | {:.4} SOL in at {:.0} mcap | t1:{} t2:{}\n",
                p.token_symbol,
                p.token_mint,
                p.play_type,
                p.entry_amount_sol,
                p.entry_market_cap_usd,
                p.tier1_exited,
                p.tier2_exited,
            ));
        }
    }

    out.push_str("\n## Last cycle\n\n");
    out.push_str(&format!("- {}\n", cycle_summary(result)));
    for exit in &result.exit_summaries {
        out.push_str(&format!("- exit: {exit}\n"));
    }
    for error in &result.errors {
        out.push_str(&format!("- error[{}]: {}\n", error.stage, error.message));
    }

    out
}
