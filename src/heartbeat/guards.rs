// =============================================================================
// Guard cascade — the checks that run before any stage
// =============================================================================
//
// Order: killswitch → zombie gateway → session health (warn) → chain
// verification (warn) → drawdown → risk.  Killswitch, drawdown, and risk
// return HALTED and short-circuit the cycle; the warn-only guards degrade
// the health line and keep going.
// =============================================================================

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::state::PortfolioState;

/// A cycle already running is presumed alive for this long; older locks are
/// stale crashes and get replaced.
const ZOMBIE_LOCK_MAX_AGE_SECS: i64 = 600;

/// Name of the killswitch file in the workspace root.
pub const KILLSWITCH_FILE: &str = "KILLSWITCH";

/// What a guard decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Proceed,
    /// Stop the cycle now; the reason lands in the HEARTBEAT bead.
    Halted(String),
}

/// Killswitch: the file's existence is the whole protocol.
pub fn check_killswitch(workspace: &Path) -> GuardOutcome {
    let path = workspace.join(KILLSWITCH_FILE);
    if path.exists() {
        warn!(path = %path.display(), "killswitch present — halting cycle");
        GuardOutcome::Halted("killswitch file present".to_string())
    } else {
        GuardOutcome::Proceed
    }
}

// ---------------------------------------------------------------------------
// Zombie gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct CycleLock {
    pid: u32,
    started_at: DateTime<Utc>,
}

/// Guard that marks a cycle as running.  Dropping it releases the lock.
pub struct ZombieLock {
    path: PathBuf,
}

impl ZombieLock {
    /// Try to take the cycle lock.  A fresh lock from another cycle halts
    /// us; a stale one is replaced with a warning.
    pub fn acquire(workspace: &Path, now: DateTime<Utc>) -> Result<Self, GuardOutcome> {
        let path = workspace.join("state").join("heartbeat.lock");

        if let Ok(content) = std::fs::read_to_string(&path) {
            if let Ok(lock) = serde_json::from_str::<CycleLock>(&content) {
                let age = now.signed_duration_since(lock.started_at).num_seconds();
                if age < ZOMBIE_LOCK_MAX_AGE_SECS {
                    warn!(
                        pid = lock.pid,
                        age_secs = age,
                        "another cycle appears to be running — aborting"
                    );
                    return Err(GuardOutcome::Halted(format!(
                        "cycle lock held by pid {} ({age}s old)",
                        lock.pid
                    )));
                }
                warn!(pid = lock.pid, age_secs = age, "stale cycle lock — replacing");
            }
        }

        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let lock = CycleLock {
            pid: std::process::id(),
            started_at: now,
        };
        if let Err(e) = std::fs::write(&path, serde_json::to_string(&lock).unwrap_or_default()) {
            warn!(path = %path.display(), error = %e, "could not write cycle lock");
        }
        Ok(Self { path })
    }
}

impl Drop for ZombieLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not remove cycle lock");
        }
    }
}

// ---------------------------------------------------------------------------
// Halt-latch guards
// ---------------------------------------------------------------------------

/// Drawdown guard: pot erosion beyond the configured limit halts the agent
/// until a human intervenes.
pub fn check_drawdown(state: &PortfolioState, cfg: &RiskConfig) -> GuardOutcome {
    let drawdown = state.drawdown_pct();
    if drawdown >= cfg.max_drawdown_pct {
        return GuardOutcome::Halted(format!(
            "drawdown {drawdown:.1}% breached limit {:.1}%",
            cfg.max_drawdown_pct
        ));
    }
    GuardOutcome::Proceed
}

/// Risk guard: intraday realised losses past the halt line stop trading for
/// the rest of the day.  An existing halt latch also stops us.
pub fn check_risk(state: &PortfolioState, cfg: &RiskConfig) -> GuardOutcome {
    if state.halted {
        return GuardOutcome::Halted(
            state
                .halt_reason
                .clone()
                .unwrap_or_else(|| "halt latch set".to_string()),
        );
    }
    if state.daily_loss_pct >= cfg.daily_loss_halt_pct {
        return GuardOutcome::Halted(format!(
            "daily loss {:.1}% breached halt line {:.1}%",
            state.daily_loss_pct, cfg.daily_loss_halt_pct
        ));
    }
    GuardOutcome::Proceed
}

/// Session health: warn-only readability probes for the health line.
pub fn session_health(workspace: &Path) -> Vec<String> {
    let mut warnings = Vec::new();

    let state_path = workspace.join("state").join("portfolio.json");
    if state_path.exists() {
        if let Err(e) = std::fs::read_to_string(&state_path) {
            warnings.push(format!("state unreadable: {e}"));
        }
    }

    let chain_path = workspace.join("beads").join("chain.db");
    if chain_path.exists() {
        match std::fs::metadata(&chain_path) {
            Ok(meta) if meta.len() == 0 => warnings.push("bead db empty".to_string()),
            Err(e) => warnings.push(format!("bead db unreadable: {e}")),
            _ => {}
        }
    }

    if !warnings.is_empty() {
        info!(?warnings, "session health degraded");
    }
    warnings
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn killswitch_halts_when_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(check_killswitch(dir.path()), GuardOutcome::Proceed);

        std::fs::write(dir.path().join(KILLSWITCH_FILE), "").unwrap();
        assert!(matches!(
            check_killswitch(dir.path()),
            GuardOutcome::Halted(_)
        ));
    }

    #[test]
    fn zombie_lock_blocks_fresh_then_releases() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();

        let lock = ZombieLock::acquire(dir.path(), now).unwrap();
        // A second cycle sees a fresh lock and aborts.
        assert!(ZombieLock::acquire(dir.path(), now).is_err());

        drop(lock);
        // Lock released; a new cycle may start.
        assert!(ZombieLock::acquire(dir.path(), now).is_ok());
    }

    #[test]
    fn stale_zombie_lock_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let then = Utc::now() - Duration::seconds(3600);
        let lock = ZombieLock::acquire(dir.path(), then).unwrap();
        // Leak the old lock to simulate a crashed cycle.
        std::mem::forget(lock);

        assert!(ZombieLock::acquire(dir.path(), Utc::now()).is_ok());
    }

    #[test]
    fn drawdown_guard() {
        let cfg = RiskConfig::default();
        let mut state = PortfolioState::new(10.0, Utc::now());
        state.current_balance_sol = 8.0; // −20%
        assert_eq!(check_drawdown(&state, &cfg), GuardOutcome::Proceed);

        state.current_balance_sol = 6.9; // −31%
        assert!(matches!(check_drawdown(&state, &cfg), GuardOutcome::Halted(_)));
    }

    #[test]
    fn risk_guard_daily_loss_and_latch() {
        let cfg = RiskConfig::default();
        let mut state = PortfolioState::new(10.0, Utc::now());
        assert_eq!(check_risk(&state, &cfg), GuardOutcome::Proceed);

        state.daily_loss_pct = 11.0;
        assert!(matches!(check_risk(&state, &cfg), GuardOutcome::Halted(_)));

        state.daily_loss_pct = 0.0;
        state.halt(
            "manual halt",
            Utc::now(),
        );
        match check_risk(&state, &cfg) {
            GuardOutcome::Halted(reason) => assert_eq!(reason, "manual halt"),
            other => panic!("expected halt, got {other:?}"),
        }
    }

    #[test]
    fn session_health_quiet_on_fresh_workspace() {
        let dir = tempfile::tempdir().unwrap();
        assert!(session_health(dir.path()).is_empty());
    }
}
