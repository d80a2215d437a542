// =============================================================================
// Portfolio State — single JSON blob, atomic writes, `.bak` recovery
// =============================================================================
//
// Ownership discipline: the orchestrator owns this file for the duration of a
// cycle, but any stage that mutates state mid-cycle (exit executor, score &
// execute) MUST re-read from disk first so the finalize stage never clobbers
// an earlier write.
//
// Write path: serialise → write `<file>.tmp` → copy current file to
// `<file>.bak` → rename tmp over the original.  Load path: try the main file,
// fall back to `.bak` on parse failure.
//
// Read-modify-write sections take an advisory exclusive lock on a sibling
// `.lock` file (fs2), so an overlapping cycle cannot interleave writes.
// =============================================================================

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::PlayType;

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// One open position.  Duplicate entries per mint are allowed; exits remove
/// exactly one entry at a time (first match).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub token_mint: String,
    pub token_symbol: String,

    /// SOL spent on entry (full entry, before any partial exits).
    pub entry_amount_sol: f64,
    /// Tokens received on entry; reduced by partial exits.
    pub entry_amount_tokens: f64,
    /// Market cap at entry.  Required: PnL is computed from mcap only.
    pub entry_market_cap_usd: f64,

    pub entry_time: DateTime<Utc>,
    /// Highest market cap observed since entry (trailing stop anchor).
    #[serde(default)]
    pub peak_market_cap_usd: f64,
    #[serde(default)]
    pub entry_liquidity_usd: f64,

    pub play_type: PlayType,

    /// Monotonic: once a tier exit fires, the flag never clears.
    #[serde(default)]
    pub tier1_exited: bool,
    #[serde(default)]
    pub tier2_exited: bool,
}

impl Position {
    /// Age of this position in whole minutes.
    pub fn age_minutes(&self, now: DateTime<Utc>) -> u64 {
        now.signed_duration_since(self.entry_time)
            .num_minutes()
            .max(0) as u64
    }
}

// ---------------------------------------------------------------------------
// PortfolioState
// ---------------------------------------------------------------------------

/// The singleton agent state.  Everything consequential and durable about the
/// pot lives here; the bead chain carries the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    /// Set exactly once at initialisation; drawdown is measured against it.
    pub starting_balance_sol: f64,
    /// Must track the on-chain SOL balance within the reconcile tolerance.
    pub current_balance_sol: f64,

    #[serde(default)]
    pub positions: Vec<Position>,

    // --- Daily counters (reset on date rollover) -----------------------------
    #[serde(default)]
    pub daily_exposure_sol: f64,
    #[serde(default)]
    pub daily_date: String,
    #[serde(default)]
    pub daily_loss_pct: f64,
    #[serde(default)]
    pub consecutive_losses: u32,
    #[serde(default)]
    pub daily_graduation_count: u32,

    // --- Lifetime counters (monotonic) ---------------------------------------
    #[serde(default)]
    pub total_trades: u32,
    #[serde(default)]
    pub total_wins: u32,
    #[serde(default)]
    pub total_losses: u32,

    // --- Dry-run shakedown ---------------------------------------------------
    #[serde(default)]
    pub dry_run_mode: bool,
    #[serde(default)]
    pub dry_run_cycles_completed: u32,
    #[serde(default)]
    pub dry_run_target_cycles: u32,

    // --- Halt latch ----------------------------------------------------------
    #[serde(default)]
    pub halted: bool,
    #[serde(default)]
    pub halted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub halt_reason: Option<String>,

    #[serde(default)]
    pub last_heartbeat_time: Option<DateTime<Utc>>,
}

impl PortfolioState {
    /// Fresh state for a new pot.
    pub fn new(starting_balance_sol: f64, now: DateTime<Utc>) -> Self {
        Self {
            starting_balance_sol,
            current_balance_sol: starting_balance_sol,
            positions: Vec::new(),
            daily_exposure_sol: 0.0,
            daily_date: now.format("%Y-%m-%d").to_string(),
            daily_loss_pct: 0.0,
            consecutive_losses: 0,
            daily_graduation_count: 0,
            total_trades: 0,
            total_wins: 0,
            total_losses: 0,
            dry_run_mode: false,
            dry_run_cycles_completed: 0,
            dry_run_target_cycles: 0,
            halted: false,
            halted_at: None,
            halt_reason: None,
            last_heartbeat_time: None,
        }
    }

    /// Reset daily counters if the calendar date has rolled over.
    pub fn maybe_reset_daily(&mut self, now: DateTime<Utc>) {
        let today = now.format("%Y-%m-%d").to_string();
        if self.daily_date == today {
            return;
        }
        info!(
            old_date = %self.daily_date,
            new_date = %today,
            "date rolled — resetting daily counters"
        );
        self.daily_date = today;
        self.daily_exposure_sol = 0.0;
        self.daily_loss_pct = 0.0;
        self.daily_graduation_count = 0;
    }

    /// Drawdown from starting balance, percent.  Positive means underwater.
    pub fn drawdown_pct(&self) -> f64 {
        if self.starting_balance_sol <= 0.0 {
            return 0.0;
        }
        ((self.starting_balance_sol - self.current_balance_sol) / self.starting_balance_sol)
            * 100.0
    }

    /// Number of open entries for a mint (per-mint cap check).
    pub fn entries_for_mint(&self, mint: &str) -> usize {
        self.positions.iter().filter(|p| p.token_mint == mint).count()
    }

    /// Remove exactly one position entry for `mint` — the first match.
    /// Returns the removed entry, or `None` if the mint has no entry.
    pub fn remove_first_position(&mut self, mint: &str) -> Option<Position> {
        let idx = self.positions.iter().position(|p| p.token_mint == mint)?;
        Some(self.positions.remove(idx))
    }

    /// Latch the halt flag with a reason.
    pub fn halt(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        let reason = reason.into();
        warn!(reason = %reason, "portfolio HALTED");
        self.halted = true;
        self.halted_at = Some(now);
        self.halt_reason = Some(reason);
    }
}

// ---------------------------------------------------------------------------
// StateFile — load/store with atomic write and advisory lock
// ---------------------------------------------------------------------------

/// Handle to the portfolio state file.  Cheap to clone; holds only paths.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn bak_path(&self) -> PathBuf {
        self.path.with_extension("json.bak")
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    /// Load state, falling back to the `.bak` companion if the main file is
    /// corrupt.  A missing file is an error — initialisation is explicit.
    pub fn load(&self) -> Result<PortfolioState> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read state from {}", self.path.display()))?;

        match serde_json::from_str::<PortfolioState>(&content) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "state file corrupt — recovering from .bak"
                );
                let bak = std::fs::read_to_string(self.bak_path()).with_context(|| {
                    format!("state corrupt and no readable .bak at {}", self.bak_path().display())
                })?;
                serde_json::from_str(&bak).context("both state file and .bak are corrupt")
            }
        }
    }

    /// Persist state atomically: tmp write → `.bak` of the old file → rename.
    pub fn store(&self, state: &PortfolioState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let content =
            serde_json::to_string_pretty(state).context("failed to serialise portfolio state")?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp state to {}", tmp_path.display()))?;

        // Keep the previous good copy around before the rename clobbers it.
        if self.path.exists() {
            std::fs::copy(&self.path, self.bak_path())
                .with_context(|| format!("failed to back up {}", self.path.display()))?;
        }

        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to rename tmp state to {}", self.path.display()))?;

        debug!(path = %self.path.display(), "portfolio state saved (atomic)");
        Ok(())
    }

    /// Run `f` under an exclusive advisory lock with a freshly loaded state;
    /// persists the (possibly mutated) state afterwards.  This is the only
    /// sanctioned way to mutate state mid-cycle.
    pub fn update<T>(&self, f: impl FnOnce(&mut PortfolioState) -> Result<T>) -> Result<T> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())
            .with_context(|| format!("failed to open lock file {}", self.lock_path().display()))?;
        lock_file
            .lock_exclusive()
            .context("failed to acquire state file lock")?;

        let result = (|| {
            let mut state = self.load()?;
            let out = f(&mut state)?;
            self.store(&state)?;
            Ok(out)
        })();

        // Errors on unlock are not actionable; the lock dies with the fd.
        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn sample_position(mint: &str, tokens: f64) -> Position {
        Position {
            token_mint: mint.to_string(),
            token_symbol: "TEST".to_string(),
            entry_amount_sol: 0.2,
            entry_amount_tokens: tokens,
            entry_market_cap_usd: 80_000.0,
            entry_time: Utc::now(),
            peak_market_cap_usd: 80_000.0,
            entry_liquidity_usd: 12_000.0,
            play_type: PlayType::Graduation,
            tier1_exited: false,
            tier2_exited: false,
        }
    }

    #[test]
    fn store_load_roundtrip_with_bak() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("portfolio.json"));

        let mut state = PortfolioState::new(14.0, Utc::now());
        state.positions.push(sample_position("MintA", 1000.0));
        file.store(&state).unwrap();

        // Second store creates the .bak companion.
        state.total_trades = 1;
        file.store(&state).unwrap();
        assert!(dir.path().join("portfolio.json.bak").exists());

        let loaded = file.load().unwrap();
        assert_eq!(loaded.total_trades, 1);
        assert_eq!(loaded.positions.len(), 1);
        assert_eq!(loaded.positions[0].token_mint, "MintA");
    }

    #[test]
    fn corrupt_state_recovers_from_bak() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("portfolio.json"));

        let state = PortfolioState::new(14.0, Utc::now());
        file.store(&state).unwrap();
        file.store(&state).unwrap(); // creates .bak

        std::fs::write(dir.path().join("portfolio.json"), "{ not json").unwrap();
        let recovered = file.load().unwrap();
        assert!((recovered.starting_balance_sol - 14.0).abs() < f64::EPSILON);
    }

    #[test]
    fn duplicate_mint_removes_only_first() {
        let mut state = PortfolioState::new(14.0, Utc::now());
        state.positions.push(sample_position("MintX", 100.0));
        state.positions.push(sample_position("MintX", 200.0));
        state.positions.push(sample_position("MintX", 300.0));

        let removed = state.remove_first_position("MintX").unwrap();
        assert!((removed.entry_amount_tokens - 100.0).abs() < f64::EPSILON);
        assert_eq!(state.positions.len(), 2);
        // Remaining entries are untouched.
        assert!((state.positions[0].entry_amount_tokens - 200.0).abs() < f64::EPSILON);
        assert!((state.positions[1].entry_amount_tokens - 300.0).abs() < f64::EPSILON);
    }

    #[test]
    fn daily_rollover_resets_counters() {
        let mut state = PortfolioState::new(14.0, Utc::now());
        state.daily_date = "2020-01-01".to_string();
        state.daily_exposure_sol = 1.5;
        state.daily_loss_pct = 4.0;
        state.daily_graduation_count = 3;
        state.consecutive_losses = 2;
        state.maybe_reset_daily(Utc::now());

        assert!((state.daily_exposure_sol).abs() < f64::EPSILON);
        assert!((state.daily_loss_pct).abs() < f64::EPSILON);
        assert_eq!(state.daily_graduation_count, 0);
        // Consecutive losses survive the rollover — they are a streak, not a
        // daily counter.
        assert_eq!(state.consecutive_losses, 2);
    }

    #[test]
    fn update_persists_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::new(dir.path().join("portfolio.json"));
        file.store(&PortfolioState::new(14.0, Utc::now())).unwrap();

        file.update(|s| {
            s.total_trades += 1;
            Ok(())
        })
        .unwrap();

        assert_eq!(file.load().unwrap().total_trades, 1);
    }

    #[test]
    fn drawdown_pct() {
        let mut state = PortfolioState::new(10.0, Utc::now());
        state.current_balance_sol = 7.0;
        assert!((state.drawdown_pct() - 30.0).abs() < 1e-9);
    }
}
