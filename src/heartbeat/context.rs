// =============================================================================
// Cycle context — time budget, error accumulation, funnel metrics
// =============================================================================

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::scoring::ConvictionScore;
use crate::sources::SourceHealth;

/// Wall-clock budget for the whole cycle.  Once spent, remaining stages run
/// observe-only: no trades, no bead writes except the HEARTBEAT.
#[derive(Debug, Clone)]
pub struct CycleClock {
    started: Instant,
    budget: Duration,
}

impl CycleClock {
    pub fn new(budget_secs: u64) -> Self {
        Self {
            started: Instant::now(),
            budget: Duration::from_secs(budget_secs),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    pub fn exhausted(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// One structured error from a stage.  Stages never abort the cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleError {
    pub stage: String,
    pub message: String,
}

/// Candidate counts through the funnel, for the diagnostic line.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FunnelMetrics {
    pub whale_flows: u32,
    pub volume_spikes: u32,
    pub pulse_candidates: u32,
    pub scored: u32,
    pub vetoed: u32,
    pub auto_executed: u32,
    pub exits_fired: u32,
}

/// Everything a cycle produced, for the caller and the tests.
#[derive(Debug, Clone, Default)]
pub struct CycleResult {
    pub cycle_seq: u64,
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub observe_only: bool,
    pub decisions: Vec<ConvictionScore>,
    pub exit_summaries: Vec<String>,
    pub errors: Vec<CycleError>,
    pub source_health: Vec<SourceHealth>,
    pub funnel: FunnelMetrics,
    pub report_line: String,
    pub health_line: String,
}

impl CycleResult {
    pub fn push_error(&mut self, stage: &str, message: impl Into<String>) {
        self.errors.push(CycleError {
            stage: stage.to_string(),
            message: message.into(),
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_budget_counts_down() {
        let clock = CycleClock::new(120);
        assert!(!clock.exhausted());
        assert!(clock.remaining() <= Duration::from_secs(120));

        let spent = CycleClock::new(0);
        assert!(spent.exhausted());
    }

    #[test]
    fn errors_accumulate_with_stage_names() {
        let mut result = CycleResult::default();
        result.push_error("oracle", "provider 503");
        result.push_error("watchdog", "price fetch failed");
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].stage, "oracle");
    }
}
