// =============================================================================
// Conviction scoring — signal bundles, scores, and the edge bank
// =============================================================================
//
// A SignalBundle collects everything the upstream adapters know about one
// candidate.  The scorer turns it into a ConvictionScore carrying two values:
//
//   ordering_score   — raw momentum (smart money, narrative, pulse, edge
//                      bank) scaled to 100.  Risk controls never touch it;
//                      it exists so losing setups can still be learned from.
//   permission_score — the value that governs action: all components
//                      including the warden, minus red-flag penalties,
//                      times the partial-data multipliers.
// =============================================================================

pub mod conviction;
pub mod decision;
pub mod red_flags;
pub mod vetoes;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::sources::{PulseCandidate, VolumeSpike, WardenReport, WhaleFlow};
use crate::types::{PlayType, PrimarySource, Recommendation, WardenVerdict};

pub use conviction::{detect_play_type, score_components, WeightProfile};
pub use decision::{decide, GateContext};
pub use red_flags::apply_red_flags;
pub use vetoes::check_vetoes;

// ---------------------------------------------------------------------------
// SignalBundle
// ---------------------------------------------------------------------------

/// Everything known about one candidate at scoring time.  Ephemeral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalBundle {
    pub token_mint: String,
    pub token_symbol: String,

    pub whale: Option<WhaleFlow>,
    pub volume: Option<VolumeSpike>,
    pub pulse: Option<PulseCandidate>,
    pub warden: Option<WardenReport>,

    /// Edge-bank similarity, percent.
    pub edge_match_pct: f64,

    pub entry_market_cap_usd: f64,
    pub entry_liquidity_usd: f64,
    pub token_age_secs: u64,

    /// Source availability this cycle (health, not presence of a signal).
    pub oracle_healthy: bool,
    pub narrative_healthy: bool,
    pub pulse_healthy: bool,
}

impl SignalBundle {
    pub fn whale_count(&self) -> u32 {
        self.whale.as_ref().map(|w| w.whale_count).unwrap_or(0)
    }

    pub fn dumper_count(&self) -> u32 {
        self.whale.as_ref().map(|w| w.dumper_count).unwrap_or(0)
    }

    pub fn spike_multiple(&self) -> f64 {
        self.volume.as_ref().map(|v| v.spike_multiple).unwrap_or(0.0)
    }

    pub fn kol_mentioned(&self) -> bool {
        self.volume.as_ref().map(|v| v.kol_mentioned).unwrap_or(false)
    }

    pub fn narrative_age_minutes(&self) -> f64 {
        self.volume
            .as_ref()
            .map(|v| v.narrative_age_minutes)
            .unwrap_or(0.0)
    }

    pub fn warden_verdict(&self) -> Option<WardenVerdict> {
        self.warden.as_ref().map(|w| w.verdict)
    }

    /// Which sources qualify as primary for the permission gate.
    pub fn primary_sources(&self) -> BTreeSet<PrimarySource> {
        let mut set = BTreeSet::new();
        if self.whale_count() >= 1 {
            set.insert(PrimarySource::Oracle);
        }
        if self.spike_multiple() >= 3.0 {
            set.insert(PrimarySource::Narrative);
        }
        if self.warden_verdict() == Some(WardenVerdict::Pass) {
            set.insert(PrimarySource::Warden);
        }
        if let Some(pulse) = &self.pulse {
            if pulse.pro_trader_pct > 10.0 && pulse.organic_ratio >= 0.3 {
                set.insert(PrimarySource::Pulse);
            }
        }
        set
    }

    /// Count of unhealthy upstream sources (partial-data penalty input).
    pub fn sources_down(&self) -> u32 {
        [self.oracle_healthy, self.narrative_healthy, self.pulse_healthy]
            .iter()
            .filter(|healthy| !**healthy)
            .count() as u32
    }
}

// ---------------------------------------------------------------------------
// ConvictionScore
// ---------------------------------------------------------------------------

/// One triggered veto invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VetoHit {
    pub veto_id: String,
    pub reason: String,
}

/// The scorer's full output for one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvictionScore {
    pub token_mint: String,
    pub token_symbol: String,
    pub play_type: PlayType,

    pub ordering_score: u32,
    pub permission_score: u32,

    /// Component name → points awarded (pre-penalty).
    pub breakdown: BTreeMap<String, f64>,
    /// Flag name → penalty applied to the permission score.
    pub red_flags: BTreeMap<String, f64>,
    pub vetoes_triggered: Vec<VetoHit>,
    pub primary_sources: BTreeSet<PrimarySource>,

    pub recommendation: Recommendation,
    pub position_size_sol: f64,
    /// AUTO_EXECUTE above the USD gate waits for a human.
    pub human_gate_required: bool,

    pub reasoning: String,
}

// ---------------------------------------------------------------------------
// Edge bank
// ---------------------------------------------------------------------------

/// One remembered winning play: the narrative tags it rode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeEntry {
    pub label: String,
    pub tags: Vec<String>,
}

/// Past winning-play tag sets.  `match_pct` is 100 × the best Jaccard
/// similarity between a candidate's tags and any stored set; no embedding
/// model is involved and the metric is exact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeBank {
    #[serde(default)]
    pub entries: Vec<EdgeEntry>,
}

impl EdgeBank {
    /// Load from JSON; a missing or unreadable bank is just empty.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "edge bank unparseable — treating as empty");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Best Jaccard similarity against the bank, as a percentage.
    pub fn match_pct(&self, tags: &[String]) -> f64 {
        if tags.is_empty() || self.entries.is_empty() {
            return 0.0;
        }
        let candidate: BTreeSet<String> =
            tags.iter().map(|t| t.trim().to_lowercase()).collect();

        let mut best = 0.0f64;
        for entry in &self.entries {
            let stored: BTreeSet<String> =
                entry.tags.iter().map(|t| t.trim().to_lowercase()).collect();
            if stored.is_empty() {
                continue;
            }
            let intersection = candidate.intersection(&stored).count() as f64;
            let union = candidate.union(&stored).count() as f64;
            best = best.max(intersection / union);
        }
        best * 100.0
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PulseStage;

    pub(crate) fn pulse_candidate() -> PulseCandidate {
        PulseCandidate {
            token_mint: "Mint1".to_string(),
            token_symbol: "ONE".to_string(),
            stage: PulseStage::Bonded,
            organic_ratio: 0.6,
            bundler_pct: 5.0,
            sniper_pct: 10.0,
            pro_trader_pct: 15.0,
            deployer_migrations: 1,
            socials_present: true,
            holder_count: 400,
            market_cap_usd: 80_000.0,
            liquidity_usd: 14_000.0,
            token_age_secs: 900,
            observed_at: 1_700_000_000,
        }
    }

    fn bundle_with_tags(tags: Vec<String>) -> SignalBundle {
        SignalBundle {
            token_mint: "Mint1".to_string(),
            token_symbol: "ONE".to_string(),
            whale: None,
            volume: Some(VolumeSpike {
                token_mint: "Mint1".to_string(),
                token_symbol: "ONE".to_string(),
                spike_multiple: 6.0,
                kol_mentioned: false,
                narrative_age_minutes: 10.0,
                tags,
                observed_at: 1_700_000_000,
            }),
            pulse: Some(pulse_candidate()),
            warden: None,
            edge_match_pct: 0.0,
            entry_market_cap_usd: 80_000.0,
            entry_liquidity_usd: 14_000.0,
            token_age_secs: 900,
            oracle_healthy: true,
            narrative_healthy: true,
            pulse_healthy: true,
        }
    }

    #[test]
    fn primary_sources_qualification() {
        let bundle = bundle_with_tags(vec![]);
        let sources = bundle.primary_sources();
        // spike 6x qualifies narrative; pulse pro 15% / organic 0.6 qualifies.
        assert!(sources.contains(&PrimarySource::Narrative));
        assert!(sources.contains(&PrimarySource::Pulse));
        assert!(!sources.contains(&PrimarySource::Oracle));
        assert!(!sources.contains(&PrimarySource::Warden));
    }

    #[test]
    fn sources_down_count() {
        let mut bundle = bundle_with_tags(vec![]);
        assert_eq!(bundle.sources_down(), 0);
        bundle.oracle_healthy = false;
        bundle.pulse_healthy = false;
        assert_eq!(bundle.sources_down(), 2);
    }

    #[test]
    fn edge_bank_jaccard() {
        let bank = EdgeBank {
            entries: vec![
                EdgeEntry {
                    label: "dog-season".to_string(),
                    tags: vec!["dog".to_string(), "solana".to_string()],
                },
                EdgeEntry {
                    label: "ai-agents".to_string(),
                    tags: vec!["ai".to_string(), "agent".to_string(), "meta".to_string()],
                },
            ],
        };

        // Exact match on one entry.
        let pct = bank.match_pct(&["Dog".to_string(), "SOLANA".to_string()]);
        assert!((pct - 100.0).abs() < 1e-9);

        // Partial overlap: {ai} vs {ai, agent, meta} = 1/3.
        let pct = bank.match_pct(&["ai".to_string()]);
        assert!((pct - 100.0 / 3.0).abs() < 1e-9);

        // Nothing in common.
        assert_eq!(bank.match_pct(&["election".to_string()]), 0.0);
    }

    #[test]
    fn empty_edge_bank_scores_zero() {
        let bank = EdgeBank::default();
        assert_eq!(bank.match_pct(&["dog".to_string()]), 0.0);
        assert_eq!(bank.match_pct(&[]), 0.0);
    }

    #[test]
    fn edge_bank_missing_file_is_empty() {
        let bank = EdgeBank::load("/nonexistent/edge_bank.json");
        assert!(bank.entries.is_empty());
    }
}
