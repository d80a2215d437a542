// =============================================================================
// Component scoring — play-type-aware weighted conviction
// =============================================================================
//
// Weight profiles:
//
//   component      graduation   accumulation
//   pulse_quality      35            0
//   smart_money         0           40
//   narrative          30           30
//   rug_warden         25           20
//   edge_bank          10           10
//
// Raw component values are clamped into their weight ceilings.  The ordering
// score is the momentum sum (everything except rug_warden) rescaled to 100;
// the permission baseline is the full sum including the warden.
// =============================================================================

use std::collections::BTreeMap;

use crate::types::{PlayType, WardenVerdict};

use super::SignalBundle;

/// Minutes of narrative age before the freshness decay starts.
const NARRATIVE_FRESH_MINUTES: f64 = 30.0;

/// Per-play-type component weights.
#[derive(Debug, Clone, Copy)]
pub struct WeightProfile {
    pub pulse_quality: f64,
    pub smart_money: f64,
    pub narrative: f64,
    pub rug_warden: f64,
    pub edge_bank: f64,
}

impl WeightProfile {
    pub fn for_play_type(play_type: PlayType) -> Self {
        match play_type {
            PlayType::Graduation => Self {
                pulse_quality: 35.0,
                smart_money: 0.0,
                narrative: 30.0,
                rug_warden: 25.0,
                edge_bank: 10.0,
            },
            PlayType::Accumulation => Self {
                pulse_quality: 0.0,
                smart_money: 40.0,
                narrative: 30.0,
                rug_warden: 20.0,
                edge_bank: 10.0,
            },
        }
    }

    /// Maximum achievable momentum (non-warden) points.
    fn momentum_ceiling(&self) -> f64 {
        self.pulse_quality + self.smart_money + self.narrative + self.edge_bank
    }
}

/// A candidate is a graduation play when it came in through the pulse feed
/// with no whale accumulation behind it; anything whale-touched is an
/// accumulation play.
pub fn detect_play_type(bundle: &SignalBundle) -> PlayType {
    if bundle.pulse.is_some() && bundle.whale_count() == 0 {
        PlayType::Graduation
    } else {
        PlayType::Accumulation
    }
}

/// Result of the component pass: breakdown plus the two aggregates.
#[derive(Debug, Clone)]
pub struct ComponentScores {
    pub breakdown: BTreeMap<String, f64>,
    /// Momentum-only score scaled to 0..100.  Risk controls excluded.
    pub ordering_score: u32,
    /// Full weighted sum, 0..100, before red flags and multipliers.
    pub permission_baseline: f64,
}

/// Score all components for a bundle under the given play type.
pub fn score_components(bundle: &SignalBundle, play_type: PlayType) -> ComponentScores {
    let weights = WeightProfile::for_play_type(play_type);
    let mut breakdown = BTreeMap::new();

    // --- smart money: 15 points per accumulating whale -----------------------
    let smart_money = (f64::from(bundle.whale_count()) * 15.0).min(weights.smart_money);
    breakdown.insert("smart_money".to_string(), smart_money);

    // --- narrative: spike strength + KOL kicker − staleness decay ------------
    let spike_points = ((bundle.spike_multiple() / 5.0) * 15.0).min(25.0);
    let kol_points = if bundle.kol_mentioned() { 10.0 } else { 0.0 };
    let decay = (bundle.narrative_age_minutes() - NARRATIVE_FRESH_MINUTES).max(0.0);
    let narrative = (spike_points + kol_points - decay).clamp(0.0, weights.narrative);
    breakdown.insert("narrative".to_string(), narrative);

    // --- rug warden: PASS full, WARN half, FAIL nothing ----------------------
    let rug_warden = match bundle.warden_verdict() {
        Some(WardenVerdict::Pass) => weights.rug_warden,
        Some(WardenVerdict::Warn) => weights.rug_warden / 2.0,
        Some(WardenVerdict::Fail) | None => 0.0,
    };
    breakdown.insert("rug_warden".to_string(), rug_warden);

    // --- edge bank: linear in match percentage -------------------------------
    let edge_bank = ((bundle.edge_match_pct / 100.0) * 10.0).clamp(0.0, weights.edge_bank);
    breakdown.insert("edge_bank".to_string(), edge_bank);

    // --- pulse quality: summed qualifications, graduation only ---------------
    let pulse_quality = if weights.pulse_quality > 0.0 {
        pulse_quality_points(bundle).min(weights.pulse_quality)
    } else {
        0.0
    };
    breakdown.insert("pulse_quality".to_string(), pulse_quality);

    let momentum = smart_money + narrative + edge_bank + pulse_quality;
    let momentum_ceiling = weights.momentum_ceiling();
    let ordering_score = if momentum_ceiling > 0.0 {
        ((momentum / momentum_ceiling) * 100.0).round().clamp(0.0, 100.0) as u32
    } else {
        0
    };

    let permission_baseline = (momentum + rug_warden).clamp(0.0, 100.0);

    ComponentScores {
        breakdown,
        ordering_score,
        permission_baseline,
    }
}

/// Qualification points from pulse-native fields.
fn pulse_quality_points(bundle: &SignalBundle) -> f64 {
    let pulse = match &bundle.pulse {
        Some(p) => p,
        None => return 0.0,
    };

    let mut points = 0.0;

    // Stage: a completed migration is worth more than one still bonding.
    points += match pulse.stage {
        crate::types::PulseStage::Bonded => 10.0,
        crate::types::PulseStage::Bonding => 6.0,
    };

    // Organic buy ratio.
    if pulse.organic_ratio >= 0.6 {
        points += 10.0;
    } else if pulse.organic_ratio >= 0.3 {
        points += 5.0;
    }

    // Pro-trader holder share.
    if pulse.pro_trader_pct > 10.0 {
        points += 8.0;
    } else if pulse.pro_trader_pct > 5.0 {
        points += 4.0;
    }

    // Socials and holder base.
    if pulse.socials_present {
        points += 4.0;
    }
    if pulse.holder_count >= 250 {
        points += 3.0;
    }

    points
}
