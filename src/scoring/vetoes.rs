// =============================================================================
// Veto invariants — absolute kill switches checked before scoring
// =============================================================================
//
// Any triggered veto forces the VETO recommendation regardless of score.
// Every veto carries a stable id so the shadow field can be mined by
// rejection pattern later.
// =============================================================================

use crate::types::{PlayType, WardenVerdict};

use super::{SignalBundle, VetoHit};

/// Youngest token age (seconds) allowed to carry a hard volume spike.
const MIN_AGE_FOR_SPIKE_SECS: u64 = 120;

/// Spike multiple that makes a brand-new token untouchable.
const FRESH_SPIKE_MULTIPLE: f64 = 5.0;

/// Deployer migration count beyond which the deployer is a serial farmer.
const MAX_DEPLOYER_MIGRATIONS: u32 = 5;

/// Spike multiple that smells like wash trading when nothing else confirms.
const WASH_TRADE_MULTIPLE: f64 = 10.0;

/// Gate-side limits the veto pass needs from state and config.
#[derive(Debug, Clone, Copy)]
pub struct VetoContext {
    pub daily_graduation_count: u32,
    pub max_daily_graduation_plays: u32,
    pub max_mcap_graduation_usd: f64,
    pub min_entry_liquidity_usd: f64,
}

/// Run every veto invariant; returns all that fired.
pub fn check_vetoes(
    bundle: &SignalBundle,
    play_type: PlayType,
    ctx: &VetoContext,
) -> Vec<VetoHit> {
    let mut hits = Vec::new();

    // 1. The warden said no.  Nothing overrides the warden.
    if bundle.warden_verdict() == Some(WardenVerdict::Fail) {
        hits.push(VetoHit {
            veto_id: "WARDEN_FAIL".to_string(),
            reason: "rug warden verdict is FAIL".to_string(),
        });
    }

    // 2. Seconds-old token already spiking — launch-bot bait.
    if bundle.token_age_secs < MIN_AGE_FOR_SPIKE_SECS
        && bundle.spike_multiple() >= FRESH_SPIKE_MULTIPLE
    {
        hits.push(VetoHit {
            veto_id: "FRESH_TOKEN_SPIKE".to_string(),
            reason: format!(
                "token is {}s old with a {:.1}x spike",
                bundle.token_age_secs,
                bundle.spike_multiple()
            ),
        });
    }

    // 3. Serial deployer.
    if let Some(pulse) = &bundle.pulse {
        if pulse.deployer_migrations > MAX_DEPLOYER_MIGRATIONS {
            hits.push(VetoHit {
                veto_id: "SERIAL_DEPLOYER".to_string(),
                reason: format!("deployer has migrated {} launches", pulse.deployer_migrations),
            });
        }
    }

    // 4. Daily graduation budget exhausted.
    if play_type == PlayType::Graduation
        && ctx.daily_graduation_count >= ctx.max_daily_graduation_plays
    {
        hits.push(VetoHit {
            veto_id: "GRADUATION_DAILY_CAP".to_string(),
            reason: format!(
                "{} graduation plays today (cap {})",
                ctx.daily_graduation_count, ctx.max_daily_graduation_plays
            ),
        });
    }

    // 5. Every whale in the flow is distributing.
    let whales = bundle.whale_count();
    if whales >= 1 && bundle.dumper_count() >= whales {
        hits.push(VetoHit {
            veto_id: "ALL_WHALES_DUMPING".to_string(),
            reason: format!("all {whales} tracked whales classified as dumpers"),
        });
    }

    // 6. Graduation entry too heavy.
    if play_type == PlayType::Graduation
        && bundle.entry_market_cap_usd > ctx.max_mcap_graduation_usd
    {
        hits.push(VetoHit {
            veto_id: "GRADUATION_MCAP_CAP".to_string(),
            reason: format!(
                "entry mcap {:.0} exceeds graduation cap {:.0}",
                bundle.entry_market_cap_usd, ctx.max_mcap_graduation_usd
            ),
        });
    }

    // 7. Volume with no sponsor: classic wash pattern.
    if bundle.spike_multiple() >= WASH_TRADE_MULTIPLE
        && !bundle.kol_mentioned()
        && whales == 0
    {
        hits.push(VetoHit {
            veto_id: "WASH_TRADE_PATTERN".to_string(),
            reason: format!(
                "{:.1}x spike with no KOL and no whales",
                bundle.spike_multiple()
            ),
        });
    }

    // 8. Liquidity floor: exits would eat the position.
    if bundle.entry_liquidity_usd < ctx.min_entry_liquidity_usd {
        hits.push(VetoHit {
            veto_id: "LIQUIDITY_FLOOR".to_string(),
            reason: format!(
                "entry liquidity {:.0} below floor {:.0}",
                bundle.entry_liquidity_usd, ctx.min_entry_liquidity_usd
            ),
        });
    }

    hits
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{VolumeSpike, WardenReport, WhaleFlow};

    fn ctx() -> VetoContext {
        VetoContext {
            daily_graduation_count: 0,
            max_daily_graduation_plays: 5,
            max_mcap_graduation_usd: 500_000.0,
            min_entry_liquidity_usd: 5_000.0,
        }
    }

    fn clean_bundle() -> SignalBundle {
        SignalBundle {
            token_mint: "Mint1".to_string(),
            token_symbol: "ONE".to_string(),
            whale: None,
            volume: None,
            pulse: Some(crate::scoring::tests::pulse_candidate()),
            warden: Some(WardenReport {
                token_mint: "Mint1".to_string(),
                verdict: WardenVerdict::Pass,
                checks: Vec::new(),
                observed_at: 1_700_000_000,
            }),
            edge_match_pct: 0.0,
            entry_market_cap_usd: 80_000.0,
            entry_liquidity_usd: 14_000.0,
            token_age_secs: 900,
            oracle_healthy: true,
            narrative_healthy: true,
            pulse_healthy: true,
        }
    }

    fn veto_ids(hits: &[VetoHit]) -> Vec<&str> {
        hits.iter().map(|h| h.veto_id.as_str()).collect()
    }

    #[test]
    fn clean_bundle_has_no_vetoes() {
        let hits = check_vetoes(&clean_bundle(), PlayType::Graduation, &ctx());
        assert!(hits.is_empty(), "unexpected vetoes: {:?}", veto_ids(&hits));
    }

    #[test]
    fn warden_fail_vetoes() {
        let mut bundle = clean_bundle();
        bundle.warden.as_mut().unwrap().verdict = WardenVerdict::Fail;
        let hits = check_vetoes(&bundle, PlayType::Graduation, &ctx());
        assert_eq!(veto_ids(&hits), vec!["WARDEN_FAIL"]);
    }

    #[test]
    fn fresh_token_spike_vetoes() {
        let mut bundle = clean_bundle();
        bundle.token_age_secs = 90;
        bundle.volume = Some(VolumeSpike {
            token_mint: "Mint1".to_string(),
            token_symbol: "ONE".to_string(),
            spike_multiple: 5.0,
            kol_mentioned: true,
            narrative_age_minutes: 1.0,
            tags: Vec::new(),
            observed_at: 1_700_000_000,
        });
        let hits = check_vetoes(&bundle, PlayType::Graduation, &ctx());
        assert!(veto_ids(&hits).contains(&"FRESH_TOKEN_SPIKE"));
    }

    #[test]
    fn serial_deployer_vetoes() {
        let mut bundle = clean_bundle();
        bundle.pulse.as_mut().unwrap().deployer_migrations = 6;
        let hits = check_vetoes(&bundle, PlayType::Graduation, &ctx());
        assert!(veto_ids(&hits).contains(&"SERIAL_DEPLOYER"));
    }

    #[test]
    fn graduation_daily_cap_vetoes() {
        let mut gate = ctx();
        gate.daily_graduation_count = 5;
        let hits = check_vetoes(&clean_bundle(), PlayType::Graduation, &gate);
        assert!(veto_ids(&hits).contains(&"GRADUATION_DAILY_CAP"));

        // The cap does not apply to accumulation plays.
        let mut accum = clean_bundle();
        accum.pulse = None;
        let hits = check_vetoes(&accum, PlayType::Accumulation, &gate);
        assert!(!veto_ids(&hits).contains(&"GRADUATION_DAILY_CAP"));
    }

    #[test]
    fn all_whales_dumping_vetoes() {
        let mut bundle = clean_bundle();
        bundle.whale = Some(WhaleFlow {
            token_mint: "Mint1".to_string(),
            token_symbol: "ONE".to_string(),
            whale_count: 3,
            dumper_count: 3,
            fresh_wallet_inflow_usd: 0.0,
            exchange_inflow_usd: 0.0,
            volume_gini: 0.4,
            observed_at: 1_700_000_000,
        });
        let hits = check_vetoes(&bundle, PlayType::Accumulation, &ctx());
        assert!(veto_ids(&hits).contains(&"ALL_WHALES_DUMPING"));

        // Two of three dumping is a red flag, not a veto.
        bundle.whale.as_mut().unwrap().dumper_count = 2;
        let hits = check_vetoes(&bundle, PlayType::Accumulation, &ctx());
        assert!(!veto_ids(&hits).contains(&"ALL_WHALES_DUMPING"));
    }

    #[test]
    fn graduation_mcap_cap_vetoes() {
        let mut bundle = clean_bundle();
        bundle.entry_market_cap_usd = 600_000.0;
        let hits = check_vetoes(&bundle, PlayType::Graduation, &ctx());
        assert!(veto_ids(&hits).contains(&"GRADUATION_MCAP_CAP"));

        let hits = check_vetoes(&bundle, PlayType::Accumulation, &ctx());
        assert!(!veto_ids(&hits).contains(&"GRADUATION_MCAP_CAP"));
    }

    #[test]
    fn wash_trade_pattern_vetoes() {
        let mut bundle = clean_bundle();
        bundle.volume = Some(VolumeSpike {
            token_mint: "Mint1".to_string(),
            token_symbol: "ONE".to_string(),
            spike_multiple: 12.0,
            kol_mentioned: false,
            narrative_age_minutes: 5.0,
            tags: Vec::new(),
            observed_at: 1_700_000_000,
        });
        let hits = check_vetoes(&bundle, PlayType::Graduation, &ctx());
        assert!(veto_ids(&hits).contains(&"WASH_TRADE_PATTERN"));

        // A KOL mention de-fangs the pattern.
        bundle.volume.as_mut().unwrap().kol_mentioned = true;
        let hits = check_vetoes(&bundle, PlayType::Graduation, &ctx());
        assert!(!veto_ids(&hits).contains(&"WASH_TRADE_PATTERN"));
    }

    #[test]
    fn liquidity_floor_vetoes() {
        let mut bundle = clean_bundle();
        bundle.entry_liquidity_usd = 3_000.0;
        let hits = check_vetoes(&bundle, PlayType::Graduation, &ctx());
        assert!(veto_ids(&hits).contains(&"LIQUIDITY_FLOOR"));
    }

    #[test]
    fn multiple_vetoes_all_reported() {
        let mut bundle = clean_bundle();
        bundle.warden.as_mut().unwrap().verdict = WardenVerdict::Fail;
        bundle.entry_liquidity_usd = 1_000.0;
        let hits = check_vetoes(&bundle, PlayType::Graduation, &ctx());
        assert_eq!(hits.len(), 2);
    }
}
