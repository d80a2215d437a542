// =============================================================================
// Red flags — penalties applied to the permission score only
// =============================================================================
//
// The ordering score never sees these; they exist to stop trades, not to
// rewrite what the raw momentum looked like.
// =============================================================================

use std::collections::BTreeMap;

use crate::types::{PlayType, PulseStage};

use super::SignalBundle;

/// Evaluate every red flag and return `name -> penalty`.
pub fn apply_red_flags(bundle: &SignalBundle, play_type: PlayType) -> BTreeMap<String, f64> {
    let mut flags = BTreeMap::new();

    // Volume concentration: one wallet printing the tape.
    if let Some(whale) = &bundle.whale {
        if whale.volume_gini >= 0.8 {
            flags.insert("volume_concentration".to_string(), 15.0);
        }

        // Dumper wallets: some distribution is a warning, a crowd of
        // distributors (short of the all-dumpers veto) is worse.
        let dumpers = whale.dumper_count;
        let whales = whale.whale_count;
        if (1..=2).contains(&dumpers) {
            flags.insert("dumper_wallets".to_string(), 15.0);
        } else if dumpers >= 3 && dumpers < whales {
            flags.insert("dumper_wallets".to_string(), 30.0);
        }

        if whale.fresh_wallet_inflow_usd > 50_000.0 {
            flags.insert("fresh_wallet_inflow".to_string(), 10.0);
        }

        if whale.exchange_inflow_usd > 0.0 {
            flags.insert("exchange_inflow".to_string(), 10.0);
        }
    }

    if let Some(pulse) = &bundle.pulse {
        if pulse.organic_ratio < 0.3 {
            flags.insert("pulse_low_organic".to_string(), 10.0);
        }
        if pulse.bundler_pct > 20.0 {
            flags.insert("pulse_bundlers".to_string(), 10.0);
        }
        if pulse.sniper_pct > 30.0 {
            flags.insert("pulse_snipers".to_string(), 10.0);
        }
        // Fresh off the curve with migration sell pressure still ahead.
        if pulse.stage == PulseStage::Bonded {
            flags.insert("post_bonding_trap".to_string(), 10.0);
        }
    }

    // FDV death zone: too big to moon, too small to hold.
    if play_type == PlayType::Graduation
        && bundle.entry_market_cap_usd > 25_000.0
        && bundle.entry_market_cap_usd < 100_000.0
    {
        flags.insert("fdv_death_zone".to_string(), 15.0);
    }

    // S2 divergence: whales loading without the tape confirming.
    if bundle.whale_count() >= 2 && bundle.spike_multiple() < 2.0 && !bundle.kol_mentioned() {
        flags.insert("s2_divergence".to_string(), 25.0);
    }

    flags
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{VolumeSpike, WhaleFlow};

    fn bundle() -> SignalBundle {
        SignalBundle {
            token_mint: "Mint1".to_string(),
            token_symbol: "ONE".to_string(),
            whale: None,
            volume: None,
            pulse: None,
            warden: None,
            edge_match_pct: 0.0,
            entry_market_cap_usd: 150_000.0,
            entry_liquidity_usd: 14_000.0,
            token_age_secs: 900,
            oracle_healthy: true,
            narrative_healthy: true,
            pulse_healthy: true,
        }
    }

    fn whale(whales: u32, dumpers: u32, gini: f64, fresh: f64, exchange: f64) -> WhaleFlow {
        WhaleFlow {
            token_mint: "Mint1".to_string(),
            token_symbol: "ONE".to_string(),
            whale_count: whales,
            dumper_count: dumpers,
            fresh_wallet_inflow_usd: fresh,
            exchange_inflow_usd: exchange,
            volume_gini: gini,
            observed_at: 1_700_000_000,
        }
    }

    #[test]
    fn gini_concentration_flag() {
        let mut b = bundle();
        b.whale = Some(whale(2, 0, 0.85, 0.0, 0.0));
        b.volume = Some(VolumeSpike {
            token_mint: "Mint1".to_string(),
            token_symbol: "ONE".to_string(),
            spike_multiple: 4.0,
            kol_mentioned: false,
            narrative_age_minutes: 5.0,
            tags: Vec::new(),
            observed_at: 1_700_000_000,
        });
        let flags = apply_red_flags(&b, PlayType::Accumulation);
        assert_eq!(flags["volume_concentration"], 15.0);
    }

    #[test]
    fn dumper_tiers() {
        let mut b = bundle();
        b.whale = Some(whale(5, 1, 0.4, 0.0, 0.0));
        assert_eq!(
            apply_red_flags(&b, PlayType::Accumulation)["dumper_wallets"],
            15.0
        );

        b.whale = Some(whale(5, 3, 0.4, 0.0, 0.0));
        assert_eq!(
            apply_red_flags(&b, PlayType::Accumulation)["dumper_wallets"],
            30.0
        );

        // All dumping is the veto's territory, not a flag.
        b.whale = Some(whale(3, 3, 0.4, 0.0, 0.0));
        assert!(!apply_red_flags(&b, PlayType::Accumulation).contains_key("dumper_wallets"));
    }

    #[test]
    fn inflow_flags() {
        let mut b = bundle();
        b.whale = Some(whale(2, 0, 0.4, 60_000.0, 100.0));
        let flags = apply_red_flags(&b, PlayType::Accumulation);
        assert_eq!(flags["fresh_wallet_inflow"], 10.0);
        assert_eq!(flags["exchange_inflow"], 10.0);
    }

    #[test]
    fn pulse_flags() {
        let mut b = bundle();
        let mut pulse = crate::scoring::tests::pulse_candidate();
        pulse.organic_ratio = 0.2;
        pulse.bundler_pct = 25.0;
        pulse.sniper_pct = 35.0;
        b.pulse = Some(pulse);

        let flags = apply_red_flags(&b, PlayType::Graduation);
        assert_eq!(flags["pulse_low_organic"], 10.0);
        assert_eq!(flags["pulse_bundlers"], 10.0);
        assert_eq!(flags["pulse_snipers"], 10.0);
        assert_eq!(flags["post_bonding_trap"], 10.0);
    }

    #[test]
    fn fdv_death_zone_is_graduation_only() {
        let mut b = bundle();
        b.entry_market_cap_usd = 40_000.0;
        assert_eq!(
            apply_red_flags(&b, PlayType::Graduation)["fdv_death_zone"],
            15.0
        );
        assert!(!apply_red_flags(&b, PlayType::Accumulation).contains_key("fdv_death_zone"));

        // Boundaries are exclusive.
        b.entry_market_cap_usd = 25_000.0;
        assert!(!apply_red_flags(&b, PlayType::Graduation).contains_key("fdv_death_zone"));
        b.entry_market_cap_usd = 100_000.0;
        assert!(!apply_red_flags(&b, PlayType::Graduation).contains_key("fdv_death_zone"));
    }

    #[test]
    fn s2_divergence() {
        let mut b = bundle();
        b.whale = Some(whale(2, 0, 0.4, 0.0, 0.0));
        b.volume = Some(VolumeSpike {
            token_mint: "Mint1".to_string(),
            token_symbol: "ONE".to_string(),
            spike_multiple: 1.5,
            kol_mentioned: false,
            narrative_age_minutes: 5.0,
            tags: Vec::new(),
            observed_at: 1_700_000_000,
        });
        assert_eq!(
            apply_red_flags(&b, PlayType::Accumulation)["s2_divergence"],
            25.0
        );

        // A KOL mention clears the divergence.
        b.volume.as_mut().unwrap().kol_mentioned = true;
        assert!(!apply_red_flags(&b, PlayType::Accumulation).contains_key("s2_divergence"));
    }

    #[test]
    fn clean_bundle_has_no_flags() {
        assert!(apply_red_flags(&bundle(), PlayType::Accumulation).is_empty());
    }
}
