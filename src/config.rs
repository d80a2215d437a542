// =============================================================================
// Configuration — risk limits and data-source endpoints (YAML)
// =============================================================================
//
// Two files under `config/`:
//
//   risk.yaml    — capital limits, exit tiers, sizing caps, slippage ladder.
//   sources.yaml — provider endpoints, rate limits, retries, RPC fallbacks.
//
// Every field carries `#[serde(default)]` so that adding new fields never
// breaks loading an older config file.  A missing file falls back to defaults
// with a warning, never an abort.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_starting_balance_sol() -> f64 {
    14.0
}

fn default_max_drawdown_pct() -> f64 {
    30.0
}

fn default_daily_exposure_cap_sol() -> f64 {
    2.0
}

fn default_daily_loss_halt_pct() -> f64 {
    10.0
}

fn default_max_consecutive_losses_before_downsize() -> u32 {
    3
}

fn default_max_daily_graduation_plays() -> u32 {
    5
}

fn default_max_mcap_graduation_usd() -> f64 {
    500_000.0
}

fn default_max_position_usd_graduation() -> f64 {
    30.0
}

fn default_human_gate_usd() -> f64 {
    100.0
}

fn default_min_entry_liquidity_usd() -> f64 {
    5_000.0
}

fn default_slippage_ladder_bps() -> Vec<u32> {
    vec![500, 1500, 4900]
}

fn default_volatility_factor() -> f64 {
    1.5
}

fn default_reconcile_tolerance_sol() -> f64 {
    0.05
}

fn default_cycle_budget_secs() -> u64 {
    120
}

fn default_sol_price_usd_fallback() -> f64 {
    150.0
}

fn default_requests_per_second() -> f64 {
    5.0
}

fn default_burst() -> u32 {
    10
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

// =============================================================================
// Exit tiers
// =============================================================================

/// One row of the market-cap-anchored exit table.  All PnL values are
/// percentages relative to entry market cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitTier {
    /// Upper bound (exclusive) of entry mcap this row applies to, in USD.
    /// `f64::INFINITY` is expressed as a missing bound on the last row.
    #[serde(default)]
    pub max_entry_mcap_usd: Option<f64>,
    pub tp1_pnl_pct: f64,
    pub tp1_sell_pct: f64,
    pub tp2_pnl_pct: f64,
    pub tp2_sell_pct: f64,
    pub trail_pct: f64,
    pub decay_minutes: u64,
    pub sl_pnl_pct: f64,
}

fn default_exit_tiers() -> Vec<ExitTier> {
    vec![
        ExitTier {
            max_entry_mcap_usd: Some(100_000.0),
            tp1_pnl_pct: 80.0,
            tp1_sell_pct: 40.0,
            tp2_pnl_pct: 200.0,
            tp2_sell_pct: 40.0,
            trail_pct: 25.0,
            decay_minutes: 20,
            sl_pnl_pct: -30.0,
        },
        ExitTier {
            max_entry_mcap_usd: Some(500_000.0),
            tp1_pnl_pct: 60.0,
            tp1_sell_pct: 50.0,
            tp2_pnl_pct: 150.0,
            tp2_sell_pct: 30.0,
            trail_pct: 20.0,
            decay_minutes: 30,
            sl_pnl_pct: -25.0,
        },
        ExitTier {
            max_entry_mcap_usd: Some(2_000_000.0),
            tp1_pnl_pct: 40.0,
            tp1_sell_pct: 50.0,
            tp2_pnl_pct: 100.0,
            tp2_sell_pct: 30.0,
            trail_pct: 15.0,
            decay_minutes: 45,
            sl_pnl_pct: -20.0,
        },
        ExitTier {
            max_entry_mcap_usd: None,
            tp1_pnl_pct: 30.0,
            tp1_sell_pct: 50.0,
            tp2_pnl_pct: 60.0,
            tp2_sell_pct: 30.0,
            trail_pct: 12.0,
            decay_minutes: 60,
            sl_pnl_pct: -15.0,
        },
    ]
}

// =============================================================================
// RiskConfig
// =============================================================================

/// Capital-protection limits and exit behaviour.  Loaded from
/// `config/risk.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Pot size at initialisation; written into state exactly once.
    #[serde(default = "default_starting_balance_sol")]
    pub starting_balance_sol: f64,

    /// Total drawdown from starting balance that halts the agent, percent.
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,

    /// Maximum SOL committed to new entries in a single day.
    #[serde(default = "default_daily_exposure_cap_sol")]
    pub daily_exposure_cap_sol: f64,

    /// Daily realised loss (percent of pot) that halts trading for the day.
    #[serde(default = "default_daily_loss_halt_pct")]
    pub daily_loss_halt_pct: f64,

    /// Consecutive losses after which auto-execute sizing is halved.
    #[serde(default = "default_max_consecutive_losses_before_downsize")]
    pub max_consecutive_losses_before_downsize: u32,

    /// Maximum graduation plays entered per day.
    #[serde(default = "default_max_daily_graduation_plays")]
    pub max_daily_graduation_plays: u32,

    /// Graduation candidates above this entry mcap are vetoed.
    #[serde(default = "default_max_mcap_graduation_usd")]
    pub max_mcap_graduation_usd: f64,

    /// Hard USD cap on any graduation position.
    #[serde(default = "default_max_position_usd_graduation")]
    pub max_position_usd_graduation: f64,

    /// AUTO_EXECUTE sizes above this require human approval.
    #[serde(default = "default_human_gate_usd")]
    pub human_gate_usd: f64,

    /// Candidates with entry liquidity below this are vetoed.
    #[serde(default = "default_min_entry_liquidity_usd")]
    pub min_entry_liquidity_usd: f64,

    /// Slippage escalation ladder, basis points, tried in order on
    /// quote failures for CRITICAL/HIGH exits.
    #[serde(default = "default_slippage_ladder_bps")]
    pub slippage_ladder_bps: Vec<u32>,

    /// Market-cap-anchored exit tier table, ordered by ascending mcap bound.
    #[serde(default = "default_exit_tiers")]
    pub exit_tiers: Vec<ExitTier>,

    /// Divisor applied to size for volatile candidates.
    #[serde(default = "default_volatility_factor")]
    pub volatility_factor: f64,

    /// Tolerated gap between tracked balance and on-chain balance.
    #[serde(default = "default_reconcile_tolerance_sol")]
    pub reconcile_tolerance_sol: f64,

    /// Hard wall-clock budget for one heartbeat cycle, seconds.
    #[serde(default = "default_cycle_budget_secs")]
    pub cycle_budget_secs: u64,

    /// SOL/USD price used for sizing caps when the price source is down.
    #[serde(default = "default_sol_price_usd_fallback")]
    pub sol_price_usd_fallback: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        // Route through serde so the defaults live in exactly one place.
        serde_yaml::from_str("{}").expect("empty mapping deserialises")
    }
}

// =============================================================================
// SourcesConfig
// =============================================================================

/// Rate/retry/endpoint settings for one upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub base_url: String,

    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    #[serde(default = "default_burst")]
    pub burst: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_jupiter_quote_url() -> String {
    "https://quote-api.jup.ag/v6/quote".to_string()
}

fn default_jupiter_swap_url() -> String {
    "https://quote-api.jup.ag/v6/swap".to_string()
}

/// Jupiter router endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JupiterConfig {
    #[serde(default = "default_jupiter_quote_url")]
    pub quote_url: String,

    #[serde(default = "default_jupiter_swap_url")]
    pub swap_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for JupiterConfig {
    fn default() -> Self {
        Self {
            quote_url: default_jupiter_quote_url(),
            swap_url: default_jupiter_swap_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_rpc_primary() -> String {
    "https://api.mainnet-beta.solana.com".to_string()
}

/// Solana RPC endpoints: one primary, any number of fallbacks tried in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_primary")]
    pub primary_url: String,

    #[serde(default)]
    pub fallback_urls: Vec<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            primary_url: default_rpc_primary(),
            fallback_urls: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Telegram delivery settings.  The bot token itself stays in the
/// environment; only the variable name is configured here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub chat_id: String,

    #[serde(default = "default_telegram_token_env")]
    pub token_env_var: String,
}

fn default_telegram_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            chat_id: String::new(),
            token_env_var: default_telegram_token_env(),
        }
    }
}

/// Top-level data-source configuration.  Loaded from `config/sources.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub whale: ProviderConfig,

    #[serde(default)]
    pub price: ProviderConfig,

    #[serde(default)]
    pub volume: ProviderConfig,

    #[serde(default)]
    pub pulse: ProviderConfig,

    #[serde(default)]
    pub warden: ProviderConfig,

    #[serde(default)]
    pub jupiter: JupiterConfig,

    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,
}

// =============================================================================
// Loading
// =============================================================================

fn load_yaml<T: for<'de> Deserialize<'de> + Default>(path: &Path, what: &str) -> T {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<T>(&content) {
            Ok(cfg) => {
                info!(path = %path.display(), "{what} config loaded");
                cfg
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "{what} config unparseable — using defaults");
                T::default()
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "{what} config missing — using defaults");
            T::default()
        }
    }
}

impl RiskConfig {
    /// Load from `path`, falling back to defaults on any error.  An empty
    /// exit-tier table is replaced with the built-in one; the watchdog
    /// cannot run without it.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let mut cfg: Self = load_yaml(path.as_ref(), "risk");
        if cfg.exit_tiers.is_empty() {
            warn!("risk config has no exit tiers — restoring defaults");
            cfg.exit_tiers = default_exit_tiers();
        }
        cfg
    }

    /// Persist to `path` atomically (write `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self).context("failed to serialise risk config")?;
        let tmp_path = path.with_extension("yaml.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        Ok(())
    }

    /// Find the exit tier row for a given entry market cap.
    pub fn exit_tier_for(&self, entry_mcap_usd: f64) -> &ExitTier {
        self.exit_tiers
            .iter()
            .find(|t| match t.max_entry_mcap_usd {
                Some(bound) => entry_mcap_usd < bound,
                None => true,
            })
            .unwrap_or_else(|| self.exit_tiers.last().expect("exit tier table is non-empty"))
    }

    /// SHA-256 over the canonical serialised config.  POLICY beads carry this
    /// so config drift is visible on-chain.
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};
        let canonical = serde_json::to_string(self).unwrap_or_default();
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}

impl SourcesConfig {
    /// Load from `path`, falling back to defaults on any error.
    pub fn load(path: impl AsRef<Path>) -> Self {
        load_yaml(path.as_ref(), "sources")
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_risk_config_matches_documented_limits() {
        let cfg = RiskConfig::default();
        assert!((cfg.starting_balance_sol - 14.0).abs() < f64::EPSILON);
        assert!((cfg.max_mcap_graduation_usd - 500_000.0).abs() < f64::EPSILON);
        assert!((cfg.max_position_usd_graduation - 30.0).abs() < f64::EPSILON);
        assert!((cfg.human_gate_usd - 100.0).abs() < f64::EPSILON);
        assert_eq!(cfg.slippage_ladder_bps, vec![500, 1500, 4900]);
        assert_eq!(cfg.exit_tiers.len(), 4);
        assert_eq!(cfg.cycle_budget_secs, 120);
    }

    #[test]
    fn exit_tier_selection_by_entry_mcap() {
        let cfg = RiskConfig::default();
        assert_eq!(cfg.exit_tier_for(80_000.0).decay_minutes, 20);
        assert_eq!(cfg.exit_tier_for(200_000.0).decay_minutes, 30);
        assert_eq!(cfg.exit_tier_for(1_500_000.0).decay_minutes, 45);
        assert_eq!(cfg.exit_tier_for(5_000_000.0).decay_minutes, 60);
        // Boundary values fall into the next row up.
        assert_eq!(cfg.exit_tier_for(100_000.0).decay_minutes, 30);
        assert_eq!(cfg.exit_tier_for(2_000_000.0).decay_minutes, 60);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "starting_balance_sol: 7.5\nmax_daily_graduation_plays: 2\n";
        let cfg: RiskConfig = serde_yaml::from_str(yaml).unwrap();
        assert!((cfg.starting_balance_sol - 7.5).abs() < f64::EPSILON);
        assert_eq!(cfg.max_daily_graduation_plays, 2);
        assert!((cfg.daily_loss_halt_pct - 10.0).abs() < f64::EPSILON);
        assert_eq!(cfg.exit_tiers.len(), 4);
    }

    #[test]
    fn sources_config_defaults() {
        let cfg: SourcesConfig = serde_yaml::from_str("{}").unwrap();
        assert!(cfg.jupiter.quote_url.contains("jup.ag"));
        assert!(cfg.rpc.primary_url.contains("solana.com"));
        assert!((cfg.whale.requests_per_second - 5.0).abs() < f64::EPSILON);
        assert_eq!(cfg.whale.timeout_secs, 10);
        assert_eq!(cfg.telegram.token_env_var, "TELEGRAM_BOT_TOKEN");
    }

    #[test]
    fn risk_digest_is_stable() {
        let a = RiskConfig::default();
        let b = RiskConfig::default();
        assert_eq!(a.digest(), b.digest());
        let mut c = RiskConfig::default();
        c.daily_exposure_cap_sol = 3.0;
        assert_ne!(a.digest(), c.digest());
    }
}
