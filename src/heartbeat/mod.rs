// =============================================================================
// Heartbeat orchestrator — one cycle, end to end
// =============================================================================
//
// Stateless between invocations: an external scheduler calls `run` fresh
// each cycle and everything durable lives in the state file and the bead
// chain.  Stage order is fixed:
//
//   guards → 0 init → 1 watchdog → 1b exits → 2 oracle → 3 narrative →
//   4 score & execute → 5 finalize
//
// The time budget converts overruns into observe-only mode; stage failures
// land in `errors[]` and never abort the cycle.  Finalize ALWAYS runs: it
// re-reads state, advances the heartbeat timestamp, writes the HEARTBEAT
// bead, checks the anchor trigger, regenerates latest.md, and sends the
// report.
// =============================================================================

pub mod context;
pub mod guards;
pub mod report;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::beads::{
    BeadChain, BeadContent, BeadDraft, ChainVerdict, NodeIdentity, SourceRef, TemporalClass,
};
use crate::config::{RiskConfig, SourcesConfig};
use crate::exec::SwapExecutor;
use crate::scoring::{decide, EdgeBank, GateContext, SignalBundle};
use crate::sources::{
    PriceClient, PulseCandidate, PulseClient, SourceHealth, VolumeClient, VolumeSpike,
    WardenClient, WhaleClient, WhaleFlow,
};
use crate::state::{PortfolioState, Position, StateFile};
use crate::telegram::Messenger;
use crate::types::{AlertTier, PlayType, Recommendation, RejectionCategory};
use crate::watchdog::{evaluate_position, ExitDecision, ExitExecutor};

use context::{CycleClock, CycleResult};
use guards::{GuardOutcome, ZombieLock};

/// Token age to assume when no provider reports one; old enough that the
/// fresh-token veto cannot misfire on unknown candidates.
const UNKNOWN_TOKEN_AGE_SECS: u64 = 86_400;

/// Node identity label stamped into every attestation.
const AIR_NODE_ID: &str = "chadboar-air-1";

/// The heartbeat engine.  Cheap to construct; all persistence is external.
pub struct Heartbeat {
    workspace: PathBuf,
    risk: RiskConfig,
    state_file: StateFile,
    messenger: Messenger,
    whale: WhaleClient,
    volume: VolumeClient,
    pulse: PulseClient,
    price: PriceClient,
    warden: WardenClient,
    executor: Option<SwapExecutor>,
    edge_bank: EdgeBank,
}

/// Per-mint merge of everything the fan-out stages produced.
#[derive(Default)]
struct CandidateInputs {
    whale: Option<WhaleFlow>,
    volume: Option<VolumeSpike>,
    pulse: Option<PulseCandidate>,
}

impl Heartbeat {
    pub fn new(
        workspace: impl Into<PathBuf>,
        risk: RiskConfig,
        sources: &SourcesConfig,
        executor: Option<SwapExecutor>,
    ) -> Self {
        let workspace = workspace.into();
        let state_file = StateFile::new(workspace.join("state").join("portfolio.json"));
        let edge_bank = EdgeBank::load(workspace.join("state").join("edge_bank.json"));
        Self {
            state_file,
            messenger: Messenger::new(&sources.telegram),
            whale: WhaleClient::new(&sources.whale),
            volume: VolumeClient::new(&sources.volume),
            pulse: PulseClient::new(&sources.pulse),
            price: PriceClient::new(&sources.price),
            warden: WardenClient::new(&sources.warden),
            executor,
            edge_bank,
            risk,
            workspace,
        }
    }

    fn chain_path(&self) -> PathBuf {
        self.workspace.join("beads").join("chain.db")
    }

    /// Run one full cycle.
    pub async fn run(&self, now: DateTime<Utc>) -> CycleResult {
        let clock = CycleClock::new(self.risk.cycle_budget_secs);
        let mut result = CycleResult::default();
        let epoch = now.timestamp();

        // The chain and the signing identity open once per cycle.
        let identity = match NodeIdentity::load_or_create(
            self.workspace.join("state").join("node.key"),
            AIR_NODE_ID,
        ) {
            Ok(identity) => identity,
            Err(e) => {
                result.push_error("init", format!("attestation identity unavailable: {e}"));
                result.halted = true;
                result.halt_reason = Some("attestation identity unavailable".to_string());
                return result;
            }
        };
        let mut chain = match BeadChain::open(self.chain_path(), identity) {
            Ok(chain) => chain,
            Err(e) => {
                result.push_error("init", format!("bead chain unavailable: {e}"));
                result.halted = true;
                result.halt_reason = Some("bead chain unavailable".to_string());
                return result;
            }
        };

        // First boot: materialise state and the chain's root FACT.
        if let Err(e) = self.ensure_initialised(&mut chain, now) {
            result.push_error("init", e.to_string());
            result.halted = true;
            result.halt_reason = Some("initialisation failed".to_string());
            return result;
        }

        result.cycle_seq = match chain.head(crate::beads::BeadType::Heartbeat) {
            Ok(Some(bead)) => match bead.content {
                BeadContent::Heartbeat { cycle_seq, .. } => cycle_seq + 1,
                _ => 1,
            },
            _ => 1,
        };

        // --- Guard cascade ----------------------------------------------------

        if let GuardOutcome::Halted(reason) = guards::check_killswitch(&self.workspace) {
            return self.halt_cycle(&mut chain, result, reason, now).await;
        }

        let _cycle_lock = match ZombieLock::acquire(&self.workspace, now) {
            Ok(lock) => lock,
            Err(GuardOutcome::Halted(reason)) => {
                // Another cycle is live; do not touch its chain or state.
                warn!(reason = %reason, "zombie gateway refused the cycle");
                result.halted = true;
                result.halt_reason = Some(reason.clone());
                self.messenger.send(AlertTier::Warning, &reason).await;
                return result;
            }
            Err(GuardOutcome::Proceed) => unreachable!("acquire never yields Proceed errors"),
        };

        for warning in guards::session_health(&self.workspace) {
            result.push_error("session_health", warning);
        }

        match chain.verify_chain() {
            Ok(ChainVerdict::Clean) | Ok(ChainVerdict::Unanchored) => {}
            Ok(ChainVerdict::Tampered(reason)) => {
                // Availability over safety: scream, then keep flying.
                result.push_error("chain_verify", reason.clone());
                self.messenger
                    .send(AlertTier::Critical, &format!("bead chain TAMPERED: {reason}"))
                    .await;
            }
            Err(e) => result.push_error("chain_verify", e.to_string()),
        }

        let mut state = match self.state_file.load() {
            Ok(mut state) => {
                state.maybe_reset_daily(now);
                state
            }
            Err(e) => {
                result.push_error("state", format!("unrecoverable state: {e}"));
                self.messenger
                    .send(AlertTier::Critical, "portfolio state unrecoverable — halting")
                    .await;
                result.halted = true;
                result.halt_reason = Some("state unrecoverable".to_string());
                return result;
            }
        };

        if let GuardOutcome::Halted(reason) = guards::check_drawdown(&state, &self.risk) {
            state.halt(reason.clone(), now);
            let _ = self.state_file.store(&state);
            return self.halt_cycle(&mut chain, result, reason, now).await;
        }
        if let GuardOutcome::Halted(reason) = guards::check_risk(&state, &self.risk) {
            return self.halt_cycle(&mut chain, result, reason, now).await;
        }
        let _ = self.state_file.store(&state);

        // --- Stage 0: init context beads -------------------------------------

        if let Err(e) = self.stage_policy_beads(&mut chain, epoch) {
            result.push_error("init_context", e.to_string());
        }

        // --- Stage 1 / 1b: watchdog and exits ---------------------------------

        let mut paper_marks = serde_json::Value::Null;
        if clock.exhausted() {
            result.observe_only = true;
        } else {
            let exit_decisions = self.stage_watchdog(&state, &mut result, now).await;
            result.funnel.exits_fired = exit_decisions.len() as u32;

            if !exit_decisions.is_empty() && !result.observe_only {
                self.stage_exits(&mut chain, exit_decisions, &mut result, now)
                    .await;
            }
        }

        // --- Stage 2 / 3: oracle and narrative fan-out ------------------------

        let mut candidates: BTreeMap<String, CandidateInputs> = BTreeMap::new();
        let mut sol_price_usd = self.risk.sol_price_usd_fallback;

        if clock.exhausted() {
            result.observe_only = true;
        } else {
            sol_price_usd = self
                .stage_oracle(&mut chain, &mut candidates, &mut result, epoch)
                .await;
            self.stage_narrative(&mut chain, &mut candidates, &mut result, epoch)
                .await;
        }

        // --- Stage 4: score & execute ----------------------------------------

        if clock.exhausted() {
            result.observe_only = true;
        } else if !candidates.is_empty() {
            paper_marks = self
                .stage_score_and_execute(
                    &mut chain,
                    candidates,
                    sol_price_usd,
                    &clock,
                    &mut result,
                    now,
                )
                .await;
        }

        // --- Stage 5: finalize (always) ---------------------------------------

        self.stage_finalize(&mut chain, paper_marks, &mut result, now)
            .await;
        result
    }

    // -------------------------------------------------------------------------
    // Initialisation
    // -------------------------------------------------------------------------

    fn ensure_initialised(&self, chain: &mut BeadChain, now: DateTime<Utc>) -> Result<()> {
        if !self.state_file.path().exists() {
            info!(
                starting_balance_sol = self.risk.starting_balance_sol,
                "initialising portfolio state"
            );
            self.state_file
                .store(&PortfolioState::new(self.risk.starting_balance_sol, now))?;
        }

        if chain.count().context("bead count")? == 0 {
            let epoch = now.timestamp();
            chain
                .append(
                    BeadDraft {
                        temporal_class: TemporalClass::Observation,
                        world_time_valid_from: Some(epoch),
                        world_time_valid_to: Some(epoch),
                        knowledge_time_recorded_at: None,
                        source_ref: SourceRef::internal("boot"),
                        lineage: Vec::new(),
                        tags: vec!["genesis".to_string()],
                        content: BeadContent::Fact {
                            source: "boot".to_string(),
                            summary: "agent initialised".to_string(),
                            metrics: serde_json::Value::Null,
                        },
                    },
                    epoch,
                )
                .context("genesis bead")?;
        }
        Ok(())
    }

    /// POLICY on config change, MODEL_VERSION on model swap.
    fn stage_policy_beads(&self, chain: &mut BeadChain, epoch: i64) -> Result<()> {
        let digest = self.risk.digest();
        let current = match chain.head(crate::beads::BeadType::Policy)? {
            Some(bead) => match bead.content {
                BeadContent::Policy { config_digest, .. } => Some(config_digest),
                _ => None,
            },
            None => None,
        };
        if current.as_deref() != Some(digest.as_str()) {
            let parent = self.any_parent(chain)?;
            chain.append(
                BeadDraft {
                    temporal_class: TemporalClass::Pattern,
                    world_time_valid_from: None,
                    world_time_valid_to: None,
                    knowledge_time_recorded_at: None,
                    source_ref: SourceRef::internal("config"),
                    lineage: vec![parent],
                    tags: vec!["policy".to_string()],
                    content: BeadContent::Policy {
                        config_digest: digest,
                        summary: "risk config active".to_string(),
                    },
                },
                epoch,
            )?;
        }

        let model_name =
            std::env::var("CHADBOAR_MODEL").unwrap_or_else(|_| "unspecified".to_string());
        let model_hash = std::env::var("CHADBOAR_MODEL_HASH").unwrap_or_else(|_| "none".to_string());
        let recorded = match chain.head(crate::beads::BeadType::ModelVersion)? {
            Some(bead) => match bead.content {
                BeadContent::ModelVersion {
                    model_name: name, ..
                } => Some(name),
                _ => None,
            },
            None => None,
        };
        if recorded.as_deref() != Some(model_name.as_str()) {
            let parent = self.any_parent(chain)?;
            chain.append(
                BeadDraft {
                    temporal_class: TemporalClass::Pattern,
                    world_time_valid_from: None,
                    world_time_valid_to: None,
                    knowledge_time_recorded_at: None,
                    source_ref: SourceRef::internal("model"),
                    lineage: vec![parent],
                    tags: vec!["model".to_string()],
                    content: BeadContent::ModelVersion {
                        model_name,
                        model_hash,
                    },
                },
                epoch,
            )?;
        }
        Ok(())
    }

    /// Lineage anchor for system beads: the latest FACT (the genesis FACT
    /// exists from initialisation onward).
    fn any_parent(&self, chain: &BeadChain) -> Result<String> {
        Ok(chain
            .head(crate::beads::BeadType::Fact)?
            .map(|bead| bead.bead_id)
            .context("no FACT bead to anchor lineage")?)
    }

    // -------------------------------------------------------------------------
    // Stage 1: watchdog
    // -------------------------------------------------------------------------

    async fn stage_watchdog(
        &self,
        state: &PortfolioState,
        result: &mut CycleResult,
        now: DateTime<Utc>,
    ) -> Vec<ExitDecision> {
        let mut decisions = Vec::new();

        for position in &state.positions {
            let market = match self.price.fetch_token(&position.token_mint).await {
                Ok(market) => Some(market),
                Err(e) => {
                    result.push_error(
                        "watchdog",
                        format!("price fetch for {} failed: {e}", position.token_mint),
                    );
                    None
                }
            };

            let verdict = evaluate_position(position, market.as_ref(), &self.risk, now);

            // Persist the peak before anything else can interleave.
            if (verdict.new_peak_market_cap_usd - position.peak_market_cap_usd).abs() > f64::EPSILON
            {
                let mint = position.token_mint.clone();
                let new_peak = verdict.new_peak_market_cap_usd;
                let update = self.state_file.update(move |s| {
                    if let Some(p) = s.positions.iter_mut().find(|p| p.token_mint == mint) {
                        p.peak_market_cap_usd = p.peak_market_cap_usd.max(new_peak);
                    }
                    Ok(())
                });
                if let Err(e) = update {
                    result.push_error("watchdog", format!("peak update failed: {e}"));
                }
            }

            if let Some(decision) = verdict.decision {
                info!(
                    mint = %decision.token_mint,
                    kind = %decision.kind,
                    urgency = %decision.urgency,
                    pnl_pct = decision.pnl_pct,
                    "exit decision"
                );
                decisions.push(decision);
            }
        }
        decisions
    }

    // -------------------------------------------------------------------------
    // Stage 1b: exit executor
    // -------------------------------------------------------------------------

    async fn stage_exits(
        &self,
        chain: &mut BeadChain,
        decisions: Vec<ExitDecision>,
        result: &mut CycleResult,
        now: DateTime<Utc>,
    ) {
        let executor = match &self.executor {
            Some(executor) => executor,
            None => {
                result.push_error("exits", "no swap executor configured — exits deferred");
                return;
            }
        };
        let runner = ExitExecutor::new(executor, &self.state_file, &self.risk);

        for decision in decisions {
            match runner.execute(&decision).await {
                Ok(outcome) => {
                    if let Some(error) = &outcome.error {
                        result.push_error("exits", format!("{}: {error}", decision.token_mint));
                        continue;
                    }
                    result.exit_summaries.push(format!(
                        "{} {} ({:.1}%)",
                        decision.token_symbol, decision.kind, decision.pnl_pct
                    ));

                    // One AUTOPSY per closed trade.
                    if let (Some(pnl), Some(position)) =
                        (outcome.realized_pnl_sol, outcome.removed_position)
                    {
                        if let Err(e) = self.append_autopsy(chain, &position, pnl, &decision, now) {
                            result.push_error("exits", format!("autopsy bead failed: {e}"));
                        }
                    }
                }
                Err(e) => result.push_error("exits", e.to_string()),
            }
        }
    }

    fn append_autopsy(
        &self,
        chain: &mut BeadChain,
        position: &Position,
        realized_pnl_sol: f64,
        decision: &ExitDecision,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let parent = self.any_parent(chain)?;
        chain.append(
            BeadDraft {
                temporal_class: TemporalClass::Observation,
                world_time_valid_from: Some(position.entry_time.timestamp()),
                world_time_valid_to: Some(now.timestamp()),
                knowledge_time_recorded_at: None,
                source_ref: SourceRef::internal("exit_executor"),
                lineage: vec![parent],
                tags: vec!["autopsy".to_string()],
                content: BeadContent::Autopsy {
                    token_mint: position.token_mint.clone(),
                    token_symbol: position.token_symbol.clone(),
                    entry_sol: position.entry_amount_sol,
                    sol_received: position.entry_amount_sol + realized_pnl_sol,
                    realized_pnl_sol,
                    hold_minutes: position.age_minutes(now),
                    exit_reason: decision.kind.to_string(),
                },
            },
            now.timestamp(),
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Stage 2: oracle fan-out
    // -------------------------------------------------------------------------

    async fn stage_oracle(
        &self,
        chain: &mut BeadChain,
        candidates: &mut BTreeMap<String, CandidateInputs>,
        result: &mut CycleResult,
        epoch: i64,
    ) -> f64 {
        let (flows, sol_price) =
            tokio::join!(self.whale.fetch_flows(), self.price.fetch_sol_price());

        let sol_price_usd = match sol_price {
            Ok(price) => {
                result.source_health.push(SourceHealth::ok("price", 1));
                price
            }
            Err(e) => {
                result.push_error("oracle", format!("sol price: {e}"));
                result.source_health.push(SourceHealth::down("price", e.to_string()));
                self.risk.sol_price_usd_fallback
            }
        };

        match flows {
            Ok(flows) => {
                result.funnel.whale_flows = flows.len() as u32;
                result
                    .source_health
                    .push(SourceHealth::ok("whale", flows.len() as u32));
                if let Err(e) = self.append_source_fact(
                    chain,
                    "whale",
                    &format!("{} whale flows", flows.len()),
                    serde_json::json!({"count": flows.len()}),
                    epoch,
                ) {
                    result.push_error("oracle", e.to_string());
                }
                for flow in flows {
                    let mint = flow.token_mint.clone();
                    candidates.entry(mint).or_default().whale = Some(flow);
                }
            }
            Err(e) => {
                result.push_error("oracle", format!("whale flows: {e}"));
                result.source_health.push(SourceHealth::down("whale", e.to_string()));
            }
        }

        sol_price_usd
    }

    // -------------------------------------------------------------------------
    // Stage 3: narrative fan-out
    // -------------------------------------------------------------------------

    async fn stage_narrative(
        &self,
        chain: &mut BeadChain,
        candidates: &mut BTreeMap<String, CandidateInputs>,
        result: &mut CycleResult,
        epoch: i64,
    ) {
        let (spikes, pulses) =
            tokio::join!(self.volume.fetch_spikes(), self.pulse.fetch_candidates());

        match spikes {
            Ok(spikes) => {
                result.funnel.volume_spikes = spikes.len() as u32;
                result
                    .source_health
                    .push(SourceHealth::ok("volume", spikes.len() as u32));
                if let Err(e) = self.append_source_fact(
                    chain,
                    "volume",
                    &format!("{} volume spikes", spikes.len()),
                    serde_json::json!({"count": spikes.len()}),
                    epoch,
                ) {
                    result.push_error("narrative", e.to_string());
                }
                for spike in spikes {
                    let mint = spike.token_mint.clone();
                    candidates.entry(mint).or_default().volume = Some(spike);
                }
            }
            Err(e) => {
                result.push_error("narrative", format!("volume spikes: {e}"));
                result.source_health.push(SourceHealth::down("volume", e.to_string()));
            }
        }

        match pulses {
            Ok(pulses) => {
                result.funnel.pulse_candidates = pulses.len() as u32;
                result
                    .source_health
                    .push(SourceHealth::ok("pulse", pulses.len() as u32));
                if let Err(e) = self.append_source_fact(
                    chain,
                    "pulse",
                    &format!("{} graduation candidates", pulses.len()),
                    serde_json::json!({"count": pulses.len()}),
                    epoch,
                ) {
                    result.push_error("narrative", e.to_string());
                }
                for pulse in pulses {
                    let mint = pulse.token_mint.clone();
                    candidates.entry(mint).or_default().pulse = Some(pulse);
                }
            }
            Err(e) => {
                result.push_error("narrative", format!("pulse candidates: {e}"));
                result.source_health.push(SourceHealth::down("pulse", e.to_string()));
            }
        }
    }

    /// One FACT summary per source per cycle.
    fn append_source_fact(
        &self,
        chain: &mut BeadChain,
        source: &str,
        summary: &str,
        metrics: serde_json::Value,
        epoch: i64,
    ) -> Result<String> {
        let bead = chain.append(
            BeadDraft {
                temporal_class: TemporalClass::Observation,
                world_time_valid_from: Some(epoch),
                world_time_valid_to: Some(epoch),
                knowledge_time_recorded_at: None,
                source_ref: SourceRef::provider(source),
                lineage: Vec::new(),
                tags: vec![source.to_string()],
                content: BeadContent::Fact {
                    source: source.to_string(),
                    summary: summary.to_string(),
                    metrics,
                },
            },
            epoch,
        )?;
        Ok(bead.bead_id)
    }

    // -------------------------------------------------------------------------
    // Stage 4: score & execute
    // -------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn stage_score_and_execute(
        &self,
        chain: &mut BeadChain,
        candidates: BTreeMap<String, CandidateInputs>,
        sol_price_usd: f64,
        clock: &CycleClock,
        result: &mut CycleResult,
        now: DateTime<Utc>,
    ) -> serde_json::Value {
        let epoch = now.timestamp();
        let mut paper_marks = Vec::new();

        let oracle_healthy = result
            .source_health
            .iter()
            .any(|h| h.name == "whale" && h.healthy);
        let narrative_healthy = result
            .source_health
            .iter()
            .any(|h| h.name == "volume" && h.healthy);
        let pulse_healthy = result
            .source_health
            .iter()
            .any(|h| h.name == "pulse" && h.healthy);

        for (mint, inputs) in candidates {
            if clock.exhausted() {
                result.observe_only = true;
                result.push_error("score", "budget exhausted — remaining candidates unscored");
                break;
            }

            // Warden is consulted per candidate; a dark warden scores as None.
            let warden = match self.warden.check(&mint).await {
                Ok(report) => Some(report),
                Err(e) => {
                    result.push_error("score", format!("warden {mint}: {e}"));
                    None
                }
            };

            // Entry snapshot: pulse data wins, the price provider fills gaps.
            let (entry_mcap, entry_liquidity, token_age) = match &inputs.pulse {
                Some(pulse) => (
                    pulse.market_cap_usd,
                    pulse.liquidity_usd,
                    pulse.token_age_secs,
                ),
                None => match self.price.fetch_token(&mint).await {
                    Ok(market) => (
                        market.market_cap_usd,
                        market.liquidity_usd,
                        UNKNOWN_TOKEN_AGE_SECS,
                    ),
                    Err(e) => {
                        result.push_error("score", format!("market for {mint}: {e}"));
                        continue;
                    }
                },
            };

            let token_symbol = inputs
                .pulse
                .as_ref()
                .map(|p| p.token_symbol.clone())
                .or_else(|| inputs.whale.as_ref().map(|w| w.token_symbol.clone()))
                .or_else(|| inputs.volume.as_ref().map(|v| v.token_symbol.clone()))
                .unwrap_or_else(|| mint.chars().take(6).collect());

            let edge_match_pct = inputs
                .volume
                .as_ref()
                .map(|v| self.edge_bank.match_pct(&v.tags))
                .unwrap_or(0.0);

            let bundle = SignalBundle {
                token_mint: mint.clone(),
                token_symbol,
                whale: inputs.whale,
                volume: inputs.volume,
                pulse: inputs.pulse,
                warden,
                edge_match_pct,
                entry_market_cap_usd: entry_mcap,
                entry_liquidity_usd: entry_liquidity,
                token_age_secs: token_age,
                oracle_healthy,
                narrative_healthy,
                pulse_healthy,
            };

            // The gate reads portfolio facts from a fresh snapshot.
            let snapshot = match self.state_file.load() {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    result.push_error("score", format!("state read failed: {e}"));
                    break;
                }
            };
            let gate = GateContext {
                daily_graduation_count: snapshot.daily_graduation_count,
                consecutive_losses: snapshot.consecutive_losses,
                open_entries_for_mint: snapshot.entries_for_mint(&mint),
                pot_sol: snapshot.current_balance_sol,
                sol_price_usd,
                dry_run: snapshot.dry_run_mode,
            };

            let score = decide(&bundle, &gate, &self.risk);
            result.funnel.scored += 1;

            let signal_bead_id = if score.ordering_score > 0 {
                match self.append_signal(chain, &score, epoch) {
                    Ok(id) => Some(id),
                    Err(e) => {
                        result.push_error("score", format!("signal bead: {e}"));
                        None
                    }
                }
            } else {
                None
            };

            match score.recommendation {
                Recommendation::Veto => {
                    result.funnel.vetoed += 1;
                    let category = if score
                        .vetoes_triggered
                        .iter()
                        .any(|v| v.veto_id == "WARDEN_FAIL")
                    {
                        RejectionCategory::WardenVeto
                    } else {
                        RejectionCategory::VetoInvariant
                    };
                    let reason = score
                        .vetoes_triggered
                        .iter()
                        .map(|v| v.reason.clone())
                        .collect::<Vec<_>>()
                        .join("; ");
                    if let Err(e) = self.append_rejection(
                        chain,
                        &score,
                        category,
                        &reason,
                        None,
                        "scoring",
                        signal_bead_id.as_deref(),
                        epoch,
                    ) {
                        result.push_error("score", format!("rejection bead: {e}"));
                    }
                }
                Recommendation::PaperTrade => {
                    paper_marks.push(serde_json::json!({
                        "token_mint": score.token_mint,
                        "permission_score": score.permission_score,
                        "entry_market_cap_usd": entry_mcap,
                    }));
                }
                Recommendation::Discard | Recommendation::Watchlist => {}
                Recommendation::AutoExecute => {
                    self.execute_entry(
                        chain,
                        &score,
                        &snapshot,
                        entry_mcap,
                        entry_liquidity,
                        signal_bead_id.as_deref(),
                        result,
                        now,
                    )
                    .await;
                }
            }

            result.decisions.push(score);
        }

        if paper_marks.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::Value::Array(paper_marks)
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_entry(
        &self,
        chain: &mut BeadChain,
        score: &crate::scoring::ConvictionScore,
        snapshot: &PortfolioState,
        entry_mcap: f64,
        entry_liquidity: f64,
        signal_bead_id: Option<&str>,
        result: &mut CycleResult,
        now: DateTime<Utc>,
    ) {
        let epoch = now.timestamp();
        let size = score.position_size_sol;

        // Daily exposure is a hard policy line.
        if snapshot.daily_exposure_sol + size > self.risk.daily_exposure_cap_sol {
            let reason = format!(
                "daily exposure {:.3} + {size:.3} exceeds cap {:.3}",
                snapshot.daily_exposure_sol, self.risk.daily_exposure_cap_sol
            );
            if let Err(e) = self.append_rejection(
                chain,
                score,
                RejectionCategory::RiskBreach,
                &reason,
                Some("daily_exposure_cap_sol"),
                "scoring",
                signal_bead_id,
                epoch,
            ) {
                result.push_error("execute", format!("rejection bead: {e}"));
            }
            return;
        }

        // Human gate: a PROPOSAL is written either way; only `gate` differs.
        let gate_label = if score.human_gate_required {
            "escalated"
        } else {
            "auto"
        };
        let proposal_id = match self.append_proposal(chain, score, gate_label, signal_bead_id, epoch)
        {
            Ok(id) => id,
            Err(e) => {
                result.push_error("execute", format!("proposal bead: {e}"));
                return;
            }
        };

        if score.human_gate_required {
            self.messenger
                .send(
                    AlertTier::Warning,
                    &format!(
                        "{} {} sized {:.3} SOL needs approval (proposal {})",
                        score.token_symbol, score.play_type, size, proposal_id
                    ),
                )
                .await;
            return;
        }

        let executor = match &self.executor {
            Some(executor) => executor,
            None => {
                let _ = self.append_rejection(
                    chain,
                    score,
                    RejectionCategory::Execution,
                    "no swap executor configured",
                    None,
                    "execution",
                    Some(&proposal_id),
                    epoch,
                );
                return;
            }
        };

        let base_slippage = self.risk.slippage_ladder_bps.first().copied().unwrap_or(500);
        match executor
            .buy_token(&score.token_mint, size, base_slippage)
            .await
        {
            Ok(swap) => {
                result.funnel.auto_executed += 1;
                let play_type = score.play_type;
                let mint = score.token_mint.clone();
                let symbol = score.token_symbol.clone();
                let update = self.state_file.update(move |state| {
                    state.current_balance_sol = (state.current_balance_sol - swap.sol_amount).max(0.0);
                    state.daily_exposure_sol += swap.sol_amount;
                    state.total_trades += 1;
                    if play_type == PlayType::Graduation {
                        state.daily_graduation_count += 1;
                    }
                    state.positions.push(Position {
                        token_mint: mint,
                        token_symbol: symbol,
                        entry_amount_sol: swap.sol_amount,
                        entry_amount_tokens: swap.token_amount,
                        entry_market_cap_usd: entry_mcap,
                        entry_time: now,
                        peak_market_cap_usd: entry_mcap,
                        entry_liquidity_usd: entry_liquidity,
                        play_type,
                        tier1_exited: false,
                        tier2_exited: false,
                    });
                    Ok(())
                });
                if let Err(e) = update {
                    result.push_error("execute", format!("entry state update failed: {e}"));
                }
            }
            Err(e) => {
                result.push_error("execute", format!("{}: {e}", score.token_mint));
                let _ = self.append_rejection(
                    chain,
                    score,
                    RejectionCategory::Execution,
                    &e.to_string(),
                    None,
                    "execution",
                    Some(&proposal_id),
                    epoch,
                );
            }
        }
    }

    // -------------------------------------------------------------------------
    // Stage 5: finalize
    // -------------------------------------------------------------------------

    async fn stage_finalize(
        &self,
        chain: &mut BeadChain,
        paper_marks: serde_json::Value,
        result: &mut CycleResult,
        now: DateTime<Utc>,
    ) {
        // Reconcile against the chain before the timestamp moves.  Drift is
        // reported, never auto-corrected.
        if let Some(executor) = &self.executor {
            match executor.wallet_balance_sol().await {
                Ok(on_chain) => {
                    if let Ok(state) = self.state_file.load() {
                        let gap = (state.current_balance_sol - on_chain).abs();
                        if gap > self.risk.reconcile_tolerance_sol {
                            let text = format!(
                                "balance drift: tracked {:.4} vs on-chain {on_chain:.4} SOL",
                                state.current_balance_sol
                            );
                            result.push_error("reconcile", text.clone());
                            self.messenger.send(AlertTier::Warning, &text).await;
                        }
                    }
                }
                Err(e) => result.push_error("reconcile", e.to_string()),
            }

            // Every tracked position must still exist on chain.
            if let Ok(state) = self.state_file.load() {
                for position in &state.positions {
                    match executor.token_balance(&position.token_mint).await {
                        Ok(0) => {
                            let text = format!(
                                "position {} has zero on-chain balance — manual reconciliation needed",
                                position.token_mint
                            );
                            result.push_error("reconcile", text.clone());
                            self.messenger.send(AlertTier::Warning, &text).await;
                        }
                        Ok(_) => {}
                        Err(e) => result.push_error(
                            "reconcile",
                            format!("token balance for {}: {e}", position.token_mint),
                        ),
                    }
                }
            }
        }

        // Re-read state, advance the heartbeat timestamp, dry-run bookkeeping.
        let mut dry_run_completed = false;
        let finalize_update = self.state_file.update(|state| {
            let heartbeat_time = match state.last_heartbeat_time {
                Some(prev) if prev >= now => prev + ChronoDuration::seconds(1),
                _ => now,
            };
            state.last_heartbeat_time = Some(heartbeat_time);

            if state.dry_run_mode {
                state.dry_run_cycles_completed += 1;
                if state.dry_run_cycles_completed >= state.dry_run_target_cycles {
                    state.dry_run_mode = false;
                    dry_run_completed = true;
                }
            }
            Ok(state.clone())
        });

        let state = match finalize_update {
            Ok(state) => state,
            Err(e) => {
                result.push_error("finalize", format!("state finalize failed: {e}"));
                return;
            }
        };

        if dry_run_completed {
            let parent = self.any_parent(chain).ok();
            if let Some(parent) = parent {
                let _ = chain.append(
                    BeadDraft {
                        temporal_class: TemporalClass::Pattern,
                        world_time_valid_from: None,
                        world_time_valid_to: None,
                        knowledge_time_recorded_at: None,
                        source_ref: SourceRef::internal("config"),
                        lineage: vec![parent],
                        tags: vec!["policy".to_string(), "dry_run".to_string()],
                        content: BeadContent::Policy {
                            config_digest: self.risk.digest(),
                            summary: "dry run complete — live trading enabled".to_string(),
                        },
                    },
                    now.timestamp(),
                );
            }
        }

        // Report lines before the bead so the bead can carry the summary.
        let summary = report::cycle_summary(result);
        result.report_line = report::boar_line(
            result.cycle_seq,
            state.current_balance_sol,
            state.positions.len(),
            &summary,
        );
        result.health_line =
            report::health_line(&result.source_health, &result.funnel, result.errors.len());

        if let Err(e) = self.append_heartbeat(chain, &state, &summary, paper_marks, result, now) {
            result.push_error("finalize", format!("heartbeat bead: {e}"));
        }

        // Anchor trigger, then best-effort external anchoring (not wired).
        match chain.check_anchor_trigger(now.timestamp()) {
            Ok(Some(trigger)) => {
                if let Err(e) = chain.seal_batch(trigger, None, now.timestamp()) {
                    result.push_error("finalize", format!("merkle seal failed: {e}"));
                }
            }
            Ok(None) => {}
            Err(e) => result.push_error("finalize", format!("anchor trigger check: {e}")),
        }

        // latest.md is ours alone to write.
        let md = report::latest_md(&state, result, now);
        if let Err(e) = std::fs::write(self.workspace.join("latest.md"), md) {
            result.push_error("finalize", format!("latest.md write failed: {e}"));
        }

        self.messenger
            .send_report(&result.report_line, &result.health_line)
            .await;
    }

    fn append_heartbeat(
        &self,
        chain: &mut BeadChain,
        state: &PortfolioState,
        summary: &str,
        paper_marks: serde_json::Value,
        result: &CycleResult,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // Lineage-linked to the previous heartbeat; the genesis FACT anchors
        // the first one.
        let parent = match chain.head(crate::beads::BeadType::Heartbeat)? {
            Some(prev) => prev.bead_id,
            None => self.any_parent(chain)?,
        };

        chain.append(
            BeadDraft {
                temporal_class: TemporalClass::Observation,
                world_time_valid_from: Some(now.timestamp()),
                world_time_valid_to: Some(now.timestamp()),
                knowledge_time_recorded_at: None,
                source_ref: SourceRef::internal("heartbeat"),
                lineage: vec![parent],
                tags: vec!["heartbeat".to_string()],
                content: BeadContent::Heartbeat {
                    cycle_seq: result.cycle_seq,
                    pot_sol: state.current_balance_sol,
                    open_positions: state.positions.len() as u32,
                    summary: summary.to_string(),
                    halted: result.halted,
                    observe_only: result.observe_only,
                    paper_marks,
                },
            },
            now.timestamp(),
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Bead helpers
    // -------------------------------------------------------------------------

    fn append_signal(
        &self,
        chain: &mut BeadChain,
        score: &crate::scoring::ConvictionScore,
        epoch: i64,
    ) -> Result<String> {
        // Signals derive from this cycle's FACT summaries.
        let parent = self.any_parent(chain)?;
        let bead = chain.append(
            BeadDraft {
                temporal_class: TemporalClass::Derived,
                world_time_valid_from: None,
                world_time_valid_to: None,
                knowledge_time_recorded_at: None,
                source_ref: SourceRef::internal("scorer"),
                lineage: vec![parent],
                tags: vec!["signal".to_string(), score.play_type.to_string()],
                content: BeadContent::Signal {
                    token_mint: score.token_mint.clone(),
                    token_symbol: score.token_symbol.clone(),
                    play_type: score.play_type,
                    ordering_score: score.ordering_score,
                    permission_score: score.permission_score,
                    recommendation: score.recommendation,
                },
            },
            epoch,
        )?;
        Ok(bead.bead_id)
    }

    fn append_proposal(
        &self,
        chain: &mut BeadChain,
        score: &crate::scoring::ConvictionScore,
        gate: &str,
        signal_bead_id: Option<&str>,
        epoch: i64,
    ) -> Result<String> {
        let parent = match signal_bead_id {
            Some(id) => id.to_string(),
            None => self.any_parent(chain)?,
        };
        let bead = chain.append(
            BeadDraft {
                temporal_class: TemporalClass::Derived,
                world_time_valid_from: None,
                world_time_valid_to: None,
                knowledge_time_recorded_at: None,
                source_ref: SourceRef::internal("decision_gate"),
                lineage: vec![parent],
                tags: vec!["proposal".to_string()],
                content: BeadContent::Proposal {
                    token_mint: score.token_mint.clone(),
                    token_symbol: score.token_symbol.clone(),
                    play_type: score.play_type,
                    position_size_sol: score.position_size_sol,
                    ordering_score: score.ordering_score,
                    permission_score: score.permission_score,
                    gate: gate.to_string(),
                    reasoning: score.reasoning.clone(),
                },
            },
            epoch,
        )?;
        Ok(bead.bead_id)
    }

    #[allow(clippy::too_many_arguments)]
    fn append_rejection(
        &self,
        chain: &mut BeadChain,
        score: &crate::scoring::ConvictionScore,
        category: RejectionCategory,
        reason: &str,
        policy_ref: Option<&str>,
        source: &str,
        parent_bead_id: Option<&str>,
        epoch: i64,
    ) -> Result<String> {
        let parent = match parent_bead_id {
            Some(id) => id.to_string(),
            None => self.any_parent(chain)?,
        };
        let bead = chain.append(
            BeadDraft {
                temporal_class: TemporalClass::Derived,
                world_time_valid_from: None,
                world_time_valid_to: None,
                knowledge_time_recorded_at: None,
                source_ref: SourceRef::internal("decision_gate"),
                lineage: vec![parent],
                tags: vec!["rejection".to_string()],
                content: BeadContent::ProposalRejected {
                    token_mint: score.token_mint.clone(),
                    token_symbol: score.token_symbol.clone(),
                    rejection_category: category,
                    rejection_reason: reason.to_string(),
                    rejection_policy_ref: policy_ref.map(str::to_string),
                    rejection_source: source.to_string(),
                    ordering_score: score.ordering_score,
                    permission_score: score.permission_score,
                },
            },
            epoch,
        )?;
        Ok(bead.bead_id)
    }

    // -------------------------------------------------------------------------
    // Halt path
    // -------------------------------------------------------------------------

    /// Killswitch/drawdown/risk halt: one alert line, a HEARTBEAT bead
    /// recording the halt, the state timestamp, and nothing else.
    async fn halt_cycle(
        &self,
        chain: &mut BeadChain,
        mut result: CycleResult,
        reason: String,
        now: DateTime<Utc>,
    ) -> CycleResult {
        result.halted = true;
        result.halt_reason = Some(reason.clone());

        let state = self
            .state_file
            .update(|state| {
                let heartbeat_time = match state.last_heartbeat_time {
                    Some(prev) if prev >= now => prev + ChronoDuration::seconds(1),
                    _ => now,
                };
                state.last_heartbeat_time = Some(heartbeat_time);
                Ok(state.clone())
            })
            .ok();

        let (pot, open_positions) = state
            .as_ref()
            .map(|s| (s.current_balance_sol, s.positions.len()))
            .unwrap_or((0.0, 0));

        let summary = format!("HALTED: {reason}");
        result.report_line = report::boar_line(result.cycle_seq, pot, open_positions, &summary);
        result.health_line = "halted before source fan-out".to_string();

        if let Some(state) = &state {
            if let Err(e) = self.append_heartbeat(
                chain,
                state,
                &summary,
                serde_json::Value::Null,
                &result,
                now,
            ) {
                result.push_error("halt", format!("heartbeat bead: {e}"));
            }
            let md = report::latest_md(state, &result, now);
            if let Err(e) = std::fs::write(self.workspace.join("latest.md"), md) {
                result.push_error("halt", format!("latest.md write failed: {e}"));
            }
        }

        self.messenger.send(AlertTier::Critical, &result.report_line).await;
        result
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::beads::BeadType;
    use std::path::Path;

    /// Configs pointing at a dead local port so every provider fails fast
    /// and closed.
    fn dead_sources() -> SourcesConfig {
        let mut cfg: SourcesConfig = serde_yaml::from_str("{}").unwrap();
        for provider in [
            &mut cfg.whale,
            &mut cfg.price,
            &mut cfg.volume,
            &mut cfg.pulse,
            &mut cfg.warden,
        ] {
            provider.base_url = "http://127.0.0.1:9".to_string();
            provider.max_retries = 0;
            provider.timeout_secs = 2;
        }
        cfg
    }

    fn heartbeat_in(dir: &Path) -> Heartbeat {
        Heartbeat::new(dir, RiskConfig::default(), &dead_sources(), None)
    }

    fn open_chain(dir: &Path) -> BeadChain {
        // Reuse the cycle's persisted node key so signatures verify.
        let identity =
            NodeIdentity::load_or_create(dir.join("state").join("node.key"), AIR_NODE_ID).unwrap();
        BeadChain::open(dir.join("beads").join("chain.db"), identity).unwrap()
    }

    #[tokio::test]
    async fn degraded_cycle_still_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let hb = heartbeat_in(dir.path());

        let result = hb.run(Utc::now()).await;

        assert!(!result.halted);
        assert_eq!(result.cycle_seq, 1);
        // Every provider failed closed; the cycle degraded, not died.
        assert!(result.errors.iter().any(|e| e.stage == "oracle"));
        assert!(result.errors.iter().any(|e| e.stage == "narrative"));
        assert!(result.report_line.starts_with("🐗 HB #1"));
        assert!(result.report_line.ends_with("OINK"));

        // State initialised and timestamped.
        let state = StateFile::new(dir.path().join("state").join("portfolio.json"))
            .load()
            .unwrap();
        assert!(state.last_heartbeat_time.is_some());
        assert!((state.current_balance_sol - 14.0).abs() < f64::EPSILON);

        // Heartbeat bead written; latest.md regenerated.
        let chain = open_chain(dir.path());
        assert_eq!(chain.by_type(BeadType::Heartbeat, 10).unwrap().len(), 1);
        assert!(dir.path().join("latest.md").exists());
    }

    #[tokio::test]
    async fn consecutive_cycles_link_heartbeats_and_advance_time() {
        let dir = tempfile::tempdir().unwrap();
        let hb = heartbeat_in(dir.path());

        let first = hb.run(Utc::now()).await;
        let state_after_first = StateFile::new(dir.path().join("state").join("portfolio.json"))
            .load()
            .unwrap();
        let t1 = state_after_first.last_heartbeat_time.unwrap();

        let second = hb.run(Utc::now()).await;
        let state_after_second = StateFile::new(dir.path().join("state").join("portfolio.json"))
            .load()
            .unwrap();
        let t2 = state_after_second.last_heartbeat_time.unwrap();

        assert_eq!(first.cycle_seq, 1);
        assert_eq!(second.cycle_seq, 2);
        assert!(t2 > t1, "heartbeat time must strictly increase");

        let chain = open_chain(dir.path());
        let heartbeats = chain.by_type(BeadType::Heartbeat, 10).unwrap();
        assert_eq!(heartbeats.len(), 2);
        // Newest first: its lineage points at the previous heartbeat.
        assert_eq!(heartbeats[0].lineage, vec![heartbeats[1].bead_id.clone()]);
        // And the stream hash-links too.
        assert_eq!(heartbeats[0].hash_prev, heartbeats[1].hash_self);
    }

    #[tokio::test]
    async fn killswitch_halts_with_heartbeat_bead_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(guards::KILLSWITCH_FILE), "").unwrap();
        let hb = heartbeat_in(dir.path());

        let result = hb.run(Utc::now()).await;

        assert!(result.halted);
        assert!(result.report_line.contains("HALTED"));
        assert!(result.report_line.contains("killswitch"));

        let state = StateFile::new(dir.path().join("state").join("portfolio.json"))
            .load()
            .unwrap();
        assert!(state.last_heartbeat_time.is_some());

        let chain = open_chain(dir.path());
        // Exactly the genesis FACT and the halt HEARTBEAT — nothing else.
        assert_eq!(chain.count().unwrap(), 2);
        let heartbeat = &chain.by_type(BeadType::Heartbeat, 10).unwrap()[0];
        match &heartbeat.content {
            BeadContent::Heartbeat { halted, summary, .. } => {
                assert!(halted);
                assert!(summary.contains("killswitch"));
            }
            other => panic!("expected heartbeat content, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn drawdown_halts_and_latches() {
        let dir = tempfile::tempdir().unwrap();
        let hb = heartbeat_in(dir.path());
        // First cycle initialises state.
        hb.run(Utc::now()).await;

        let state_file = StateFile::new(dir.path().join("state").join("portfolio.json"));
        state_file
            .update(|s| {
                s.current_balance_sol = 9.0; // −35.7% from 14
                Ok(())
            })
            .unwrap();

        let result = hb.run(Utc::now()).await;
        assert!(result.halted);
        assert!(result.halt_reason.unwrap().contains("drawdown"));

        let state = state_file.load().unwrap();
        assert!(state.halted);
        assert!(state.halt_reason.unwrap().contains("drawdown"));

        // The latch keeps the next cycle down too, via the risk guard.
        let result = hb.run(Utc::now()).await;
        assert!(result.halted);
    }

    #[tokio::test]
    async fn zero_budget_goes_observe_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut risk = RiskConfig::default();
        risk.cycle_budget_secs = 0;
        let hb = Heartbeat::new(dir.path(), risk, &dead_sources(), None);

        let result = hb.run(Utc::now()).await;

        assert!(!result.halted);
        assert!(result.observe_only);
        // No source fan-out happened.
        assert!(result.source_health.is_empty());
        // But finalize still ran: heartbeat bead + latest.md + timestamp.
        let chain = open_chain(dir.path());
        assert_eq!(chain.by_type(BeadType::Heartbeat, 10).unwrap().len(), 1);
        assert!(dir.path().join("latest.md").exists());
    }

    #[tokio::test]
    async fn latest_md_agrees_with_state_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let hb = heartbeat_in(dir.path());
        hb.run(Utc::now()).await;

        let state = StateFile::new(dir.path().join("state").join("portfolio.json"))
            .load()
            .unwrap();
        let md = std::fs::read_to_string(dir.path().join("latest.md")).unwrap();
        let stamp = state
            .last_heartbeat_time
            .unwrap()
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        assert!(md.contains(&stamp), "latest.md must carry the state's heartbeat time");
    }
}
