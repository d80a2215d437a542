// =============================================================================
// ChadBoar Heartbeat Core — Main Entry Point
// =============================================================================
//
// Invoked fresh by an external scheduler (cron or similar): runs exactly one
// heartbeat cycle and exits.  All durable state lives under CHADBOAR_HOME;
// nothing persists in-process between cycles.
//
// Trading requires both CHADBOAR_WALLET_PUBKEY and SIGNER_KEYPAIR_PATH; with
// either missing the engine runs observe-only (scores, beads, reports — no
// swaps).  The private key itself never enters this process.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod beads;
mod config;
mod exec;
mod heartbeat;
mod scoring;
mod sources;
mod state;
mod telegram;
mod types;
mod watchdog;

use std::path::PathBuf;

use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{RiskConfig, SourcesConfig};
use crate::exec::{JupiterClient, RpcClient, SignerBoundary, SwapExecutor};
use crate::heartbeat::Heartbeat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let workspace = PathBuf::from(
        std::env::var("CHADBOAR_HOME").unwrap_or_else(|_| ".".to_string()),
    );
    info!(workspace = %workspace.display(), "🐗 ChadBoar heartbeat starting");

    let risk = RiskConfig::load(workspace.join("config").join("risk.yaml"));
    let sources = SourcesConfig::load(workspace.join("config").join("sources.yaml"));

    // ── 2. Execution path (optional) ─────────────────────────────────────
    let executor = build_executor(&workspace, &sources);
    if executor.is_none() {
        warn!("no wallet/signer configured — running observe-only");
    }

    // ── 3. One cycle ─────────────────────────────────────────────────────
    let engine = Heartbeat::new(&workspace, risk, &sources, executor);
    let result = engine.run(Utc::now()).await;

    info!(
        cycle_seq = result.cycle_seq,
        halted = result.halted,
        observe_only = result.observe_only,
        scored = result.funnel.scored,
        executed = result.funnel.auto_executed,
        exits = result.funnel.exits_fired,
        errors = result.errors.len(),
        "cycle complete"
    );
    for cycle_error in &result.errors {
        warn!(stage = %cycle_error.stage, "{}", cycle_error.message);
    }

    if result.halted {
        error!(
            reason = result.halt_reason.as_deref().unwrap_or("unknown"),
            "cycle halted"
        );
        std::process::exit(2);
    }
    Ok(())
}

/// Wire the swap path when the wallet pubkey and signer key are both
/// configured.  The signer binary is expected next to ours unless
/// CHADBOAR_SIGNER_BIN overrides it.
fn build_executor(workspace: &std::path::Path, sources: &SourcesConfig) -> Option<SwapExecutor> {
    let wallet_pubkey = std::env::var("CHADBOAR_WALLET_PUBKEY").ok()?;
    let keypair_path = std::env::var("SIGNER_KEYPAIR_PATH").ok()?;

    let signer_bin = std::env::var("CHADBOAR_SIGNER_BIN").unwrap_or_else(|_| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.join("chadboar-signer")))
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "chadboar-signer".to_string())
    });

    Some(SwapExecutor::new(
        JupiterClient::new(&sources.jupiter),
        RpcClient::new(&sources.rpc),
        SignerBoundary::new(
            &signer_bin,
            &keypair_path,
            &workspace.to_string_lossy(),
        ),
        &wallet_pubkey,
    ))
}
