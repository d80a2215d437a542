// =============================================================================
// Shared types used across the ChadBoar heartbeat engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// How a candidate entered the funnel, which drives scoring weights and caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayType {
    /// Freshly migrated off a bonding curve — short horizon, small size cap.
    Graduation,
    /// Whale-flow driven entry — larger size, stricter permission gate.
    Accumulation,
}

impl std::fmt::Display for PlayType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graduation => write!(f, "graduation"),
            Self::Accumulation => write!(f, "accumulation"),
        }
    }
}

/// Verdict from the rug warden's contract checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WardenVerdict {
    Pass,
    Warn,
    Fail,
}

impl std::fmt::Display for WardenVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Warn => write!(f, "WARN"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// Final recommendation for a scored candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Veto,
    Discard,
    PaperTrade,
    Watchlist,
    AutoExecute,
}

impl Recommendation {
    /// Downgrade one tier (used by the time-mismatch rule). VETO and DISCARD
    /// have nothing below them.
    pub fn downgrade(self) -> Self {
        match self {
            Self::AutoExecute => Self::Watchlist,
            Self::Watchlist => Self::PaperTrade,
            Self::PaperTrade => Self::Discard,
            other => other,
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Veto => write!(f, "VETO"),
            Self::Discard => write!(f, "DISCARD"),
            Self::PaperTrade => write!(f, "PAPER_TRADE"),
            Self::Watchlist => write!(f, "WATCHLIST"),
            Self::AutoExecute => write!(f, "AUTO_EXECUTE"),
        }
    }
}

/// Urgency class of an exit decision. Drives slippage escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitUrgency {
    /// Take-profit and time-decay exits. Fixed slippage.
    Normal,
    /// Trailing stop and liquidity-drop exits. Escalating slippage.
    High,
    /// Stop-loss exits. Escalating slippage, sell at (almost) any price.
    Critical,
}

impl std::fmt::Display for ExitUrgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Message tier prefixes for every outbound alert and report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertTier {
    Critical,
    Warning,
    Info,
    Digest,
}

impl AlertTier {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Critical => "🔴 CRITICAL",
            Self::Warning => "🟡 WARNING",
            Self::Info => "🟢 INFO",
            Self::Digest => "📊 DIGEST",
        }
    }
}

/// Why a proposal never became a trade. Stored on every PROPOSAL_REJECTED
/// bead; the shadow field is filterable by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCategory {
    WardenVeto,
    VetoInvariant,
    ScoreBelowFloor,
    RiskBreach,
    Execution,
    HumanGatePending,
}

impl std::fmt::Display for RejectionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WardenVeto => write!(f, "WARDEN_VETO"),
            Self::VetoInvariant => write!(f, "VETO_INVARIANT"),
            Self::ScoreBelowFloor => write!(f, "SCORE_BELOW_FLOOR"),
            Self::RiskBreach => write!(f, "RISK_BREACH"),
            Self::Execution => write!(f, "EXECUTION"),
            Self::HumanGatePending => write!(f, "HUMAN_GATE_PENDING"),
        }
    }
}

/// The four upstream signal families that can count toward the permission
/// gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimarySource {
    Oracle,
    Narrative,
    Pulse,
    Warden,
}

impl std::fmt::Display for PrimarySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oracle => write!(f, "oracle"),
            Self::Narrative => write!(f, "narrative"),
            Self::Pulse => write!(f, "pulse"),
            Self::Warden => write!(f, "warden"),
        }
    }
}

/// Bonding-curve lifecycle stage reported by the pulse provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseStage {
    Bonding,
    Bonded,
}

impl std::fmt::Display for PulseStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bonding => write!(f, "bonding"),
            Self::Bonded => write!(f, "bonded"),
        }
    }
}
