// =============================================================================
// Bead model — immutable flight-recorder events with structural validation
// =============================================================================
//
// A bead is append-only: once `hash_self` is computed nothing may change
// except `merkle_batch_id`, which is backfilled when a batch seals and is
// excluded from the hash pre-image for exactly that reason.
//
// Bi-temporal rules:
//   OBSERVATION — both world-time bounds required, from <= to.
//   PATTERN     — world-time bounds forbidden.
//   DERIVED     — bounds optional; if both present, from <= to.
//
// All timestamps are UNIX epoch seconds.  Canonical JSON (sorted keys, no
// whitespace) is the hash pre-image, minus `hash_self`, `hash_prev`, and
// `merkle_batch_id`.
// =============================================================================

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{PlayType, Recommendation, RejectionCategory};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BeadError {
    #[error("OBSERVATION beads require both world-time bounds")]
    ObservationMissingBounds,

    #[error("PATTERN beads must not carry world-time bounds")]
    PatternHasBounds,

    #[error("world_time_valid_from {from} is after world_time_valid_to {to}")]
    InvertedBounds { from: i64, to: i64 },

    #[error("lineage is empty (only root FACT beads may have no parents)")]
    EmptyLineage,

    #[error("PROPOSAL_REJECTED requires a non-empty rejection reason")]
    EmptyRejectionReason,

    #[error("RISK_BREACH rejections require rejection_policy_ref")]
    MissingPolicyRef,

    #[error("database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("attestation error: {0}")]
    Attestation(String),
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BeadType {
    Fact,
    Claim,
    Signal,
    Proposal,
    ProposalRejected,
    Skill,
    ModelVersion,
    Policy,
    Autopsy,
    Heartbeat,
}

impl std::fmt::Display for BeadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Fact => "FACT",
            Self::Claim => "CLAIM",
            Self::Signal => "SIGNAL",
            Self::Proposal => "PROPOSAL",
            Self::ProposalRejected => "PROPOSAL_REJECTED",
            Self::Skill => "SKILL",
            Self::ModelVersion => "MODEL_VERSION",
            Self::Policy => "POLICY",
            Self::Autopsy => "AUTOPSY",
            Self::Heartbeat => "HEARTBEAT",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for BeadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FACT" => Ok(Self::Fact),
            "CLAIM" => Ok(Self::Claim),
            "SIGNAL" => Ok(Self::Signal),
            "PROPOSAL" => Ok(Self::Proposal),
            "PROPOSAL_REJECTED" => Ok(Self::ProposalRejected),
            "SKILL" => Ok(Self::Skill),
            "MODEL_VERSION" => Ok(Self::ModelVersion),
            "POLICY" => Ok(Self::Policy),
            "AUTOPSY" => Ok(Self::Autopsy),
            "HEARTBEAT" => Ok(Self::Heartbeat),
            other => Err(format!("unknown bead type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemporalClass {
    Observation,
    Pattern,
    Derived,
}

impl std::fmt::Display for TemporalClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Observation => "OBSERVATION",
            Self::Pattern => "PATTERN",
            Self::Derived => "DERIVED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TemporalClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OBSERVATION" => Ok(Self::Observation),
            "PATTERN" => Ok(Self::Pattern),
            "DERIVED" => Ok(Self::Derived),
            other => Err(format!("unknown temporal class: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BeadStatus {
    Active,
    Superseded,
    Retracted,
}

impl std::fmt::Display for BeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::Superseded => "SUPERSEDED",
            Self::Retracted => "RETRACTED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for BeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "SUPERSEDED" => Ok(Self::Superseded),
            "RETRACTED" => Ok(Self::Retracted),
            other => Err(format!("unknown bead status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Supporting structs
// ---------------------------------------------------------------------------

/// Where the recorded knowledge came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_type: String,
    pub source_id: String,
    pub source_version: String,
}

impl SourceRef {
    pub fn internal(id: &str) -> Self {
        Self {
            source_type: "internal".to_string(),
            source_id: id.to_string(),
            source_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn provider(name: &str) -> Self {
        Self {
            source_type: "provider".to_string(),
            source_id: name.to_string(),
            source_version: "v1".to_string(),
        }
    }
}

/// Who signed this bead, with what code and model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub air_node_id: String,
    pub code_hash: String,
    #[serde(default)]
    pub model_hash: Option<String>,
    pub ecdsa_sig: String,
    /// Reserved for a post-quantum co-signature; always null today.
    #[serde(default)]
    pub pqc_sig: Option<String>,
}

// ---------------------------------------------------------------------------
// Content payloads (tagged by bead type)
// ---------------------------------------------------------------------------

/// Type-specific payload.  The variant fixes the `bead_type`; the two are
/// never allowed to drift apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BeadContent {
    Fact {
        source: String,
        summary: String,
        #[serde(default)]
        metrics: serde_json::Value,
    },
    Claim {
        text: String,
        confidence: f64,
    },
    Signal {
        token_mint: String,
        token_symbol: String,
        play_type: PlayType,
        ordering_score: u32,
        permission_score: u32,
        recommendation: Recommendation,
    },
    Proposal {
        token_mint: String,
        token_symbol: String,
        play_type: PlayType,
        position_size_sol: f64,
        ordering_score: u32,
        permission_score: u32,
        /// "auto" for direct execution, "escalated" when the human gate fired.
        gate: String,
        reasoning: String,
    },
    ProposalRejected {
        token_mint: String,
        token_symbol: String,
        rejection_category: RejectionCategory,
        rejection_reason: String,
        #[serde(default)]
        rejection_policy_ref: Option<String>,
        /// "scoring" or "execution".
        rejection_source: String,
        ordering_score: u32,
        permission_score: u32,
    },
    Skill {
        name: String,
        version: String,
        description: String,
    },
    ModelVersion {
        model_name: String,
        model_hash: String,
    },
    Policy {
        config_digest: String,
        summary: String,
    },
    Autopsy {
        token_mint: String,
        token_symbol: String,
        entry_sol: f64,
        sol_received: f64,
        realized_pnl_sol: f64,
        hold_minutes: u64,
        exit_reason: String,
    },
    Heartbeat {
        cycle_seq: u64,
        pot_sol: f64,
        open_positions: u32,
        summary: String,
        halted: bool,
        observe_only: bool,
        #[serde(default)]
        paper_marks: serde_json::Value,
    },
}

impl BeadContent {
    pub fn bead_type(&self) -> BeadType {
        match self {
            Self::Fact { .. } => BeadType::Fact,
            Self::Claim { .. } => BeadType::Claim,
            Self::Signal { .. } => BeadType::Signal,
            Self::Proposal { .. } => BeadType::Proposal,
            Self::ProposalRejected { .. } => BeadType::ProposalRejected,
            Self::Skill { .. } => BeadType::Skill,
            Self::ModelVersion { .. } => BeadType::ModelVersion,
            Self::Policy { .. } => BeadType::Policy,
            Self::Autopsy { .. } => BeadType::Autopsy,
            Self::Heartbeat { .. } => BeadType::Heartbeat,
        }
    }

    /// Mint this content is about, for the indexed `token_mint` column.
    pub fn token_mint(&self) -> Option<&str> {
        match self {
            Self::Signal { token_mint, .. }
            | Self::Proposal { token_mint, .. }
            | Self::ProposalRejected { token_mint, .. }
            | Self::Autopsy { token_mint, .. } => Some(token_mint),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Bead
// ---------------------------------------------------------------------------

/// One immutable event record.  Construct with [`Bead::draft`], which
/// validates; the chain assigns `hash_prev`, `hash_self`, and the
/// attestation at insert time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bead {
    /// UUID v7 — time-ordered, not a content hash.
    pub bead_id: String,
    pub bead_type: BeadType,
    pub temporal_class: TemporalClass,
    pub world_time_valid_from: Option<i64>,
    pub world_time_valid_to: Option<i64>,
    pub knowledge_time_recorded_at: i64,
    pub source_ref: SourceRef,
    /// Parent bead ids, in order.  Non-empty except for root FACTs.
    pub lineage: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub content: BeadContent,
    #[serde(default)]
    pub hash_self: Option<String>,
    #[serde(default)]
    pub hash_prev: Option<String>,
    #[serde(default)]
    pub merkle_batch_id: Option<String>,
    #[serde(default)]
    pub attestation: Option<Attestation>,
    pub status: BeadStatus,
}

/// Everything needed to draft a bead, before the chain stamps it.
pub struct BeadDraft {
    pub temporal_class: TemporalClass,
    pub world_time_valid_from: Option<i64>,
    pub world_time_valid_to: Option<i64>,
    /// Filled with the insert time when `None`.
    pub knowledge_time_recorded_at: Option<i64>,
    pub source_ref: SourceRef,
    pub lineage: Vec<String>,
    pub tags: Vec<String>,
    pub content: BeadContent,
}

impl Bead {
    /// Validate a draft and mint an unhashed bead.  `now` supplies the
    /// knowledge time when the draft has none.
    pub fn draft(draft: BeadDraft, now: i64) -> Result<Self, BeadError> {
        let bead_type = draft.content.bead_type();

        // Temporal-class rules.
        match draft.temporal_class {
            TemporalClass::Observation => {
                let (from, to) = match (draft.world_time_valid_from, draft.world_time_valid_to) {
                    (Some(f), Some(t)) => (f, t),
                    _ => return Err(BeadError::ObservationMissingBounds),
                };
                if from > to {
                    return Err(BeadError::InvertedBounds { from, to });
                }
            }
            TemporalClass::Pattern => {
                if draft.world_time_valid_from.is_some() || draft.world_time_valid_to.is_some() {
                    return Err(BeadError::PatternHasBounds);
                }
            }
            TemporalClass::Derived => {
                if let (Some(from), Some(to)) =
                    (draft.world_time_valid_from, draft.world_time_valid_to)
                {
                    if from > to {
                        return Err(BeadError::InvertedBounds { from, to });
                    }
                }
            }
        }

        // Lineage: only root FACTs may be parentless.
        if draft.lineage.is_empty() && bead_type != BeadType::Fact {
            return Err(BeadError::EmptyLineage);
        }

        // Rejection-category requirements.
        if let BeadContent::ProposalRejected {
            rejection_reason,
            rejection_category,
            rejection_policy_ref,
            ..
        } = &draft.content
        {
            if rejection_reason.trim().is_empty() {
                return Err(BeadError::EmptyRejectionReason);
            }
            if *rejection_category == RejectionCategory::RiskBreach
                && rejection_policy_ref.is_none()
            {
                return Err(BeadError::MissingPolicyRef);
            }
        }

        Ok(Self {
            bead_id: Uuid::now_v7().to_string(),
            bead_type,
            temporal_class: draft.temporal_class,
            world_time_valid_from: draft.world_time_valid_from,
            world_time_valid_to: draft.world_time_valid_to,
            knowledge_time_recorded_at: draft.knowledge_time_recorded_at.unwrap_or(now),
            source_ref: draft.source_ref,
            lineage: draft.lineage,
            tags: draft.tags,
            content: draft.content,
            hash_self: None,
            hash_prev: None,
            merkle_batch_id: None,
            attestation: None,
            status: BeadStatus::Active,
        })
    }

    /// Canonical JSON pre-image: the full bead minus `hash_self`,
    /// `hash_prev`, `merkle_batch_id`, and `attestation`, serialised with
    /// sorted keys and no whitespace (serde_json's map is key-ordered).
    /// The attestation signs this hash, so it cannot be part of it.
    pub fn canonical_preimage(&self) -> Result<String, BeadError> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("hash_self");
            obj.remove("hash_prev");
            obj.remove("merkle_batch_id");
            obj.remove("attestation");
        }
        Ok(serde_json::to_string(&value)?)
    }

    /// SHA-256 of the canonical pre-image, hex-encoded.
    pub fn compute_hash(&self) -> Result<String, BeadError> {
        let preimage = self.canonical_preimage()?;
        Ok(hex::encode(Sha256::digest(preimage.as_bytes())))
    }
}
