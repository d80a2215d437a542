// =============================================================================
// Merkle batching — anchor-sized commitments over bead hashes
// =============================================================================
//
// A batch is a binary Merkle tree over the `hash_self` values of the beads it
// covers, in chain order.  Odd nodes are paired with themselves.  The root is
// what eventually lands on-chain; anchoring itself is best-effort and never
// blocks a cycle.
// =============================================================================

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What fired the batch seal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MerkleTrigger {
    /// A SIGNAL or PROPOSAL landed since the last anchor.
    DecisionBoundary,
    /// Unanchored bead count reached the cap.
    MaxBeads,
    /// Too long since the last anchor.
    MaxTime,
}

impl std::fmt::Display for MerkleTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DecisionBoundary => "DECISION_BOUNDARY",
            Self::MaxBeads => "MAX_BEADS",
            Self::MaxTime => "MAX_TIME",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MerkleTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DECISION_BOUNDARY" => Ok(Self::DecisionBoundary),
            "MAX_BEADS" => Ok(Self::MaxBeads),
            "MAX_TIME" => Ok(Self::MaxTime),
            other => Err(format!("unknown merkle trigger: {other}")),
        }
    }
}

/// A sealed batch row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleBatch {
    pub batch_id: String,
    pub merkle_root: String,
    pub bead_count: u32,
    pub trigger_type: MerkleTrigger,
    pub trigger_bead_id: Option<String>,
    pub created_at: i64,
    /// Filled in by the external anchoring step, if it ever runs.
    pub anchor_tx: Option<String>,
}

/// Unanchored-bead count that forces a seal.
pub const MAX_UNANCHORED_BEADS: usize = 500;

/// Seconds since the last anchor that force a seal.
pub const MAX_ANCHOR_AGE_SECS: i64 = 3600;

/// Compute the Merkle root over an ordered list of hex-encoded hashes.
/// Same ordered input always produces the same root.  Empty input has no
/// root; a single leaf is its own root.
pub fn merkle_root(leaf_hashes: &[String]) -> Option<String> {
    if leaf_hashes.is_empty() {
        return None;
    }

    let mut level: Vec<Vec<u8>> = leaf_hashes
        .iter()
        .map(|h| hex::decode(h).unwrap_or_else(|_| Sha256::digest(h.as_bytes()).to_vec()))
        .collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(&pair[0]);
            // Odd leaf pairs with itself.
            hasher.update(pair.get(1).unwrap_or(&pair[0]));
            next.push(hasher.finalize().to_vec());
        }
        level = next;
    }

    Some(hex::encode(&level[0]))
}
