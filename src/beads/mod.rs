// =============================================================================
// Bead chain — the flight recorder
// =============================================================================
//
// Append-only, hash-linked, ECDSA-attested event log with bi-temporal
// validation and Merkle-batched anchoring.  Everything consequential the
// agent does lands here; internal scoring steps, retries, and logs do not.
// =============================================================================

pub mod attest;
pub mod chain;
pub mod merkle;
pub mod model;

pub use attest::NodeIdentity;
pub use chain::{BeadChain, ChainVerdict};
pub use merkle::{MerkleBatch, MerkleTrigger};
pub use model::{
    Attestation, Bead, BeadContent, BeadDraft, BeadError, BeadStatus, BeadType, SourceRef,
    TemporalClass,
};
