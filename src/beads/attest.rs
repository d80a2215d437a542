// =============================================================================
// Bead attestation — ECDSA secp256r1 signatures over hash_self
// =============================================================================
//
// Each node holds a long-lived P-256 signing key on disk (32-byte scalar,
// hex).  Every bead's `hash_self` is signed at insert time; verification
// walks the chain with only the public key.  The `pqc_sig` slot stays null
// until a post-quantum co-signature scheme is wired in.
// =============================================================================

use std::path::Path;

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::model::{Attestation, BeadError};

/// Signing identity for this agent process.
pub struct NodeIdentity {
    pub air_node_id: String,
    signing_key: SigningKey,
    code_hash: String,
    model_hash: Option<String>,
}

impl NodeIdentity {
    /// Load the node key from `path`, generating and persisting a fresh one
    /// if the file does not exist yet.
    pub fn load_or_create(path: impl AsRef<Path>, air_node_id: &str) -> Result<Self, BeadError> {
        let path = path.as_ref();

        let signing_key = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| BeadError::Attestation(format!("read {}: {e}", path.display())))?;
            let bytes = hex::decode(content.trim())
                .map_err(|e| BeadError::Attestation(format!("decode node key: {e}")))?;
            SigningKey::from_slice(&bytes)
                .map_err(|e| BeadError::Attestation(format!("invalid node key: {e}")))?
        } else {
            warn!(path = %path.display(), "no attestation key found — generating");
            let key = SigningKey::random(&mut rand::rngs::OsRng);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| BeadError::Attestation(format!("mkdir for node key: {e}")))?;
            }
            std::fs::write(path, hex::encode(key.to_bytes()))
                .map_err(|e| BeadError::Attestation(format!("write node key: {e}")))?;
            key
        };

        let identity = Self {
            air_node_id: air_node_id.to_string(),
            signing_key,
            code_hash: code_hash(),
            model_hash: std::env::var("CHADBOAR_MODEL_HASH").ok(),
        };
        info!(node = %identity.air_node_id, code_hash = %identity.code_hash, "attestation identity ready");
        Ok(identity)
    }

    /// Ephemeral identity for tests and dry runs.
    pub fn ephemeral(air_node_id: &str) -> Self {
        Self {
            air_node_id: air_node_id.to_string(),
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
            code_hash: code_hash(),
            model_hash: None,
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        *self.signing_key.verifying_key()
    }

    /// Sign a bead's hash_self (hex string) and build the attestation block.
    pub fn attest(&self, hash_self: &str) -> Result<Attestation, BeadError> {
        let digest = hex::decode(hash_self)
            .map_err(|e| BeadError::Attestation(format!("hash_self is not hex: {e}")))?;
        let signature: Signature = self.signing_key.sign(&digest);
        Ok(Attestation {
            air_node_id: self.air_node_id.clone(),
            code_hash: self.code_hash.clone(),
            model_hash: self.model_hash.clone(),
            ecdsa_sig: hex::encode(signature.to_der()),
            pqc_sig: None,
        })
    }
}

/// Check one attestation signature against a hash_self.
pub fn verify_signature(
    verifying_key: &VerifyingKey,
    hash_self: &str,
    ecdsa_sig_hex: &str,
) -> bool {
    let digest = match hex::decode(hash_self) {
        Ok(d) => d,
        Err(_) => return false,
    };
    let der = match hex::decode(ecdsa_sig_hex) {
        Ok(d) => d,
        Err(_) => return false,
    };
    let signature = match Signature::from_der(&der) {
        Ok(s) => s,
        Err(_) => return false,
    };
    verifying_key.verify(&digest, &signature).is_ok()
}

/// Build-identity digest recorded on every bead.
fn code_hash() -> String {
    let build_id = concat!(env!("CARGO_PKG_NAME"), "@", env!("CARGO_PKG_VERSION"));
    hex::encode(Sha256::digest(build_id.as_bytes()))
}
