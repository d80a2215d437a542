// =============================================================================
// chadboar-signer — isolated transaction signer
// =============================================================================
//
// Protocol: one base64-encoded unsigned VersionedTransaction on stdin, one
// base64-encoded signed transaction on stdout.  Exit 0 on success; any
// failure prints a structured error line to stderr (never key material) and
// exits 1.
//
// The keypair comes from SIGNER_KEYPAIR_PATH (solana-keygen JSON format).
// Files with group/other permission bits are refused.  This process makes
// no network connections and holds the key for milliseconds.
// =============================================================================

use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;

fn main() {
    if let Err(e) = run() {
        // Structured single-line error; the parent parses stderr.
        eprintln!("{{\"error\":\"{}\"}}", e.to_string().replace('"', "'"));
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let keypair_path = std::env::var("SIGNER_KEYPAIR_PATH")
        .context("SIGNER_KEYPAIR_PATH not set")?;
    let keypair = load_keypair(Path::new(&keypair_path))?;

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read unsigned transaction from stdin")?;
    let unsigned_b64 = input.trim();
    if unsigned_b64.is_empty() {
        bail!("no transaction on stdin");
    }

    let tx_bytes = BASE64
        .decode(unsigned_b64)
        .context("stdin is not valid base64")?;
    let mut tx: VersionedTransaction =
        bincode::deserialize(&tx_bytes).context("payload is not a VersionedTransaction")?;

    // Sign the message and splice the signature into the fee-payer slot.
    let message_bytes = tx.message.serialize();
    let signature = keypair.sign_message(&message_bytes);
    if tx.signatures.is_empty() {
        tx.signatures.push(signature);
    } else {
        tx.signatures[0] = signature;
    }

    let signed_bytes =
        bincode::serialize(&tx).context("failed to serialise signed transaction")?;
    println!("{}", BASE64.encode(signed_bytes));
    Ok(())
}

/// Load a solana-keygen JSON keypair, refusing world-readable files.
fn load_keypair(path: &Path) -> Result<Keypair> {
    if !path.exists() {
        bail!("keypair file not found: {}", path.display());
    }

    let mode = std::fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .permissions()
        .mode()
        & 0o777;
    if mode & 0o077 != 0 {
        bail!(
            "keypair file {} has mode {:o}; require 0400 or 0600",
            path.display(),
            mode
        );
    }

    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let bytes: Vec<u8> =
        serde_json::from_str(&data).context("keypair file is not a JSON byte array")?;
    Keypair::from_bytes(&bytes).context("invalid keypair bytes")
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_keypair(dir: &Path, mode: u32) -> std::path::PathBuf {
        let keypair = Keypair::new();
        let path = dir.join("signer.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap().as_bytes())
            .unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(mode);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn loads_strict_mode_keypair() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_keypair(dir.path(), 0o600);
        assert!(load_keypair(&path).is_ok());

        let path = write_keypair(dir.path(), 0o400);
        assert!(load_keypair(&path).is_ok());
    }

    #[test]
    fn refuses_permissive_keypair() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_keypair(dir.path(), 0o644);
        let err = load_keypair(&path).unwrap_err();
        assert!(err.to_string().contains("mode"));
    }

    #[test]
    fn missing_keypair_is_an_error() {
        let err = load_keypair(Path::new("/nonexistent/signer.json")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
