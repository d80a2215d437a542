// =============================================================================
// Signer boundary — subprocess isolation for the trading keypair
// =============================================================================
//
// The orchestrator never touches key material.  Signing spawns
// `chadboar-signer` with a scrubbed environment (PATH, CHADBOAR_HOME, and
// the key path only — none of the orchestrator's API credentials), pipes
// the base64 unsigned transaction to stdin, and reads the base64 signed
// transaction from stdout.  The child has ten seconds; stderr carries a
// structured error and never the key.
// =============================================================================

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::SwapError;

/// Wall-clock limit for one signing round-trip.
const SIGNER_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the external signer.  Holds paths only; a fresh subprocess is
/// spawned per trade and nothing persists between signs.
#[derive(Debug, Clone)]
pub struct SignerBoundary {
    signer_bin: String,
    keypair_path: String,
    workspace: String,
}

impl SignerBoundary {
    pub fn new(signer_bin: &str, keypair_path: &str, workspace: &str) -> Self {
        Self {
            signer_bin: signer_bin.to_string(),
            keypair_path: keypair_path.to_string(),
            workspace: workspace.to_string(),
        }
    }

    /// Sign a base64 unsigned transaction; returns the base64 signed
    /// transaction.
    pub async fn sign(&self, unsigned_tx_b64: &str) -> Result<String, SwapError> {
        let mut child = Command::new(&self.signer_bin)
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("CHADBOAR_HOME", &self.workspace)
            .env("SIGNER_KEYPAIR_PATH", &self.keypair_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SwapError::Signing(format!("failed to spawn signer: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SwapError::Signing("signer stdin unavailable".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SwapError::Signing("signer stdout unavailable".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| SwapError::Signing("signer stderr unavailable".to_string()))?;

        let result = tokio::time::timeout(SIGNER_TIMEOUT, async {
            stdin
                .write_all(unsigned_tx_b64.as_bytes())
                .await
                .map_err(|e| SwapError::Signing(format!("signer stdin write failed: {e}")))?;
            stdin
                .write_all(b"\n")
                .await
                .map_err(|e| SwapError::Signing(format!("signer stdin write failed: {e}")))?;
            drop(stdin);

            let mut out = String::new();
            stdout
                .read_to_string(&mut out)
                .await
                .map_err(|e| SwapError::Signing(format!("signer stdout read failed: {e}")))?;

            let mut err = String::new();
            let _ = stderr.read_to_string(&mut err).await;

            let status = child
                .wait()
                .await
                .map_err(|e| SwapError::Signing(format!("signer wait failed: {e}")))?;

            if !status.success() {
                warn!(
                    code = status.code().unwrap_or(-1),
                    stderr = %err.trim(),
                    "signer subprocess failed"
                );
                return Err(SwapError::Signing(format!(
                    "signer exited {}: {}",
                    status.code().unwrap_or(-1),
                    err.trim()
                )));
            }

            let signed = out.trim().to_string();
            if signed.is_empty() {
                return Err(SwapError::Signing("signer produced no output".to_string()));
            }
            Ok(signed)
        })
        .await;

        match result {
            Ok(inner) => {
                if inner.is_ok() {
                    debug!("transaction signed by subprocess");
                }
                inner
            }
            Err(_) => Err(SwapError::Signing(format!(
                "signer timed out after {SIGNER_TIMEOUT:?}"
            ))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    // The signer binary is exercised end-to-end in its own integration
    // environment; here we pin the subprocess contract using /bin/cat as a
    // stand-in echo signer.

    #[tokio::test]
    async fn echo_signer_round_trip() {
        let boundary = SignerBoundary::new("/bin/cat", "/dev/null", "/tmp");
        let signed = boundary.sign("dGVzdC10eA==").await.unwrap();
        assert_eq!(signed, "dGVzdC10eA==");
    }

    #[tokio::test]
    async fn missing_binary_is_signing_error() {
        let boundary = SignerBoundary::new("/nonexistent/signer", "/dev/null", "/tmp");
        let err = boundary.sign("dGVzdA==").await.unwrap_err();
        assert!(matches!(err, SwapError::Signing(_)));
    }

    #[tokio::test]
    async fn failing_child_reports_stderr() {
        // `false` exits 1 with no output.
        let boundary = SignerBoundary::new("/bin/false", "/dev/null", "/tmp");
        let err = boundary.sign("dGVzdA==").await.unwrap_err();
        match err {
            SwapError::Signing(msg) => assert!(msg.contains("exited")),
            other => panic!("expected Signing, got {other:?}"),
        }
    }
}
