// =============================================================================
// Rug warden — token safety checks feeding the scorer's veto gate
// =============================================================================
//
// Six checks per token.  Checks 1–5 come from the provider's contract report;
// check 6 (honeypot sell simulation) is not implemented yet and is pinned to
// Unknown, which can contribute a WARN but never a FAIL.
//
// Verdict derivation:
//   any critical check failed          -> FAIL
//   any warn, or unknown critical check -> WARN
//   otherwise                          -> PASS
// (an unknown advisory check — the honeypot stub — does not degrade PASS)
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{get_json, http_client, with_retries, DataSourceError, TokenBucket};
use crate::config::ProviderConfig;
use crate::types::WardenVerdict;

/// Outcome of one safety check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Passed,
    Warned,
    Failed,
    Unknown,
}

/// One named check with its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenCheck {
    pub name: String,
    pub outcome: CheckOutcome,
    /// Critical checks can fail the whole verdict; advisory ones cannot.
    pub critical: bool,
    pub detail: String,
}

/// Full safety report with the derived verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenReport {
    pub token_mint: String,
    pub verdict: WardenVerdict,
    pub checks: Vec<WardenCheck>,
    pub observed_at: i64,
}

/// Rate-limited client for the contract-safety provider.
pub struct WardenClient {
    client: reqwest::Client,
    base_url: String,
    bucket: Arc<TokenBucket>,
    max_retries: u32,
}

impl WardenClient {
    pub fn new(cfg: &ProviderConfig) -> Self {
        Self {
            client: http_client(cfg.timeout_secs),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            bucket: Arc::new(TokenBucket::new("warden", cfg.requests_per_second, cfg.burst)),
            max_retries: cfg.max_retries,
        }
    }

    /// Run the full check battery for one mint.
    pub async fn check(&self, mint: &str) -> Result<WardenReport, DataSourceError> {
        let url = format!("{}/v1/report/{}", self.base_url, mint);
        let body = with_retries("warden", self.max_retries, || async {
            self.bucket.acquire().await;
            get_json(&self.client, &url).await
        })
        .await?;

        let report = build_report(mint, &body)?;
        debug!(mint, verdict = %report.verdict, "warden report built");
        Ok(report)
    }
}

fn bool_check(
    body: &serde_json::Value,
    field: &str,
    name: &str,
    critical: bool,
    expect: bool,
    detail_ok: &str,
    detail_bad: &str,
) -> WardenCheck {
    let outcome = match body.get(field).and_then(|v| v.as_bool()) {
        Some(v) if v == expect => CheckOutcome::Passed,
        Some(_) => {
            if critical {
                CheckOutcome::Failed
            } else {
                CheckOutcome::Warned
            }
        }
        None => CheckOutcome::Unknown,
    };
    WardenCheck {
        name: name.to_string(),
        outcome,
        critical,
        detail: match outcome {
            CheckOutcome::Passed => detail_ok.to_string(),
            CheckOutcome::Unknown => "not reported".to_string(),
            _ => detail_bad.to_string(),
        },
    }
}

/// Build the six-check report from the provider's contract scan.
pub fn build_report(
    mint: &str,
    body: &serde_json::Value,
) -> Result<WardenReport, DataSourceError> {
    let observed_at = body
        .get("observed_at")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| DataSourceError::Decode("missing observed_at".to_string()))?;

    let mut checks = vec![
        bool_check(
            body,
            "mint_authority_revoked",
            "mint_authority",
            true,
            true,
            "mint authority revoked",
            "deployer can still mint supply",
        ),
        bool_check(
            body,
            "freeze_authority_revoked",
            "freeze_authority",
            true,
            true,
            "freeze authority revoked",
            "deployer can freeze holders",
        ),
        bool_check(
            body,
            "lp_locked",
            "lp_lock",
            true,
            true,
            "LP locked or burned",
            "LP can be pulled",
        ),
    ];

    // Top-holder concentration: > 30 % fails, > 15 % warns.
    let top_holder_pct = body
        .get("top_holder_pct")
        .and_then(|v| v.as_f64())
        .unwrap_or(f64::NAN);
    let concentration = if top_holder_pct.is_nan() {
        (CheckOutcome::Unknown, "not reported".to_string())
    } else if top_holder_pct > 30.0 {
        (CheckOutcome::Failed, format!("top holder owns {top_holder_pct:.1}%"))
    } else if top_holder_pct > 15.0 {
        (CheckOutcome::Warned, format!("top holder owns {top_holder_pct:.1}%"))
    } else {
        (CheckOutcome::Passed, format!("top holder owns {top_holder_pct:.1}%"))
    };
    checks.push(WardenCheck {
        name: "holder_concentration".to_string(),
        outcome: concentration.0,
        critical: true,
        detail: concentration.1,
    });

    // Deployer history: prior rugs fail, prior abandonments warn.
    let prior_rugs = body.get("deployer_prior_rugs").and_then(|v| v.as_u64());
    let deployer = match prior_rugs {
        Some(0) => (CheckOutcome::Passed, "clean deployer history".to_string()),
        Some(n) => (CheckOutcome::Failed, format!("deployer has {n} prior rugs")),
        None => (CheckOutcome::Unknown, "not reported".to_string()),
    };
    checks.push(WardenCheck {
        name: "deployer_history".to_string(),
        outcome: deployer.0,
        critical: true,
        detail: deployer.1,
    });

    // TODO(warden#6): replace with a dry-run sell simulation once the quoter
    // supports simulated routes; until then this cannot fail a token.
    checks.push(WardenCheck {
        name: "honeypot_simulation".to_string(),
        outcome: CheckOutcome::Unknown,
        critical: false,
        detail: "sell simulation not implemented".to_string(),
    });

    let verdict = derive_verdict(&checks);
    Ok(WardenReport {
        token_mint: mint.to_string(),
        verdict,
        checks,
        observed_at,
    })
}

/// Fold check outcomes into the tri-state verdict.
pub fn derive_verdict(checks: &[WardenCheck]) -> WardenVerdict {
    if checks
        .iter()
        .any(|c| c.critical && c.outcome == CheckOutcome::Failed)
    {
        return WardenVerdict::Fail;
    }
    if checks.iter().any(|c| {
        c.outcome == CheckOutcome::Warned || (c.critical && c.outcome == CheckOutcome::Unknown)
    }) {
        return WardenVerdict::Warn;
    }
    WardenVerdict::Pass
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn clean_body() -> serde_json::Value {
        serde_json::json!({
            "mint_authority_revoked": true,
            "freeze_authority_revoked": true,
            "lp_locked": true,
            "top_holder_pct": 8.0,
            "deployer_prior_rugs": 0,
            "observed_at": 1700000000
        })
    }

    #[test]
    fn clean_token_passes_despite_stubbed_honeypot() {
        let report = build_report("Mint1", &clean_body()).unwrap();
        assert_eq!(report.verdict, WardenVerdict::Pass);
        let honeypot = report
            .checks
            .iter()
            .find(|c| c.name == "honeypot_simulation")
            .unwrap();
        assert_eq!(honeypot.outcome, CheckOutcome::Unknown);
        assert!(!honeypot.critical);
    }

    #[test]
    fn live_mint_authority_fails() {
        let mut body = clean_body();
        body["mint_authority_revoked"] = serde_json::json!(false);
        let report = build_report("Mint1", &body).unwrap();
        assert_eq!(report.verdict, WardenVerdict::Fail);
    }

    #[test]
    fn holder_concentration_ladder() {
        let mut body = clean_body();
        body["top_holder_pct"] = serde_json::json!(40.0);
        assert_eq!(build_report("M", &body).unwrap().verdict, WardenVerdict::Fail);

        body["top_holder_pct"] = serde_json::json!(20.0);
        assert_eq!(build_report("M", &body).unwrap().verdict, WardenVerdict::Warn);
    }

    #[test]
    fn prior_rugs_fail() {
        let mut body = clean_body();
        body["deployer_prior_rugs"] = serde_json::json!(2);
        let report = build_report("Mint1", &body).unwrap();
        assert_eq!(report.verdict, WardenVerdict::Fail);
        assert!(report
            .checks
            .iter()
            .any(|c| c.detail.contains("2 prior rugs")));
    }

    #[test]
    fn honeypot_stub_alone_never_degrades() {
        let checks = vec![WardenCheck {
            name: "honeypot_simulation".to_string(),
            outcome: CheckOutcome::Unknown,
            critical: false,
            detail: String::new(),
        }];
        assert_eq!(derive_verdict(&checks), WardenVerdict::Pass);

        // An unknown critical check still degrades to WARN.
        let critical_unknown = vec![WardenCheck {
            name: "lp_lock".to_string(),
            outcome: CheckOutcome::Unknown,
            critical: true,
            detail: String::new(),
        }];
        assert_eq!(derive_verdict(&critical_unknown), WardenVerdict::Warn);
    }
}
