// =============================================================================
// Telegram messenger — tiered alerts and the per-cycle report
// =============================================================================
//
// Delivery is strictly best-effort: a down bot API degrades observability,
// never the cycle.  The bot token lives in the environment and is read once
// at construction; it is never logged.
// =============================================================================

use tracing::{debug, warn};

use crate::config::TelegramConfig;
use crate::types::AlertTier;

/// Messenger handle.  Without a token it becomes a logger-only no-op, which
/// is what tests and dry runs want.
pub struct Messenger {
    client: reqwest::Client,
    chat_id: String,
    bot_token: Option<String>,
}

impl Messenger {
    pub fn new(cfg: &TelegramConfig) -> Self {
        let bot_token = std::env::var(&cfg.token_env_var).ok().filter(|t| !t.is_empty());
        if bot_token.is_none() {
            debug!(env_var = %cfg.token_env_var, "no telegram token — messages will be logged only");
        }
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client"),
            chat_id: cfg.chat_id.clone(),
            bot_token,
        }
    }

    /// Send one tier-prefixed message.  Never fails the caller.
    pub async fn send(&self, tier: AlertTier, text: &str) {
        let message = format!("{} {}", tier.prefix(), text);

        let token = match &self.bot_token {
            Some(t) => t.clone(),
            None => {
                debug!(message = %message, "telegram (no token)");
                return;
            }
        };

        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": message,
            "disable_web_page_preview": true,
        });

        match self.client.post(&url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("telegram message delivered");
            }
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "telegram rejected message");
            }
            Err(e) => {
                warn!(error = %e, "telegram delivery failed");
            }
        }
    }

    /// The two-line cycle report, sent as a single DIGEST message.
    pub async fn send_report(&self, first_line: &str, health_line: &str) {
        self.send(AlertTier::Digest, &format!("{first_line}\n{health_line}"))
            .await;
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tokenless_messenger_is_a_safe_noop() {
        let cfg = TelegramConfig {
            chat_id: "123".to_string(),
            token_env_var: "CHADBOAR_TEST_MISSING_TOKEN".to_string(),
        };
        let messenger = Messenger::new(&cfg);
        // Must complete without panicking or touching the network.
        messenger.send(AlertTier::Info, "hello").await;
        messenger.send_report("line one", "line two").await;
    }
}
