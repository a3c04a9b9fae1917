use axum::async_trait;
use serde_json::Value;
use tracing::info;

pub const TEMPLATE_USER_WELCOME: &str = "user_welcome";
pub const TEMPLATE_PASSWORD_RESET: &str = "token_password_reset";

/// Outbound notification channel. `data` may carry token plaintexts and must
/// not be logged by implementations.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipient: &str, template: &str, data: Value) -> anyhow::Result<()>;
}

/// Mailer that only records the delivery attempt in the log.
#[derive(Debug, Clone, Default)]
pub struct LogMailer {
    pub sender: String,
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, recipient: &str, template: &str, _data: Value) -> anyhow::Result<()> {
        info!(sender = %self.sender, %recipient, %template, "email dispatched");
        Ok(())
    }
}

#[cfg(test)]
pub use recording::RecordingMailer;
