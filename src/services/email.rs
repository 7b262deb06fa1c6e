//! Email service for out-of-band security notices
//!
//! Fire-and-forget from the auth flow's perspective: a delivery failure is
//! logged and never blocks or fails the primary operation. When SMTP is not
//! configured the notice is skipped.

use anyhow::{anyhow, Result};
use lettre::{
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::SmtpConfig;

/// Email service for sending security notices
pub struct EmailService {
    config: Option<SmtpConfig>,
}

impl EmailService {
    pub fn new(config: Option<SmtpConfig>) -> Self {
        Self { config }
    }

    /// Whether a transport is configured
    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    /// Send an email. Errors are returned to the caller; the fire-and-forget
    /// wrappers below log and swallow them.
    pub async fn send_email(&self, to: &str, subject: &str, body_html: &str) -> Result<()> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| anyhow!("SMTP not configured"))?;

        let from = format!("{} <{}>", config.from_name, config.from);
        let email = Message::builder()
            .from(from.parse().map_err(|e| anyhow!("Invalid from address: {}", e))?)
            .to(to.parse().map_err(|e| anyhow!("Invalid to address: {}", e))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body_html.to_string())
            .map_err(|e| anyhow!("Failed to build email: {}", e))?;

        let creds = Credentials::new(config.username.clone(), config.password.clone());

        let mailer: AsyncSmtpTransport<Tokio1Executor> =
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| anyhow!("Failed to create SMTP transport: {}", e))?
                .credentials(creds)
                .port(config.port)
                .build();

        mailer
            .send(email)
            .await
            .map_err(|e| anyhow!("Failed to send email: {}", e))?;

        Ok(())
    }

    /// Notify an account that it was locked. Never fails the caller.
    pub async fn send_lockout_notice(&self, to: &str, minutes: i64) {
        if !self.is_configured() {
            return;
        }
        let body = format!(
            "<p>Your Journeo account was temporarily locked after repeated failed \
             sign-in attempts.</p><p>You can try again in {} minutes. If this \
             wasn't you, please reset your password.</p>",
            minutes
        );
        if let Err(e) = self.send_email(to, "Your account was locked", &body).await {
            tracing::warn!(to, "failed to send lockout notice: {}", e);
        }
    }

    /// Notify an account that its password changed. Never fails the caller.
    pub async fn send_password_change_notice(&self, to: &str) {
        if !self.is_configured() {
            return;
        }
        let body = "<p>The password for your Journeo account was just changed.</p>\
                    <p>If this wasn't you, contact support immediately.</p>";
        if let Err(e) = self.send_email(to, "Your password was changed", body).await {
            tracing::warn!(to, "failed to send password change notice: {}", e);
        }
    }
}
