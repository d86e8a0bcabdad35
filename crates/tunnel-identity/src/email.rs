//! Outbound mail seam
//!
//! Delivery is best-effort: one attempt, failures logged and surfaced as
//! `DependencyDown`. The console mailer stands in during development and
//! tests.

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tunnel_common::{sanitize_log, CoreError, CoreResult, Settings};

/// Transport for verification and reset codes
pub trait Mailer: Send + Sync {
    /// Send a verification code
    fn send_verification(&self, to: &str, code: &str) -> CoreResult<()>;

    /// Send a password reset code
    fn send_password_reset(&self, to: &str, code: &str) -> CoreResult<()>;
}

/// Development mailer that logs instead of sending
pub struct ConsoleMailer;

impl Mailer for ConsoleMailer {
    fn send_verification(&self, to: &str, code: &str) -> CoreResult<()> {
        tracing::info!(to = %sanitize_log(to), code, "verification code (console mailer)");
        Ok(())
    }

    fn send_password_reset(&self, to: &str, code: &str) -> CoreResult<()> {
        tracing::info!(to = %sanitize_log(to), code, "password reset code (console mailer)");
        Ok(())
    }
}

/// SMTP relay mailer
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: String,
}

impl SmtpMailer {
    /// Build a relay transport from settings
    pub fn new(settings: &Settings) -> CoreResult<Self> {
        let transport = SmtpTransport::relay(&settings.smtp_host)
            .map_err(|e| CoreError::DependencyDown(format!("smtp transport: {e}")))?
            .port(settings.smtp_port)
            .credentials(Credentials::new(
                settings.smtp_user.clone(),
                settings.smtp_password.clone(),
            ))
            .build();
        Ok(Self {
            transport,
            from: settings.email_from.clone(),
        })
    }

    fn send(&self, to: &str, subject: &str, body: String) -> CoreResult<()> {
        let message = Message::builder()
            .from(self.from.parse().map_err(|_| {
                CoreError::Internal(format!("invalid from address {}", self.from))
            })?)
            .to(to
                .parse()
                .map_err(|_| CoreError::InvalidInput("malformed email address".into()))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| CoreError::Internal(format!("mail build failed: {e}")))?;

        self.transport.send(&message).map_err(|e| {
            tracing::warn!(error = %e, "mail delivery failed");
            CoreError::DependencyDown("email transport unavailable, try again later".into())
        })?;
        Ok(())
    }
}

impl Mailer for SmtpMailer {
    fn send_verification(&self, to: &str, code: &str) -> CoreResult<()> {
        let body = format!(
            "Your verification code is: {code}\n\n\
             Enter this code to verify your email address.\n\n\
             If you didn't request this, you can safely ignore this email.",
        );
        self.send(to, "Your verification code", body)
    }

    fn send_password_reset(&self, to: &str, code: &str) -> CoreResult<()> {
        let body = format!(
            "Your password reset code is: {code}\n\n\
             Enter this code to reset your password.\n\n\
             If you didn't request this, you can safely ignore this email.",
        );
        self.send(to, "Password reset code", body)
    }
}
