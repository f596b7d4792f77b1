use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid mail configuration: {0}")]
    Config(String),

    #[error("invalid email address: {0}")]
    Address(String),

    #[error("send failed: {0}")]
    Send(String),
}

#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
    pub from_name: String,
}

impl MailerConfig {
    /// Reads `PARLEY_SMTP_*`. Returns `None` when no host is configured —
    /// the server then runs in dev mode and logs OTP codes instead of
    /// sending mail.
    pub fn from_env() -> Result<Option<Self>, MailError> {
        let Ok(host) = std::env::var("PARLEY_SMTP_HOST") else {
            return Ok(None);
        };

        let port = std::env::var("PARLEY_SMTP_PORT")
            .unwrap_or_else(|_| "587".into())
            .parse()
            .map_err(|_| MailError::Config("PARLEY_SMTP_PORT must be a port number".into()))?;

        let from_address = std::env::var("PARLEY_SMTP_FROM")
            .map_err(|_| MailError::Config("PARLEY_SMTP_FROM is required".into()))?;

        Ok(Some(Self {
            host,
            port,
            username: std::env::var("PARLEY_SMTP_USERNAME").ok(),
            password: std::env::var("PARLEY_SMTP_PASSWORD").ok(),
            from_address,
            from_name: std::env::var("PARLEY_SMTP_FROM_NAME")
                .unwrap_or_else(|_| "Parley".into()),
        }))
    }
}

/// Async SMTP client for outbound OTP mail. STARTTLS; the connection is made
/// lazily on first send.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl Mailer {
    pub fn new(config: MailerConfig) -> Result<Self, MailError> {
        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_address)
            .parse()
            .map_err(|e| MailError::Address(format!("{e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| MailError::Config(format!("{e}")))?
            .port(config.port);

        if let (Some(username), Some(password)) = (config.username, config.password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    pub async fn send_otp_email(&self, to: &str, otp: &str) -> Result<(), MailError> {
        let to_mailbox: Mailbox = to.parse().map_err(|e| MailError::Address(format!("{e}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject("Your OTP for Parley verification")
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(otp_email_text(otp)),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(otp_email_html(otp)),
                    ),
            )
            .map_err(|e| MailError::Send(format!("failed to build message: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Send(format!("{e}")))?;

        info!("OTP email sent to {}", to);
        Ok(())
    }
}

fn otp_email_text(otp: &str) -> String {
    format!(
        "Parley email verification\n\n\
         Use the following one-time password to verify your email address:\n\n\
         {otp}\n\n\
         This OTP is valid for 10 minutes. If you did not request this, ignore this email.\n"
    )
}

fn otp_email_html(otp: &str) -> String {
    format!(
        r#"<div style="font-family: Arial, sans-serif; color: #333;">
  <h2>Parley email verification</h2>
  <p>Thank you for signing up. Please use the following one-time password (OTP) to verify your email address:</p>
  <p style="font-size: 24px; font-weight: bold; letter-spacing: 2px;">{otp}</p>
  <p>This OTP is valid for 10 minutes. If you did not request this, please ignore this email.</p>
  <hr>
  <p style="font-size: 12px; color: #777;">This is an automated message. Please do not reply.</p>
</div>"#
    )
}
