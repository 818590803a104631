use crate::derived_key;
use async_trait::async_trait;
use dagcore::{Context, Input, Step, StepError, StepId, StepSpec, Value};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

/// Where and how to deliver mail
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    /// Login after STARTTLS; without credentials the session stays plain
    pub credentials: Option<(String, String)>,
    pub timeout: Option<Duration>,
}

impl SmtpConfig {
    pub fn new(server: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, StepError> {
        let builder = match &self.credentials {
            Some((username, password)) => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.server)
                    .map_err(|e| StepError::Configuration(format!("SMTP relay: {}", e)))?
                    .credentials(Credentials::new(username.clone(), password.clone()))
            }
            None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(self.server.as_str()),
        };
        Ok(builder.port(self.port).timeout(self.timeout).build())
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            port: 587,
            credentials: None,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Sends a plain-text email.
///
/// Recipient, subject, body and sender are inputs resolved against the
/// context. Strings may also embed `$path` placeholders, which are replaced
/// by the value at that path; unknown paths are left as written. On success
/// `"Email sent to {to}"` is stored under `{id}_result` and returned.
pub struct EmailStep {
    pub(crate) spec: StepSpec,
    to: Input,
    subject: Input,
    body: Input,
    from: Input,
    smtp: SmtpConfig,
}

impl EmailStep {
    pub fn new(
        id: impl Into<StepId>,
        to: impl Into<Input>,
        subject: impl Into<Input>,
        body: impl Into<Input>,
    ) -> Self {
        Self {
            spec: StepSpec::new(id),
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            from: Input::literal("workflow@localhost.localdomain"),
            smtp: SmtpConfig::default(),
        }
    }

    pub fn with_from(mut self, from: impl Into<Input>) -> Self {
        self.from = from.into();
        self
    }

    pub fn with_smtp(mut self, smtp: SmtpConfig) -> Self {
        self.smtp = smtp;
        self
    }

    fn text(&self, field: &str, input: &Input, ctx: &Context) -> Result<String, StepError> {
        match input.resolve(ctx) {
            Value::Null => Err(StepError::MissingInput(field.to_string())),
            Value::String(s) => Ok(render_template(&s, ctx)),
            other => Ok(other.to_string()),
        }
    }

    fn mailbox(&self, field: &str, input: &Input, ctx: &Context) -> Result<Mailbox, StepError> {
        let address = self.text(field, input, ctx)?;
        address.parse().map_err(|e| StepError::InvalidInputType {
            field: field.to_string(),
            expected: "email address".to_string(),
            actual: format!("'{}' ({})", address, e),
        })
    }
}

#[async_trait]
impl Step for EmailStep {
    fn spec(&self) -> &StepSpec {
        &self.spec
    }

    fn kind(&self) -> &str {
        "email"
    }

    async fn execute(&self, ctx: &Context) -> Result<Value, StepError> {
        let to = self.mailbox("to", &self.to, ctx)?;
        let from = self.mailbox("from", &self.from, ctx)?;
        let subject = self.text("subject", &self.subject, ctx)?;
        let body = self.text("body", &self.body, ctx)?;
        let recipient = to.email.to_string();

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| StepError::failed(format!("Failed to build email: {}", e)))?;

        tracing::info!(
            step_id = %self.spec.id,
            to = %recipient,
            server = %self.smtp.server,
            port = self.smtp.port,
            "Sending email"
        );

        self.smtp
            .transport()?
            .send(message)
            .await
            .map_err(|e| StepError::failed(format!("SMTP send failed: {}", e)))?;

        let result = Value::String(format!("Email sent to {}", recipient));
        ctx.set(derived_key(&self.spec.id, "result"), result.clone());
        Ok(result)
    }

    fn validate_config(&self) -> Result<(), StepError> {
        if self.smtp.server.trim().is_empty() {
            return Err(StepError::Configuration("SMTP server is empty".to_string()));
        }
        Ok(())
    }
}

/// Replace `$path` placeholders with the context value at that path.
fn render_template(text: &str, ctx: &Context) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let end = after
            .find(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | '.' | '[' | ']')))
            .unwrap_or(after.len());
        // a sentence-ending dot is not part of the path
        let path = after[..end].trim_end_matches('.');

        match ctx.resolve_path(path).filter(|_| !path.is_empty()) {
            Some(value) => {
                out.push_str(&value.to_string());
                rest = &after[path.len()..];
            }
            None => {
                out.push('$');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}
