//! Sender adapters that hand optimization requests to lettre.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Local;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    message::{
        Attachment as MimeAttachment, Mailbox, Message, MultiPart, SinglePart,
        header::ContentType,
    },
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};
use mailparse::{MailAddr, addrparse};
use serde::{Deserialize, Serialize};

use lqsmail_core::{Alerts, EmailSender, OutboundEmailRequest, SendOptions, Severity};

const SENT_MESSAGE: &str = "Email sent";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub skip_tls_verify: bool,
}

pub fn build_message(from: &str, request: &OutboundEmailRequest) -> Result<Message> {
    let from_addr = parse_mailbox(from).with_context(|| format!("invalid sender {:?}", from))?;
    let mut to_addrs = Vec::new();
    for recipient in &request.recipients {
        to_addrs.extend(parse_mailbox_list(recipient)?);
    }
    if to_addrs.is_empty() {
        return Err(anyhow!("No recipients"));
    }
    let mut builder = Message::builder()
        .from(from_addr)
        .subject(request.subject.as_str());
    for addr in to_addrs {
        builder = builder.to(addr);
    }
    for cc in request.cc_list.iter().flatten() {
        builder = builder.cc(parse_mailbox(cc).with_context(|| format!("invalid cc {:?}", cc))?);
    }

    let html = SinglePart::html(request.body.clone());
    let email = match request.attachments.as_deref() {
        None | Some([]) => builder.singlepart(html)?,
        Some(attachments) => {
            let mut multipart = MultiPart::mixed().singlepart(html);
            for attachment in attachments {
                let mime = ContentType::parse(attachment.mime())
                    .or_else(|_| ContentType::parse("application/octet-stream"))?;
                multipart = multipart.singlepart(
                    MimeAttachment::new(attachment.filename().to_string())
                        .body(attachment.data().to_vec(), mime),
                );
            }
            builder.multipart(multipart)?
        }
    };
    Ok(email)
}

fn parse_mailbox(input: &str) -> Result<Mailbox> {
    let trimmed = input.trim();
    if let (Some(start), Some(end)) = (trimmed.find('<'), trimmed.find('>')) {
        let name = trimmed[..start].trim().trim_matches('"');
        let addr = trimmed[start + 1..end].trim();
        let name = if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        };
        return Ok(Mailbox::new(name, addr.parse()?));
    }
    Ok(Mailbox::new(None, trimmed.parse()?))
}

fn parse_mailbox_list(input: &str) -> Result<Vec<Mailbox>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let parsed = addrparse(trimmed)?;
    Ok(mailaddrs_to_mailboxes(&parsed))
}

fn mailaddrs_to_mailboxes(addrs: &[MailAddr]) -> Vec<Mailbox> {
    let mut out = Vec::new();
    for addr in addrs {
        match addr {
            MailAddr::Single(info) => {
                if let Ok(parsed) = info.addr.parse() {
                    out.push(Mailbox::new(info.display_name.clone(), parsed));
                }
            }
            MailAddr::Group(group) => {
                for info in &group.addrs {
                    if let Ok(parsed) = info.addr.parse() {
                        out.push(Mailbox::new(info.display_name.clone(), parsed));
                    }
                }
            }
        }
    }
    out
}

fn announce_sent(alerts: Option<&Arc<dyn Alerts>>, options: SendOptions) {
    if options.suppress_default_alert {
        return;
    }
    if let Some(alerts) = alerts {
        alerts.notify(SENT_MESSAGE, Severity::Success);
    }
}

/// Delivers through an SMTP relay. Port 465 uses implicit TLS, anything
/// else requires STARTTLS.
pub struct SmtpSender {
    config: SmtpConfig,
    alerts: Option<Arc<dyn Alerts>>,
}

impl SmtpSender {
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config,
            alerts: None,
        }
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn Alerts>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let smtp = &self.config;
        let creds = Credentials::new(smtp.username.clone(), smtp.password.clone());
        let mut tls_builder = TlsParameters::builder(smtp.host.clone());
        if smtp.skip_tls_verify {
            tls_builder = tls_builder
                .dangerous_accept_invalid_certs(true)
                .dangerous_accept_invalid_hostnames(true);
        }
        let tls_parameters = tls_builder.build()?;
        let builder = if smtp.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
                .port(smtp.port)
                .tls(Tls::Wrapper(tls_parameters))
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
                .port(smtp.port)
                .tls(Tls::Required(tls_parameters))
        };
        Ok(builder.credentials(creds).build())
    }
}

#[async_trait]
impl EmailSender for SmtpSender {
    async fn send(&self, request: &OutboundEmailRequest, options: SendOptions) -> Result<bool> {
        let email = build_message(&self.config.from, request)?;
        let mailer = self.transport()?;
        tracing::debug!(host = %self.config.host, port = self.config.port, "sending via smtp");
        let response = mailer
            .send(email)
            .await
            .map_err(|e| anyhow!(e.to_string()))?;
        if !response.is_positive() {
            tracing::warn!(code = %response.code(), "smtp relay did not accept message");
            return Ok(false);
        }
        announce_sent(self.alerts.as_ref(), options);
        Ok(true)
    }
}

/// Writes each request as an `.eml` file instead of delivering it.
pub struct OutboxSender {
    dir: PathBuf,
    from: String,
    alerts: Option<Arc<dyn Alerts>>,
    last_written: Mutex<Option<PathBuf>>,
}

impl OutboxSender {
    pub fn new(dir: impl Into<PathBuf>, from: &str) -> Self {
        Self {
            dir: dir.into(),
            from: from.to_string(),
            alerts: None,
            last_written: Mutex::new(None),
        }
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn Alerts>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn last_written(&self) -> Option<PathBuf> {
        self.last_written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d-%H%M%S%.3f");
        let mut path = self.dir.join(format!("{}.eml", stamp));
        let mut suffix = 1;
        while path.exists() {
            path = self.dir.join(format!("{}-{}.eml", stamp, suffix));
            suffix += 1;
        }
        path
    }
}

#[async_trait]
impl EmailSender for OutboxSender {
    async fn send(&self, request: &OutboundEmailRequest, options: SendOptions) -> Result<bool> {
        let email = build_message(&self.from, request)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create outbox {}", self.dir.display()))?;
        let path = self.next_path();
        tokio::fs::write(&path, email.formatted())
            .await
            .with_context(|| format!("write {}", path.display()))?;
        tracing::info!(path = %path.display(), "request written to outbox");
        *self
            .last_written
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(path);
        announce_sent(self.alerts.as_ref(), options);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::{SystemTime, UNIX_EPOCH};

    use lqsmail_core::{
        Alerts, Attachment, EmailSender, ExportFile, OutboundEmailRequest, SendOptions, Severity,
        UserFile,
    };

    use super::{OutboxSender, SmtpConfig, SmtpSender, build_message};

    fn request(attachments: Option<Vec<Attachment>>) -> OutboundEmailRequest {
        OutboundEmailRequest {
            subject: "Listing optimization request from Vendor vendor@example.com".to_string(),
            recipients: vec!["optimization@webycorp.com".to_string()],
            cc_list: Some(vec!["boss@example.com".to_string()]),
            body: "<p>hello</p>".to_string(),
            attachments,
        }
    }

    fn temp_outbox() -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("lqsmail-outbox-{}-{}", std::process::id(), ts))
    }

    #[derive(Default)]
    struct RecordingAlerts(Mutex<Vec<(String, Severity)>>);

    impl Alerts for RecordingAlerts {
        fn notify(&self, message: &str, severity: Severity) {
            self.0.lock().unwrap().push((message.to_string(), severity));
        }
    }

    #[test]
    fn message_carries_headers_and_ordered_attachments() -> anyhow::Result<()> {
        let attachments = vec![
            Attachment::GeneratedCsv(ExportFile {
                filename: "lqs_items_list.csv".to_string(),
                mime: "text/csv".to_string(),
                data: b"ASIN\r\nB1\r\n".to_vec(),
            }),
            Attachment::UserFile(UserFile {
                filename: "file1.pdf".to_string(),
                mime: "application/pdf".to_string(),
                data: vec![1, 2, 3],
            }),
        ];
        let email = build_message("Vendor <vendor@example.com>", &request(Some(attachments)))?;
        let raw = String::from_utf8(email.formatted())?;

        assert!(raw.contains("Listing optimization request"));
        assert!(raw.contains("Cc: boss@example.com"));
        assert!(raw.contains("multipart/mixed"));
        let csv = raw
            .find("lqs_items_list.csv")
            .ok_or_else(|| anyhow::anyhow!("missing export"))?;
        let pdf = raw
            .find("file1.pdf")
            .ok_or_else(|| anyhow::anyhow!("missing user file"))?;
        assert!(csv < pdf);
        Ok(())
    }

    #[test]
    fn message_without_attachments_is_single_html_part() -> anyhow::Result<()> {
        let email = build_message("vendor@example.com", &request(None))?;
        let raw = String::from_utf8(email.formatted())?;
        assert!(raw.contains("text/html"));
        assert!(!raw.contains("multipart/mixed"));
        Ok(())
    }

    #[test]
    fn message_requires_recipients() {
        let mut req = request(None);
        req.recipients.clear();
        let err = build_message("vendor@example.com", &req).unwrap_err();
        assert!(err.to_string().contains("No recipients"));
    }

    #[tokio::test]
    async fn smtp_sender_rejects_bad_sender_before_connecting() {
        let sender = SmtpSender::new(SmtpConfig {
            host: "smtp.invalid".to_string(),
            port: 587,
            username: "user".to_string(),
            password: "secret".to_string(),
            from: "not an address".to_string(),
            skip_tls_verify: false,
        });
        let result = sender.send(&request(None), SendOptions::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn outbox_writes_eml_and_respects_alert_suppression() -> anyhow::Result<()> {
        let dir = temp_outbox();
        let alerts = Arc::new(RecordingAlerts::default());
        let sender = OutboxSender::new(&dir, "vendor@example.com").with_alerts(alerts.clone());

        let suppressed = SendOptions {
            suppress_default_alert: true,
        };
        assert!(sender.send(&request(None), suppressed).await?);
        let path = sender
            .last_written()
            .ok_or_else(|| anyhow::anyhow!("no file written"))?;
        let raw = std::fs::read_to_string(&path)?;
        assert!(raw.contains("To: optimization@webycorp.com"));
        assert!(alerts.0.lock().unwrap().is_empty());

        assert!(sender.send(&request(None), SendOptions::default()).await?);
        assert_eq!(
            alerts.0.lock().unwrap().clone(),
            vec![("Email sent".to_string(), Severity::Success)]
        );
        assert_ne!(sender.last_written(), Some(path));

        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }
}
