use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use lqsmail_compose::{Capabilities, SendOutcome, SubmissionController};
use lqsmail_content::CsvExporter;
use lqsmail_core::{
    EmailSender, FieldErrors, ModalControl, OutboundEmailRequest, REQUIRED_FIELDS_BANNER,
    RowSelection, SendOptions, SessionContext, THANK_YOU_HEADER, THANK_YOU_TEXT, default_headers,
    validate,
};
use lqsmail_mail::{OutboxSender, SmtpSender};
use serde_json::{Value as JsonValue, json};

use super::{
    AppConfig, CliCommand, ComposeArgs, ConsoleAlerts, SendCmd, config_path_candidates,
    field_errors_to_json, load_attachment, load_body, load_items, load_notes, output_error,
    output_ok, request_summary,
};

/// Empties the items file once the request has gone out.
struct ItemsFileSelection {
    path: Option<PathBuf>,
}

impl RowSelection for ItemsFileSelection {
    fn clear_selection(&self) {
        let Some(path) = self.path.as_ref() else {
            return;
        };
        match std::fs::write(path, "[]\n") {
            Ok(()) => tracing::debug!(path = %path.display(), "selection cleared"),
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "clear selection failed"),
        }
    }
}

#[derive(Default)]
struct CliModal {
    closed: AtomicBool,
}

impl ModalControl for CliModal {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn recipients_for(args: &ComposeArgs, config: &AppConfig) -> Result<Vec<String>> {
    let recipients = if args.to.is_empty() {
        config.recipients.clone()
    } else {
        args.to.clone()
    };
    if recipients.is_empty() {
        return Err(anyhow!(
            "No recipients (pass --to or set [compose].recipients)"
        ));
    }
    Ok(recipients)
}

fn describe_errors(errors: &FieldErrors) -> String {
    let mut fields = Vec::new();
    if let Some(cc) = errors.cc.as_deref() {
        fields.push(format!("cc: {}", cc));
    }
    if let Some(body) = errors.body.as_deref() {
        fields.push(format!("body: {}", body));
    }
    format!("{} ({})", REQUIRED_FIELDS_BANNER, fields.join(", "))
}

fn thank_you_json() -> JsonValue {
    json!({
        "header": THANK_YOU_HEADER,
        "text": THANK_YOU_TEXT,
    })
}

/// Builds a controller and replays the command line inputs as form edits.
fn prepare_controller(
    args: &ComposeArgs,
    config: &AppConfig,
    sender: Arc<dyn EmailSender>,
    selection: Arc<dyn RowSelection>,
    modal: Arc<dyn ModalControl>,
) -> Result<SubmissionController> {
    let context = SessionContext {
        sender_email: args.from.clone(),
        recipients: recipients_for(args, config)?,
        items: load_items(args.items.as_deref())?,
        headers: default_headers(),
    };
    let notes = load_notes(args.notes.as_deref())?;
    let body = load_body(args.body.as_deref())?;
    let caps = Capabilities {
        sender,
        alerts: Arc::new(ConsoleAlerts),
        exporter: Arc::new(CsvExporter),
        selection,
        modal,
    };
    let controller =
        SubmissionController::new(context, caps, config.compose.clone(), config.style.clone());
    if let Some(cc) = args.cc.as_deref() {
        controller.begin_cc_edit()?;
        controller.set_cc(cc)?;
    }
    controller.set_body(body)?;
    let mut asins: Vec<&String> = notes.keys().collect();
    asins.sort();
    for asin in asins {
        controller.set_annotation(asin, &notes[asin])?;
    }
    for path in &args.attach {
        controller.add_attachment(load_attachment(path)?)?;
    }
    Ok(controller)
}

/// Never invoked; preview only renders.
struct PreviewOnly;

#[async_trait]
impl EmailSender for PreviewOnly {
    async fn send(&self, _request: &OutboundEmailRequest, _options: SendOptions) -> Result<bool> {
        Err(anyhow!("preview does not send"))
    }
}

pub(crate) fn run_cli(
    rt: &tokio::runtime::Runtime,
    command: CliCommand,
    config: &AppConfig,
) -> Result<()> {
    match command {
        CliCommand::Validate(args) => {
            let items = load_items(args.items.as_deref())?;
            let body = load_body(args.body.as_deref())?;
            let line_item_mode = !items.is_empty();
            let errors = validate(
                args.cc.as_deref().unwrap_or(""),
                body.as_deref(),
                line_item_mode,
            );
            output_ok(json!({
                "valid": errors.is_empty(),
                "mode": if line_item_mode { "items" } else { "text" },
                "items": items.len(),
                "errors": field_errors_to_json(&errors),
                "banner": (!errors.is_empty()).then_some(REQUIRED_FIELDS_BANNER),
            }))
        }
        CliCommand::Preview(args) => {
            let controller = prepare_controller(
                &args,
                config,
                Arc::new(PreviewOnly),
                Arc::new(ItemsFileSelection { path: None }),
                Arc::new(CliModal::default()),
            )?;
            let request = controller.preview_request()?;
            let form = controller.form();
            let errors = validate(
                &form.cc_address,
                form.body_text.as_deref(),
                controller.context().line_item_mode(),
            );
            output_ok(json!({
                "valid": errors.is_empty(),
                "errors": field_errors_to_json(&errors),
                "request": request_summary(&request, true),
            }))
        }
        CliCommand::Send(cmd) => run_send(rt, cmd, config),
        CliCommand::Config => {
            let candidates: Vec<String> = config_path_candidates()
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            output_ok(json!({
                "candidates": candidates,
                "load_error": config.load_error,
                "recipients": config.recipients,
                "export_threshold": config.compose.export_threshold,
                "export_file_name": config.compose.export_file_name,
                "close_delay_ms": config.compose.close_delay.as_millis() as u64,
                "cancel_close_timer_on_manual_close": config.compose.cancel_close_timer_on_manual_close,
                "smtp_configured": config.smtp.is_some(),
                "outbox": config.outbox.dir.as_ref().map(|d| d.display().to_string()),
            }))
        }
    }
}

fn run_send(rt: &tokio::runtime::Runtime, cmd: SendCmd, config: &AppConfig) -> Result<()> {
    let alerts = Arc::new(ConsoleAlerts);
    let outbox_dir = cmd
        .outbox
        .as_deref()
        .map(PathBuf::from)
        .or_else(|| config.outbox.dir.clone());
    let mut outbox = None;
    let sender: Arc<dyn EmailSender> = match outbox_dir {
        Some(dir) => {
            let from = config
                .smtp
                .as_ref()
                .map(|smtp| smtp.from.as_str())
                .unwrap_or(cmd.compose.from.as_str());
            let sender = Arc::new(OutboxSender::new(dir, from).with_alerts(alerts.clone()));
            outbox = Some(sender.clone());
            sender
        }
        None => {
            let Some(smtp) = config.smtp.clone() else {
                return output_error("SMTP not configured (set [smtp] or pass --outbox)");
            };
            Arc::new(SmtpSender::new(smtp).with_alerts(alerts))
        }
    };
    let selection = ItemsFileSelection {
        path: cmd
            .clear_selection
            .then(|| cmd.compose.items.as_deref().map(PathBuf::from))
            .flatten(),
    };
    let modal = Arc::new(CliModal::default());
    let controller = prepare_controller(
        &cmd.compose,
        config,
        sender,
        Arc::new(selection),
        modal.clone(),
    )?;
    let summary = request_summary(&controller.preview_request()?, false);

    rt.block_on(async move {
        match controller.send().await {
            SendOutcome::Sent => {
                let closed = if cmd.wait_close {
                    controller.wait_for_close().await
                } else {
                    false
                };
                output_ok(json!({
                    "sent": true,
                    "notification": thank_you_json(),
                    "state": controller.state().to_string(),
                    "closed": closed && modal.closed.load(Ordering::SeqCst),
                    "request": summary,
                    "outbox_file": outbox
                        .as_ref()
                        .and_then(|o| o.last_written())
                        .map(|p| p.display().to_string()),
                }))
            }
            SendOutcome::Invalid(errors) => output_error(&describe_errors(&errors)),
            SendOutcome::Failed(reason) => output_error(&format!("Send failed: {}", reason)),
            SendOutcome::Ignored(state) => {
                output_error(&format!("Send ignored while {}", state))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use lqsmail_core::FieldErrors;

    use super::{AppConfig, ComposeArgs, describe_errors, recipients_for, thank_you_json};

    fn args(to: Vec<&str>) -> ComposeArgs {
        ComposeArgs {
            from: "vendor@example.com".to_string(),
            to: to.into_iter().map(str::to_string).collect(),
            cc: None,
            items: None,
            notes: None,
            body: None,
            attach: Vec::new(),
        }
    }

    #[test]
    fn explicit_recipients_override_config() {
        let config = AppConfig {
            recipients: vec!["optimization@webycorp.com".to_string()],
            ..AppConfig::default()
        };
        assert_eq!(
            recipients_for(&args(vec![]), &config).unwrap(),
            vec!["optimization@webycorp.com"]
        );
        assert_eq!(
            recipients_for(&args(vec!["ops@example.com"]), &config).unwrap(),
            vec!["ops@example.com"]
        );
        assert!(recipients_for(&args(vec![]), &AppConfig::default()).is_err());
    }

    #[test]
    fn send_result_carries_thank_you_copy() {
        let notification = thank_you_json();
        assert_eq!(notification["header"], "Thank you for contacting WebyCorp!");
        assert!(
            notification["text"]
                .as_str()
                .unwrap_or_default()
                .contains("successfully sent")
        );
    }

    #[test]
    fn error_description_names_failing_fields() {
        let errors = FieldErrors {
            cc: Some("Invalid email address".to_string()),
            body: Some("required".to_string()),
        };
        assert_eq!(
            describe_errors(&errors),
            "Please fill out all required fields. (cc: Invalid email address, body: required)"
        );
    }
}
