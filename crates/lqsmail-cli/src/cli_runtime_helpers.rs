use std::path::Path;

use anyhow::{Context, Result};
use lqsmail_core::{
    Alerts, Attachment, FieldErrors, ItemAnnotations, LineItem, OutboundEmailRequest, Severity,
    UserFile,
};
use mime_guess::MimeGuess;
use serde_json::{Value as JsonValue, json};

use super::CLI_SCHEMA_VERSION;

pub(crate) fn output_ok(value: JsonValue) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(&json!({
            "schema": CLI_SCHEMA_VERSION,
            "ok": true,
            "result": value
        }))?
    );
    Ok(())
}

pub(crate) fn output_error(message: &str) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(&json!({
            "schema": CLI_SCHEMA_VERSION,
            "ok": false,
            "error": message
        }))?
    );
    Ok(())
}

/// Alerts go to stderr so stdout stays a single JSON line.
pub(crate) struct ConsoleAlerts;

impl Alerts for ConsoleAlerts {
    fn notify(&self, message: &str, severity: Severity) {
        let label = match severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Success => "success",
            Severity::Info => "info",
        };
        eprintln!("[{}] {}", label, message);
    }
}

pub(crate) fn load_items(path: Option<&str>) -> Result<Vec<LineItem>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("read items {}", path))?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw).with_context(|| format!("parse items {}", path))
}

pub(crate) fn load_notes(path: Option<&str>) -> Result<ItemAnnotations> {
    let Some(path) = path else {
        return Ok(ItemAnnotations::new());
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("read notes {}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("parse notes {}", path))
}

pub(crate) fn load_body(path: Option<&str>) -> Result<Option<String>> {
    path.map(|path| std::fs::read_to_string(path).with_context(|| format!("read body {}", path)))
        .transpose()
}

pub(crate) fn load_attachment(path: &str) -> Result<UserFile> {
    let data = std::fs::read(path).with_context(|| format!("read attachment {}", path))?;
    Ok(UserFile {
        filename: Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string()),
        mime: MimeGuess::from_path(path)
            .first_or_octet_stream()
            .to_string(),
        data,
    })
}

pub(crate) fn field_errors_to_json(errors: &FieldErrors) -> JsonValue {
    json!({
        "cc": errors.cc,
        "body": errors.body,
    })
}

fn attachment_to_json(attachment: &Attachment) -> JsonValue {
    json!({
        "filename": attachment.filename(),
        "mime": attachment.mime(),
        "size": attachment.data().len(),
        "generated": attachment.is_generated(),
    })
}

/// Request metadata without attachment contents.
pub(crate) fn request_summary(request: &OutboundEmailRequest, include_body: bool) -> JsonValue {
    let attachments: Vec<JsonValue> = request
        .attachments
        .iter()
        .flatten()
        .map(attachment_to_json)
        .collect();
    let mut summary = json!({
        "subject": request.subject,
        "recipients": request.recipients,
        "cc": request.cc_list,
        "attachments": attachments,
    });
    if include_body {
        summary["body"] = JsonValue::String(request.body.clone());
    }
    summary
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use lqsmail_core::{Attachment, ExportFile, OutboundEmailRequest, UserFile};

    use super::{load_attachment, load_items, load_notes, request_summary};

    fn temp_path(name: &str) -> std::path::PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("lqsmail-cli-{}-{}-{}", std::process::id(), ts, name))
    }

    #[test]
    fn items_and_notes_load_from_json() -> anyhow::Result<()> {
        let items_path = temp_path("items.json");
        std::fs::write(
            &items_path,
            r#"[{"asin":"B01","lqs":6.5,"title":"Mug"},{"asin":"B02"}]"#,
        )?;
        let items = load_items(items_path.to_str())?;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].lqs, Some(6.5));
        assert_eq!(items[0].column_value("title"), "Mug");

        let notes_path = temp_path("notes.json");
        std::fs::write(&notes_path, r#"{"B02":"Add bullets"}"#)?;
        let notes = load_notes(notes_path.to_str())?;
        assert_eq!(notes.get("B02").map(String::as_str), Some("Add bullets"));

        assert!(load_items(None)?.is_empty());
        let _ = std::fs::remove_file(items_path);
        let _ = std::fs::remove_file(notes_path);
        Ok(())
    }

    #[test]
    fn attachment_mime_is_guessed_from_extension() -> anyhow::Result<()> {
        let path = temp_path("brief.pdf");
        std::fs::write(&path, b"%PDF")?;
        let file = load_attachment(path.to_str().unwrap_or_default())?;
        assert_eq!(file.mime, "application/pdf");
        assert!(file.filename.ends_with("brief.pdf"));
        assert_eq!(file.data, b"%PDF");
        let _ = std::fs::remove_file(path);
        Ok(())
    }

    #[test]
    fn missing_attachment_is_an_error() {
        assert!(load_attachment("/nonexistent/lqsmail/file.pdf").is_err());
    }

    #[test]
    fn summary_lists_attachments_in_order() {
        let request = OutboundEmailRequest {
            subject: "s".to_string(),
            recipients: vec!["r@example.com".to_string()],
            cc_list: None,
            body: "<p>b</p>".to_string(),
            attachments: Some(vec![
                Attachment::GeneratedCsv(ExportFile {
                    filename: "lqs_items_list.csv".to_string(),
                    mime: "text/csv".to_string(),
                    data: vec![b'a'; 4],
                }),
                Attachment::UserFile(UserFile {
                    filename: "file1.pdf".to_string(),
                    mime: "application/pdf".to_string(),
                    data: Vec::new(),
                }),
            ]),
        };
        let summary = request_summary(&request, false);
        assert_eq!(summary["attachments"][0]["filename"], "lqs_items_list.csv");
        assert_eq!(summary["attachments"][0]["generated"], true);
        assert_eq!(summary["attachments"][0]["size"], 4);
        assert_eq!(summary["attachments"][1]["filename"], "file1.pdf");
        assert!(summary["cc"].is_null());
        assert!(summary.get("body").is_none());
        assert_eq!(request_summary(&request, true)["body"], "<p>b</p>");
    }
}
