use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing_subscriber::EnvFilter;

mod validate;

pub use validate::{
    INVALID_EMAIL_MESSAGE, REQUIRED_FIELDS_BANNER, REQUIRED_MESSAGE, is_blank_body,
    is_valid_address, is_valid_cc, parse_cc_list, validate,
};

pub const DEFAULT_EXPORT_THRESHOLD: usize = 100;
pub const DEFAULT_EXPORT_FILE_NAME: &str = "lqs_items_list";
pub const DEFAULT_CLOSE_DELAY: Duration = Duration::from_millis(3000);

/// Copy shown once a request has been accepted.
pub const THANK_YOU_HEADER: &str = "Thank you for contacting WebyCorp!";
pub const THANK_YOU_TEXT: &str = "Your request for listing improvement has been successfully sent. We will follow up with you as soon as possible.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub asin: String,
    #[serde(default)]
    pub lqs: Option<f64>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, JsonValue>,
}

impl LineItem {
    pub fn new(asin: impl Into<String>) -> Self {
        Self {
            asin: asin.into(),
            lqs: None,
            details: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Resolves a header column key against this item as display text.
    pub fn column_value(&self, key: &str) -> String {
        match key {
            "asin" => self.asin.clone(),
            "lqs" => self.lqs.map(|v| v.to_string()).unwrap_or_default(),
            "details" => self.details.clone().unwrap_or_default(),
            _ => match self.fields.get(key) {
                Some(JsonValue::String(s)) => s.clone(),
                Some(JsonValue::Null) | None => String::new(),
                Some(other) => other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderColumn {
    pub key: String,
    pub label: String,
}

impl HeaderColumn {
    pub fn new(key: &str, label: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
        }
    }
}

/// Column schema shared by the item table, the email template and the export.
pub fn default_headers() -> Vec<HeaderColumn> {
    vec![
        HeaderColumn::new("asin", "ASIN"),
        HeaderColumn::new("title", "Title"),
        HeaderColumn::new("lqs", "LQS"),
        HeaderColumn::new("details", "Details"),
    ]
}

pub type ItemAnnotations = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFile {
    pub filename: String,
    pub mime: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub filename: String,
    pub mime: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    UserFile(UserFile),
    GeneratedCsv(ExportFile),
}

impl Attachment {
    pub fn filename(&self) -> &str {
        match self {
            Attachment::UserFile(file) => &file.filename,
            Attachment::GeneratedCsv(file) => &file.filename,
        }
    }

    pub fn mime(&self) -> &str {
        match self {
            Attachment::UserFile(file) => &file.mime,
            Attachment::GeneratedCsv(file) => &file.mime,
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            Attachment::UserFile(file) => &file.data,
            Attachment::GeneratedCsv(file) => &file.data,
        }
    }

    pub fn is_generated(&self) -> bool {
        matches!(self, Attachment::GeneratedCsv(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEmailRequest {
    pub subject: String,
    pub recipients: Vec<String>,
    pub cc_list: Option<Vec<String>>,
    pub body: String,
    pub attachments: Option<Vec<Attachment>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionState {
    Idle,
    Validating,
    Sending,
    Sent,
    ClosingTimer,
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubmissionState::Idle => "idle",
            SubmissionState::Validating => "validating",
            SubmissionState::Sending => "sending",
            SubmissionState::Sent => "sent",
            SubmissionState::ClosingTimer => "closing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.cc.is_none() && self.body.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormState {
    pub cc_address: String,
    pub cc_editing: bool,
    pub cc_error: Option<String>,
    pub body_text: Option<String>,
    pub body_error: Option<String>,
    pub attachments: Vec<UserFile>,
    pub submission_state: SubmissionState,
}

impl Default for FormState {
    fn default() -> Self {
        Self {
            cc_address: String::new(),
            cc_editing: false,
            cc_error: None,
            body_text: None,
            body_error: None,
            attachments: Vec::new(),
            submission_state: SubmissionState::Idle,
        }
    }
}

/// Read-only inputs supplied by the hosting environment for one session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub sender_email: String,
    pub recipients: Vec<String>,
    pub items: Vec<LineItem>,
    pub headers: Vec<HeaderColumn>,
}

impl SessionContext {
    pub fn line_item_mode(&self) -> bool {
        !self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeConfig {
    pub export_threshold: usize,
    pub export_file_name: String,
    pub close_delay: Duration,
    pub cancel_close_timer_on_manual_close: bool,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            export_threshold: DEFAULT_EXPORT_THRESHOLD,
            export_file_name: DEFAULT_EXPORT_FILE_NAME.to_string(),
            close_delay: DEFAULT_CLOSE_DELAY,
            cancel_close_timer_on_manual_close: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Success,
    Info,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub suppress_default_alert: bool,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// `Ok(false)` means the sender rejected the request without an error.
    async fn send(&self, request: &OutboundEmailRequest, options: SendOptions) -> Result<bool>;
}

pub trait Alerts: Send + Sync {
    fn notify(&self, message: &str, severity: Severity);
}

pub trait TabularExporter: Send + Sync {
    fn build_export(
        &self,
        headers: &[HeaderColumn],
        rows: &[LineItem],
        file_name: &str,
    ) -> Result<ExportFile>;
}

pub trait RowSelection: Send + Sync {
    fn clear_selection(&self);
}

pub trait ModalControl: Send + Sync {
    fn close(&self);
}

fn xdg_state_dir() -> PathBuf {
    std::env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("state"))
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

pub fn log_path() -> PathBuf {
    xdg_state_dir().join("lqsmail").join("lqsmail.log")
}

/// Installs a file-backed subscriber when `LQSMAIL_LOG` is set.
///
/// The variable's value is used as the filter directive; `1`/`true` mean `debug`.
pub fn init_logging() -> bool {
    let Ok(raw) = std::env::var("LQSMAIL_LOG") else {
        return false;
    };
    let directive = match raw.trim() {
        "" | "1" => "debug".to_string(),
        s if s.eq_ignore_ascii_case("true") => "debug".to_string(),
        s => s.to_string(),
    };
    let path = log_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let Ok(file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    else {
        return false;
    };
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Attachment, ExportFile, LineItem, SubmissionState, UserFile, default_headers};

    #[test]
    fn column_value_resolves_typed_and_extra_fields() -> anyhow::Result<()> {
        let item: LineItem = serde_json::from_value(json!({
            "asin": "B00TEST001",
            "lqs": 7.5,
            "title": "Steel Kettle",
            "units": 12
        }))?;
        assert_eq!(item.column_value("asin"), "B00TEST001");
        assert_eq!(item.column_value("lqs"), "7.5");
        assert_eq!(item.column_value("title"), "Steel Kettle");
        assert_eq!(item.column_value("units"), "12");
        assert_eq!(item.column_value("details"), "");
        assert_eq!(item.column_value("missing"), "");
        Ok(())
    }

    #[test]
    fn whole_scores_render_without_fraction() {
        let mut item = LineItem::new("B1");
        item.lqs = Some(8.0);
        assert_eq!(item.column_value("lqs"), "8");
    }

    #[test]
    fn default_headers_start_with_asin_and_include_details() {
        let headers = default_headers();
        assert_eq!(headers.first().map(|h| h.key.as_str()), Some("asin"));
        assert!(headers.iter().any(|h| h.key == "details"));
    }

    #[test]
    fn attachment_accessors_cover_both_variants() {
        let user = Attachment::UserFile(UserFile {
            filename: "photo.png".to_string(),
            mime: "image/png".to_string(),
            data: vec![1, 2, 3],
        });
        let export = Attachment::GeneratedCsv(ExportFile {
            filename: "lqs_items_list.csv".to_string(),
            mime: "text/csv".to_string(),
            data: b"ASIN\r\n".to_vec(),
        });
        assert_eq!(user.filename(), "photo.png");
        assert_eq!(user.data(), &[1, 2, 3]);
        assert!(!user.is_generated());
        assert_eq!(export.mime(), "text/csv");
        assert!(export.is_generated());
    }

    #[test]
    fn submission_state_display_is_lowercase() {
        assert_eq!(SubmissionState::ClosingTimer.to_string(), "closing");
        assert_eq!(SubmissionState::Idle.to_string(), "idle");
    }
}
