use std::path::PathBuf;
use std::time::Duration;

use lqsmail_content::TemplateStyle;
use lqsmail_core::ComposeConfig;
use lqsmail_mail::SmtpConfig;

#[derive(Debug, Clone, Default)]
pub(crate) struct OutboxConfig {
    pub(crate) dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct AppConfig {
    pub(crate) compose: ComposeConfig,
    pub(crate) recipients: Vec<String>,
    pub(crate) style: TemplateStyle,
    pub(crate) smtp: Option<SmtpConfig>,
    pub(crate) outbox: OutboxConfig,
    pub(crate) load_error: Option<String>,
}

/// Parses `lqsmail.toml`. Missing sections and bad values fall back to defaults.
pub(crate) fn load_app_config(content: Option<&str>) -> AppConfig {
    let default = AppConfig::default();
    let Some(content) = content else {
        return default;
    };
    let value: toml::Value = match toml::from_str(content) {
        Ok(value) => value,
        Err(err) => {
            return AppConfig {
                load_error: Some(err.to_string()),
                ..default
            };
        }
    };
    let (compose, recipients) = value
        .get("compose")
        .map(parse_compose)
        .unwrap_or_else(|| (ComposeConfig::default(), Vec::new()));
    let style = value
        .get("template")
        .map(parse_template)
        .unwrap_or_default();
    let smtp = value.get("smtp").and_then(parse_smtp_table);
    let outbox = OutboxConfig {
        dir: value
            .get("outbox")
            .and_then(|v| v.get("dir"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
    };
    AppConfig {
        compose,
        recipients,
        style,
        smtp,
        outbox,
        load_error: None,
    }
}

fn parse_compose(compose: &toml::Value) -> (ComposeConfig, Vec<String>) {
    let default = ComposeConfig::default();
    let export_threshold = compose
        .get("export_threshold")
        .and_then(|v| v.as_integer())
        .and_then(|v| usize::try_from(v).ok())
        .unwrap_or(default.export_threshold);
    let export_file_name = compose
        .get("export_file_name")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or(default.export_file_name);
    let close_delay = compose
        .get("close_delay_ms")
        .and_then(|v| v.as_integer())
        .and_then(|v| u64::try_from(v).ok())
        .map(Duration::from_millis)
        .unwrap_or(default.close_delay);
    let cancel_close_timer_on_manual_close = compose
        .get("cancel_close_timer_on_manual_close")
        .and_then(parse_bool)
        .unwrap_or(default.cancel_close_timer_on_manual_close);
    let recipients = parse_string_list(compose, "recipients").unwrap_or_default();
    (
        ComposeConfig {
            export_threshold,
            export_file_name,
            close_delay,
            cancel_close_timer_on_manual_close,
        },
        recipients,
    )
}

fn parse_template(template: &toml::Value) -> TemplateStyle {
    let default = TemplateStyle::default();
    let font_family = template
        .get("font_family")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or(default.font_family);
    let font_size_px = template
        .get("font_size_px")
        .and_then(|v| v.as_integer())
        .map(|v| v.clamp(8, 72) as u16)
        .unwrap_or(default.font_size_px);
    TemplateStyle {
        font_family,
        font_size_px,
    }
}

fn parse_smtp_table(smtp: &toml::Value) -> Option<SmtpConfig> {
    let host = smtp.get("host")?.as_str()?.to_string();
    let port = smtp
        .get("port")
        .and_then(|v| v.as_integer())
        .and_then(|v| u16::try_from(v).ok())
        .unwrap_or(587);
    let username = smtp
        .get("username")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let password = smtp
        .get("password")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let from = smtp
        .get("from")
        .and_then(|v| v.as_str())
        .unwrap_or(&username)
        .to_string();
    let skip_tls_verify = smtp
        .get("skip_tls_verify")
        .and_then(parse_bool)
        .unwrap_or(false);
    Some(SmtpConfig {
        host,
        port,
        username,
        password,
        from,
        skip_tls_verify,
    })
}

fn parse_string_list(value: &toml::Value, key: &str) -> Option<Vec<String>> {
    let list = value.get(key)?.as_array()?;
    let mut out = Vec::new();
    for item in list {
        if let Some(s) = item.as_str() {
            out.push(s.to_string());
        }
    }
    if out.is_empty() { None } else { Some(out) }
}

fn parse_bool(value: &toml::Value) -> Option<bool> {
    value.as_bool().or_else(|| {
        value
            .as_str()
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
    })
}
