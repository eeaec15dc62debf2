use std::sync::OnceLock;

use regex::Regex;

use crate::FieldErrors;

pub const INVALID_EMAIL_MESSAGE: &str = "Invalid email address";
pub const REQUIRED_MESSAGE: &str = "required";
pub const REQUIRED_FIELDS_BANNER: &str = "Please fill out all required fields.";

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^\s@,]+@[^\s@,]+\.[^\s@,]+$").expect("address pattern compiles")
    })
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag pattern compiles"))
}

pub fn is_valid_address(addr: &str) -> bool {
    address_pattern().is_match(addr)
}

/// Trimmed, non-empty comma separated segments of a cc field.
pub fn parse_cc_list(cc: &str) -> Vec<String> {
    cc.split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Blank segments are ignored, so a field with no address at all is valid.
pub fn is_valid_cc(cc: &str) -> bool {
    parse_cc_list(cc)
        .iter()
        .all(|segment| is_valid_address(segment))
}

/// Rich text with no visible characters (`<p><br></p>`, `&nbsp;`) counts as blank.
pub fn is_blank_body(body: Option<&str>) -> bool {
    let Some(body) = body else {
        return true;
    };
    let stripped = tag_pattern().replace_all(body, " ");
    let decoded = html_escape::decode_html_entities(&stripped);
    decoded
        .chars()
        .all(|ch| ch.is_whitespace() || ch == '\u{a0}' || ch == '\u{200b}')
}

pub fn validate(cc_address: &str, body_text: Option<&str>, line_item_mode: bool) -> FieldErrors {
    let mut errors = FieldErrors::default();
    if !is_valid_cc(cc_address) {
        errors.cc = Some(INVALID_EMAIL_MESSAGE.to_string());
    }
    if !line_item_mode && is_blank_body(body_text) {
        errors.body = Some(REQUIRED_MESSAGE.to_string());
    }
    if !errors.is_empty() {
        tracing::debug!(?errors, line_item_mode, "compose form failed validation");
    }
    errors
}
