//! Email body templates and tabular export for optimization requests.

use std::borrow::Cow;

use anyhow::{Result, anyhow};
use html_escape::{encode_double_quoted_attribute, encode_safe};

use lqsmail_core::{
    ExportFile, HeaderColumn, ItemAnnotations, LineItem, TabularExporter, parse_cc_list,
};

pub const CSV_MIME: &str = "text/csv";
const NO_DETAILS_LABEL: &str = "No additional details";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateStyle {
    pub font_family: String,
    pub font_size_px: u16,
}

impl Default for TemplateStyle {
    fn default() -> Self {
        Self {
            font_family: "Arial, sans-serif".to_string(),
            font_size_px: 14,
        }
    }
}

/// Which request template a session renders. Chosen by whether line items exist.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TemplateInput<'a> {
    Items {
        headers: &'a [HeaderColumn],
        items: &'a [LineItem],
    },
    Text {
        body: &'a str,
    },
}

impl<'a> TemplateInput<'a> {
    pub fn select(
        headers: &'a [HeaderColumn],
        merged_items: &'a [LineItem],
        body: Option<&'a str>,
    ) -> Self {
        if merged_items.is_empty() {
            TemplateInput::Text {
                body: body.unwrap_or(""),
            }
        } else {
            TemplateInput::Items {
                headers,
                items: merged_items,
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PayloadContext<'a> {
    pub sender_email: &'a str,
    pub cc: Option<&'a str>,
    pub style: &'a TemplateStyle,
}

/// Copies every item with its annotation attached. Items without a note get
/// `details = None` so the template can say so.
pub fn merge_annotations(items: &[LineItem], annotations: &ItemAnnotations) -> Vec<LineItem> {
    items
        .iter()
        .map(|item| LineItem {
            details: annotations.get(&item.asin).cloned(),
            ..item.clone()
        })
        .collect()
}

pub fn render_body(ctx: &PayloadContext<'_>, input: &TemplateInput<'_>) -> String {
    let content = match input {
        TemplateInput::Items { headers, items } => {
            vendor_optimization_request(ctx, headers, items)
        }
        TemplateInput::Text { body } => vendor_optimization_request_text(ctx, body),
    };
    wrap_document(ctx.style, &content)
}

fn vendor_optimization_request(
    ctx: &PayloadContext<'_>,
    headers: &[HeaderColumn],
    items: &[LineItem],
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "<p>Vendor <strong>{}</strong> has requested listing optimization for the following {} item{}.</p>",
        encode_safe(ctx.sender_email),
        items.len(),
        if items.len() == 1 { "" } else { "s" }
    ));
    push_cc_line(&mut out, ctx.cc);
    out.push_str(
        "<table style=\"border-collapse: collapse; width: 100%;\" cellpadding=\"6\"><thead><tr>",
    );
    for header in headers {
        out.push_str(&format!(
            "<th style=\"border: 1px solid #cccccc; text-align: left;\">{}</th>",
            encode_safe(&header.label)
        ));
    }
    out.push_str("</tr></thead><tbody>");
    for item in items {
        out.push_str("<tr>");
        for header in headers {
            out.push_str("<td style=\"border: 1px solid #cccccc; vertical-align: top;\">");
            let value = item.column_value(&header.key);
            if header.key == "details" && value.trim().is_empty() {
                out.push_str(&format!(
                    "<span style=\"color: #888888;\">{}</span>",
                    NO_DETAILS_LABEL
                ));
            } else {
                out.push_str(&encode_safe(&value));
            }
            out.push_str("</td>");
        }
        out.push_str("</tr>");
    }
    out.push_str("</tbody></table>");
    out
}

fn vendor_optimization_request_text(ctx: &PayloadContext<'_>, body: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "<p>Vendor <strong>{}</strong> has requested listing optimization.</p>",
        encode_safe(ctx.sender_email)
    ));
    push_cc_line(&mut out, ctx.cc);
    out.push_str("<div>");
    out.push_str(&sanitize_rich_text(body));
    out.push_str("</div>");
    out
}

fn push_cc_line(out: &mut String, cc: Option<&str>) {
    let Some(cc) = cc else { return };
    let list = parse_cc_list(cc);
    if list.is_empty() {
        return;
    }
    out.push_str(&format!("<p>Cc: {}</p>", encode_safe(&list.join(", "))));
}

fn wrap_document(style: &TemplateStyle, content: &str) -> String {
    let font_family = style.font_family.trim();
    let font_family = if font_family.is_empty() {
        "Arial, sans-serif"
    } else {
        font_family
    };
    let css = format!(
        "font-family: {}; font-size: {}px; line-height: 1.4; margin: 0;",
        font_family,
        style.font_size_px.clamp(8, 72)
    );
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"></head><body><div style=\"{}\">{}</div></body></html>",
        encode_double_quoted_attribute(&css),
        content
    )
}

pub fn sanitize_rich_text(html: &str) -> String {
    let mut builder = ammonia::Builder::default();
    builder.add_tags(["font"]);
    builder.add_generic_attributes(["style"]);
    builder.add_tag_attributes("font", ["face", "size", "color"]);
    builder.clean(html).to_string()
}

fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn push_csv_record<'a>(out: &mut String, fields: impl Iterator<Item = Cow<'a, str>>) {
    let mut first = true;
    for field in fields {
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(&field);
    }
    out.push_str("\r\n");
}

/// Header labels, then one record per row resolved by column key.
pub fn render_csv(headers: &[HeaderColumn], rows: &[LineItem]) -> String {
    let mut out = String::new();
    push_csv_record(&mut out, headers.iter().map(|h| csv_field(&h.label)));
    for row in rows {
        let values: Vec<String> = headers.iter().map(|h| row.column_value(&h.key)).collect();
        push_csv_record(&mut out, values.iter().map(|v| csv_field(v)));
    }
    out
}

#[derive(Debug, Default, Clone)]
pub struct CsvExporter;

impl TabularExporter for CsvExporter {
    fn build_export(
        &self,
        headers: &[HeaderColumn],
        rows: &[LineItem],
        file_name: &str,
    ) -> Result<ExportFile> {
        if headers.is_empty() {
            return Err(anyhow!("export needs at least one column"));
        }
        let stem = file_name.trim();
        if stem.is_empty() {
            return Err(anyhow!("export file name is empty"));
        }
        let filename = if stem.to_ascii_lowercase().ends_with(".csv") {
            stem.to_string()
        } else {
            format!("{}.csv", stem)
        };
        let data = render_csv(headers, rows).into_bytes();
        tracing::debug!(%filename, rows = rows.len(), bytes = data.len(), "built csv export");
        Ok(ExportFile {
            filename,
            mime: CSV_MIME.to_string(),
            data,
        })
    }
}
