use lqsmail_core::{
    Attachment, ExportFile, HeaderColumn, LineItem, TabularExporter, UserFile,
};

use crate::ComposeError;

/// Exports are generated only above the threshold, never at it.
pub fn needs_export(item_count: usize, threshold: usize) -> bool {
    item_count > threshold
}

/// Export first, then user files in the order they were added. `None` when
/// there is nothing to attach so the request omits the field.
pub fn assemble_attachments(
    export: Option<ExportFile>,
    user_files: &[UserFile],
) -> Option<Vec<Attachment>> {
    let mut out = Vec::with_capacity(user_files.len() + usize::from(export.is_some()));
    if let Some(export) = export {
        out.push(Attachment::GeneratedCsv(export));
    }
    out.extend(user_files.iter().cloned().map(Attachment::UserFile));
    if out.is_empty() { None } else { Some(out) }
}

pub struct AttachmentManager<'a> {
    exporter: &'a dyn TabularExporter,
    threshold: usize,
    file_name: &'a str,
}

impl<'a> AttachmentManager<'a> {
    pub fn new(exporter: &'a dyn TabularExporter, threshold: usize, file_name: &'a str) -> Self {
        Self {
            exporter,
            threshold,
            file_name,
        }
    }

    pub fn assemble(
        &self,
        headers: &[HeaderColumn],
        merged_items: &[LineItem],
        user_files: &[UserFile],
    ) -> Result<Option<Vec<Attachment>>, ComposeError> {
        let export = if needs_export(merged_items.len(), self.threshold) {
            let file = self
                .exporter
                .build_export(headers, merged_items, self.file_name)
                .map_err(|err| ComposeError::Export(format!("{err:#}")))?;
            tracing::debug!(
                filename = %file.filename,
                items = merged_items.len(),
                "item count above export threshold, attaching export"
            );
            Some(file)
        } else {
            None
        };
        Ok(assemble_attachments(export, user_files))
    }
}
