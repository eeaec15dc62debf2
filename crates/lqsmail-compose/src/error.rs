use lqsmail_core::SubmissionState;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error("form is not editable while {state}")]
    NotEditable { state: SubmissionState },

    #[error("compose session is closed")]
    Closed,

    #[error("no line item with asin {asin:?}")]
    UnknownItem { asin: String },

    #[error("attachment index {index} out of range ({len} attached)")]
    AttachmentIndex { index: usize, len: usize },

    #[error("could not build export: {0}")]
    Export(String),
}
