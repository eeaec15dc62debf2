//! Submission lifecycle for vendor optimization requests.

mod attachments;
mod controller;
mod error;
mod scheduler;

pub use attachments::{AttachmentManager, assemble_attachments, needs_export};
pub use controller::{Capabilities, Presentation, SendOutcome, SubmissionController, subject_for};
pub use error::ComposeError;
pub use scheduler::{CloseOutcome, NotificationScheduler, ScheduledClose};
