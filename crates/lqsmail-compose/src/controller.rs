use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use lqsmail_content::{PayloadContext, TemplateInput, TemplateStyle, merge_annotations, render_body};
use lqsmail_core::{
    Alerts, ComposeConfig, EmailSender, FieldErrors, FormState, ItemAnnotations, LineItem,
    ModalControl, OutboundEmailRequest, REQUIRED_FIELDS_BANNER, RowSelection, SendOptions,
    SessionContext, Severity, SubmissionState, THANK_YOU_HEADER, THANK_YOU_TEXT, TabularExporter,
    UserFile, is_blank_body, parse_cc_list, validate,
};

use crate::{AttachmentManager, ComposeError, NotificationScheduler, ScheduledClose};

const TRANSITION_CHANNEL_CAPACITY: usize = 32;

/// External actions the controller is allowed to perform.
#[derive(Clone)]
pub struct Capabilities {
    pub sender: Arc<dyn EmailSender>,
    pub alerts: Arc<dyn Alerts>,
    pub exporter: Arc<dyn TabularExporter>,
    pub selection: Arc<dyn RowSelection>,
    pub modal: Arc<dyn ModalControl>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent,
    Invalid(FieldErrors),
    Failed(String),
    /// A submission was already in flight, or the session was closed.
    Ignored(SubmissionState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    Form,
    ThankYou,
    Closed,
}

impl Presentation {
    /// Header and text of the notification replacing the form, if any.
    pub fn notification(self) -> Option<(&'static str, &'static str)> {
        match self {
            Presentation::ThankYou => Some((THANK_YOU_HEADER, THANK_YOU_TEXT)),
            Presentation::Form | Presentation::Closed => None,
        }
    }
}

pub fn subject_for(sender_email: &str) -> String {
    format!("Listing optimization request from Vendor {}", sender_email)
}

#[derive(Debug, Default)]
struct Session {
    form: FormState,
    annotations: ItemAnnotations,
    closed: bool,
}

impl Session {
    fn shut(&mut self) {
        self.form = FormState::default();
        self.annotations.clear();
        self.closed = true;
    }
}

fn transition(
    session: &mut Session,
    transitions: &broadcast::Sender<SubmissionState>,
    to: SubmissionState,
) {
    let from = session.form.submission_state;
    session.form.submission_state = to;
    tracing::debug!(%from, %to, "submission state changed");
    let _ = transitions.send(to);
}

fn lock_session(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SubmissionController {
    context: SessionContext,
    config: ComposeConfig,
    style: TemplateStyle,
    caps: Capabilities,
    scheduler: NotificationScheduler,
    session: Arc<Mutex<Session>>,
    close_timer: Mutex<Option<ScheduledClose>>,
    transitions: broadcast::Sender<SubmissionState>,
}

impl SubmissionController {
    pub fn new(
        context: SessionContext,
        caps: Capabilities,
        config: ComposeConfig,
        style: TemplateStyle,
    ) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            context,
            config,
            style,
            caps,
            scheduler: NotificationScheduler::new(),
            session: Arc::new(Mutex::new(Session::default())),
            close_timer: Mutex::new(None),
            transitions,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        lock_session(&self.session)
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Receives every state the controller enters from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SubmissionState> {
        self.transitions.subscribe()
    }

    pub fn state(&self) -> SubmissionState {
        self.lock().form.submission_state
    }

    pub fn form(&self) -> FormState {
        self.lock().form.clone()
    }

    pub fn annotations(&self) -> ItemAnnotations {
        self.lock().annotations.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn presentation(&self) -> Presentation {
        let session = self.lock();
        if session.closed {
            return Presentation::Closed;
        }
        match session.form.submission_state {
            SubmissionState::Idle | SubmissionState::Validating | SubmissionState::Sending => {
                Presentation::Form
            }
            SubmissionState::Sent | SubmissionState::ClosingTimer => Presentation::ThankYou,
        }
    }

    pub fn can_send(&self) -> bool {
        let session = self.lock();
        !session.closed && session.form.submission_state == SubmissionState::Idle
    }

    fn edit<T>(
        &self,
        apply: impl FnOnce(&mut Session) -> Result<T, ComposeError>,
    ) -> Result<T, ComposeError> {
        let mut session = self.lock();
        if session.closed {
            return Err(ComposeError::Closed);
        }
        let state = session.form.submission_state;
        if state != SubmissionState::Idle {
            return Err(ComposeError::NotEditable { state });
        }
        apply(&mut session)
    }

    pub fn begin_cc_edit(&self) -> Result<(), ComposeError> {
        self.edit(|session| {
            session.form.cc_editing = true;
            Ok(())
        })
    }

    pub fn set_cc(&self, value: &str) -> Result<(), ComposeError> {
        self.edit(|session| {
            session.form.cc_error = None;
            session.form.cc_address = value.to_string();
            Ok(())
        })
    }

    /// A pending `required` error clears as soon as visible content arrives.
    pub fn set_body(&self, body: Option<String>) -> Result<(), ComposeError> {
        self.edit(|session| {
            if session.form.body_error.is_some() && !is_blank_body(body.as_deref()) {
                session.form.body_error = None;
            }
            session.form.body_text = body;
            Ok(())
        })
    }

    pub fn set_annotation(&self, asin: &str, note: &str) -> Result<(), ComposeError> {
        if !self.context.items.iter().any(|item| item.asin == asin) {
            return Err(ComposeError::UnknownItem {
                asin: asin.to_string(),
            });
        }
        self.edit(|session| {
            session
                .annotations
                .insert(asin.to_string(), note.to_string());
            Ok(())
        })
    }

    pub fn add_attachment(&self, file: UserFile) -> Result<(), ComposeError> {
        self.edit(|session| {
            session.form.attachments.push(file);
            Ok(())
        })
    }

    pub fn remove_attachment(&self, index: usize) -> Result<UserFile, ComposeError> {
        self.edit(|session| {
            let len = session.form.attachments.len();
            if index >= len {
                return Err(ComposeError::AttachmentIndex { index, len });
            }
            Ok(session.form.attachments.remove(index))
        })
    }

    pub fn merged_items(&self) -> Vec<LineItem> {
        merge_annotations(&self.context.items, &self.lock().annotations)
    }

    /// Builds the request the current form would send, without validating.
    pub fn preview_request(&self) -> Result<OutboundEmailRequest, ComposeError> {
        let (form, annotations) = {
            let session = self.lock();
            (session.form.clone(), session.annotations.clone())
        };
        self.build_request(&form, &annotations)
    }

    fn build_request(
        &self,
        form: &FormState,
        annotations: &ItemAnnotations,
    ) -> Result<OutboundEmailRequest, ComposeError> {
        let merged = merge_annotations(&self.context.items, annotations);
        let cc_list = parse_cc_list(&form.cc_address);
        let cc = if cc_list.is_empty() {
            None
        } else {
            Some(form.cc_address.trim())
        };
        let ctx = PayloadContext {
            sender_email: &self.context.sender_email,
            cc,
            style: &self.style,
        };
        let input = TemplateInput::select(&self.context.headers, &merged, form.body_text.as_deref());
        let body = render_body(&ctx, &input);
        let attachments = AttachmentManager::new(
            self.caps.exporter.as_ref(),
            self.config.export_threshold,
            &self.config.export_file_name,
        )
        .assemble(&self.context.headers, &merged, &form.attachments)?;
        Ok(OutboundEmailRequest {
            subject: subject_for(&self.context.sender_email),
            recipients: self.context.recipients.clone(),
            cc_list: (!cc_list.is_empty()).then_some(cc_list),
            body,
            attachments,
        })
    }

    pub async fn send(&self) -> SendOutcome {
        let (form, annotations) = {
            let mut session = self.lock();
            let current = session.form.submission_state;
            if session.closed || current != SubmissionState::Idle {
                tracing::debug!(state = %current, closed = session.closed, "send ignored");
                return SendOutcome::Ignored(current);
            }
            transition(&mut session, &self.transitions, SubmissionState::Validating);
            let errors = validate(
                &session.form.cc_address,
                session.form.body_text.as_deref(),
                self.context.line_item_mode(),
            );
            session.form.cc_error = errors.cc.clone();
            session.form.body_error = errors.body.clone();
            if !errors.is_empty() {
                transition(&mut session, &self.transitions, SubmissionState::Idle);
                drop(session);
                self.caps
                    .alerts
                    .notify(REQUIRED_FIELDS_BANNER, Severity::Error);
                return SendOutcome::Invalid(errors);
            }
            transition(&mut session, &self.transitions, SubmissionState::Sending);
            (session.form.clone(), session.annotations.clone())
        };

        let request = match self.build_request(&form, &annotations) {
            Ok(request) => request,
            Err(err) => return self.fail(err.to_string()),
        };
        tracing::info!(
            subject = %request.subject,
            recipients = request.recipients.len(),
            attachments = request.attachments.as_ref().map_or(0, Vec::len),
            "dispatching optimization request"
        );
        let options = SendOptions {
            suppress_default_alert: true,
        };
        match self.caps.sender.send(&request, options).await {
            Ok(true) => {}
            Ok(false) => return self.fail("the sender rejected the request".to_string()),
            Err(err) => return self.fail(format!("{err:#}")),
        }

        {
            let mut session = self.lock();
            transition(&mut session, &self.transitions, SubmissionState::Sent);
            session.form.cc_address.clear();
            session.form.cc_editing = false;
        }
        self.caps.selection.clear_selection();
        self.schedule_close();
        SendOutcome::Sent
    }

    fn fail(&self, reason: String) -> SendOutcome {
        tracing::warn!(%reason, "optimization request failed");
        {
            let mut session = self.lock();
            transition(&mut session, &self.transitions, SubmissionState::Idle);
        }
        self.caps
            .alerts
            .notify(&format!("Email could not be sent: {}", reason), Severity::Error);
        SendOutcome::Failed(reason)
    }

    fn schedule_close(&self) {
        {
            let mut session = self.lock();
            transition(&mut session, &self.transitions, SubmissionState::ClosingTimer);
        }
        let session = Arc::clone(&self.session);
        let transitions = self.transitions.clone();
        let modal = Arc::clone(&self.caps.modal);
        let timer = self.scheduler.schedule(self.config.close_delay, move || {
            {
                let mut session = lock_session(&session);
                transition(&mut session, &transitions, SubmissionState::Idle);
                session.shut();
            }
            modal.close();
        });
        let previous = self
            .close_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(timer);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    /// Waits for a pending auto-close. Returns `false` if none was pending or
    /// it was cancelled. The timer stays cancellable by `close` meanwhile.
    pub async fn wait_for_close(&self) -> bool {
        let outcome = self
            .close_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(ScheduledClose::outcome);
        match outcome {
            Some(outcome) => outcome.wait().await,
            None => false,
        }
    }

    /// Manual close. A pending auto-close keeps running unless
    /// `cancel_close_timer_on_manual_close` is set.
    pub fn close(&self) {
        if self.config.cancel_close_timer_on_manual_close {
            let timer = self
                .close_timer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(timer) = timer {
                timer.cancel();
            }
        }
        {
            let mut session = self.lock();
            if session.form.submission_state != SubmissionState::Idle {
                transition(&mut session, &self.transitions, SubmissionState::Idle);
            }
            session.shut();
        }
        self.caps.modal.close();
    }
}
