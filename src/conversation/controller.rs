//! Conversation controller.
//!
//! Owns the presented state of one chat session and drives the
//! initialize / send / upload / create-assistant workflows against the
//! gateway.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, instrument};

use super::in_flight::{InFlightInfo, InFlightSlot, Operation};
use super::poller::{PollError, RunPoller};
use crate::gateway::{
    Assistant, AssistantGateway, AssistantRequest, FileObject, FilePurpose, FileUpload,
    GatewayError, Message, display_order,
};

/// Settings for assistants created by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantDefaults {
    /// Name of the assistant created at session start.
    pub name: String,
    /// Instructions of the assistant created at session start.
    pub instructions: String,
    /// Model used for every assistant the controller creates.
    pub model: String,
}

impl Default for AssistantDefaults {
    fn default() -> Self {
        Self {
            name: "Default Assistant".to_string(),
            instructions: String::new(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Why a send step failed.
#[derive(Debug, thiserror::Error)]
pub enum SendFailure {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Poll(#[from] PollError),
}

/// Errors surfaced by controller operations.
///
/// The `Display` text is the user-facing message; causes are only logged.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Failed to create initial assistant")]
    InitialAssistant(#[source] GatewayError),

    #[error("Failed to create a new thread")]
    InitialThread(#[source] GatewayError),

    #[error("Failed to send message or get response")]
    Send(#[source] SendFailure),

    #[error("Failed to upload file")]
    Upload(#[source] GatewayError),

    #[error("Failed to create new assistant")]
    CreateAssistant(#[source] GatewayError),

    #[error("Assistant name and instructions are required")]
    InvalidAssistant,

    #[error("No file selected")]
    NoFileSelected,

    #[error("Unknown assistant: {0}")]
    UnknownAssistant(String),

    #[error("A {0} is already in progress")]
    Busy(Operation),

    #[error("The {0} was cancelled")]
    Cancelled(Operation),
}

impl ControllerError {
    /// Whether this error came from session start-up.
    #[must_use]
    pub fn is_initialization(&self) -> bool {
        matches!(self, Self::InitialAssistant(_) | Self::InitialThread(_))
    }
}

/// Why a send was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EmptyInput,
    NoThread,
    NoAssistant,
}

/// Result of a send that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    /// The run completed and the message list was refreshed.
    Completed { run_id: String, message_count: usize },
    /// Preconditions were not met; nothing was sent.
    Skipped { reason: SkipReason },
}

#[derive(Debug, Default)]
struct ConversationState {
    assistants: Vec<Assistant>,
    selected_assistant: Option<String>,
    thread_id: Option<String>,
    messages: Vec<Message>,
    pending_files: Vec<FileObject>,
    error: Option<String>,
}

/// Serializable copy of the presented state.
///
/// Each serialized message also carries its rendered `text`.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSnapshot {
    pub assistants: Vec<Assistant>,
    pub selected_assistant: Option<String>,
    pub thread_id: Option<String>,
    #[serde(serialize_with = "serialize_messages")]
    pub messages: Vec<Message>,
    pub pending_files: Vec<FileObject>,
    pub error: Option<String>,
    pub in_flight: Option<InFlightInfo>,
}

#[derive(Serialize)]
struct MessageView<'a> {
    #[serde(flatten)]
    message: &'a Message,
    text: String,
}

fn serialize_messages<S: serde::Serializer>(
    messages: &[Message],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(messages.iter().map(|message| MessageView {
        text: message.text(),
        message,
    }))
}

/// Drives one chat session against the gateway.
pub struct ConversationController {
    gateway: Arc<dyn AssistantGateway>,
    poller: RunPoller,
    defaults: AssistantDefaults,
    state: RwLock<ConversationState>,
    in_flight: InFlightSlot,
    init_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ConversationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationController")
            .field("poller", &self.poller)
            .field("defaults", &self.defaults)
            .field("in_flight", &self.in_flight.current())
            .finish()
    }
}

impl ConversationController {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn AssistantGateway>,
        poller: RunPoller,
        defaults: AssistantDefaults,
    ) -> Self {
        Self {
            gateway,
            poller,
            defaults,
            state: RwLock::new(ConversationState::default()),
            in_flight: InFlightSlot::new(),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ConversationState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ConversationState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_error(&self, err: &ControllerError) {
        self.write().error = Some(err.to_string());
    }

    /// Create the default assistant and the session thread.
    ///
    /// Only missing pieces are created, so calling this again after a
    /// partial failure retries just what failed. Both calls run
    /// concurrently; the first failure is returned and every failure is
    /// recorded. Overlapping calls are serialized, so the later one sees
    /// what the earlier one created.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), ControllerError> {
        let _init = self.init_lock.lock().await;
        let (need_assistant, need_thread) = {
            let state = self.read();
            (state.assistants.is_empty(), state.thread_id.is_none())
        };

        let create_assistant = async {
            if !need_assistant {
                return Ok(None);
            }
            let request = AssistantRequest::new(
                &self.defaults.name,
                &self.defaults.instructions,
                &self.defaults.model,
            );
            self.gateway.create_assistant(request).await.map(Some)
        };
        let create_thread = async {
            if !need_thread {
                return Ok(None);
            }
            self.gateway.create_thread().await.map(Some)
        };

        let (assistant, thread) = tokio::join!(create_assistant, create_thread);
        let mut first_error = None;

        match assistant {
            Ok(Some(assistant)) => {
                tracing::info!(assistant_id = %assistant.id, "Initial assistant created");
                let mut state = self.write();
                state.selected_assistant = Some(assistant.id.clone());
                state.assistants.push(assistant);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "Failed to create initial assistant");
                let err = ControllerError::InitialAssistant(e);
                self.record_error(&err);
                first_error = Some(err);
            }
        }

        match thread {
            Ok(Some(thread)) => {
                tracing::info!(thread_id = %thread.id, "Thread created");
                self.write().thread_id = Some(thread.id);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "Failed to create thread");
                let err = ControllerError::InitialThread(e);
                self.record_error(&err);
                first_error.get_or_insert(err);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Send `content` with all pending attachments and wait for the reply.
    ///
    /// Steps run strictly in order: post the message, start a run, wait
    /// for it to finish, then replace the local list with the refreshed
    /// thread. Any failure aborts the send with one generic error.
    pub async fn send_message(&self, content: &str) -> Result<SendOutcome, ControllerError> {
        if content.trim().is_empty() {
            return Ok(SendOutcome::Skipped {
                reason: SkipReason::EmptyInput,
            });
        }

        let (thread_id, assistant_id) = {
            let state = self.read();
            match (&state.thread_id, &state.selected_assistant) {
                (None, _) => {
                    return Ok(SendOutcome::Skipped {
                        reason: SkipReason::NoThread,
                    });
                }
                (_, None) => {
                    return Ok(SendOutcome::Skipped {
                        reason: SkipReason::NoAssistant,
                    });
                }
                (Some(t), Some(a)) => (t.clone(), a.clone()),
            }
        };

        let guard = self
            .in_flight
            .begin(Operation::SendMessage)
            .map_err(ControllerError::Busy)?;
        self.write().error = None;

        let span = tracing::info_span!(
            "send_message",
            request_id = %guard.id(),
            thread_id = %thread_id,
            assistant_id = %assistant_id,
        );
        let result = self
            .run_send(&thread_id, &assistant_id, content, guard.cancel_token())
            .instrument(span)
            .await;

        match result {
            Ok((run_id, message_count)) => Ok(SendOutcome::Completed {
                run_id,
                message_count,
            }),
            Err(SendFailure::Poll(PollError::Cancelled { run_id })) => {
                tracing::info!(request_id = %guard.id(), run_id = %run_id, "Send cancelled");
                Err(ControllerError::Cancelled(Operation::SendMessage))
            }
            Err(failure) => {
                tracing::error!(
                    request_id = %guard.id(),
                    thread_id = %thread_id,
                    error = %failure,
                    "Send failed"
                );
                let err = ControllerError::Send(failure);
                self.record_error(&err);
                Err(err)
            }
        }
    }

    async fn run_send(
        &self,
        thread_id: &str,
        assistant_id: &str,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, usize), SendFailure> {
        let file_ids: Vec<String> = self
            .read()
            .pending_files
            .iter()
            .map(|f| f.id.clone())
            .collect();

        let message = self
            .gateway
            .add_message(thread_id, content, &file_ids)
            .await?;
        tracing::info!(message_id = %message.id, attachments = file_ids.len(), "Message added");
        {
            let mut state = self.write();
            state.messages.push(message);
            state.pending_files.clear();
        }

        let run = self.gateway.start_run(assistant_id, thread_id).await?;
        tracing::info!(run_id = %run.id, status = %run.status, "Run started");

        if let Err(err) = self
            .poller
            .wait_for_completion(thread_id, &run.id, cancel)
            .await
        {
            // An abandoned run would keep the thread locked for later sends.
            if matches!(err, PollError::Cancelled { .. } | PollError::TimedOut { .. }) {
                if let Err(e) = self.gateway.cancel_run(thread_id, &run.id).await {
                    tracing::warn!(run_id = %run.id, error = %e, "Failed to cancel run remotely");
                }
            }
            return Err(err.into());
        }

        let listed = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(PollError::Cancelled { run_id: run.id.clone() }.into());
            }
            listed = self.gateway.list_messages(thread_id) => listed?,
        };
        let messages = display_order(listed);
        let count = messages.len();
        self.write().messages = messages;
        tracing::info!(run_id = %run.id, message_count = count, "Messages refreshed");

        Ok((run.id, count))
    }

    /// Upload a file and queue it as an attachment for the next send.
    #[instrument(skip(self, file), fields(filename = %file.filename, size = file.bytes.len()))]
    pub async fn upload_file(&self, file: FileUpload) -> Result<FileObject, ControllerError> {
        if file.filename.trim().is_empty() {
            return Err(ControllerError::NoFileSelected);
        }

        let guard = self
            .in_flight
            .begin(Operation::UploadFile)
            .map_err(ControllerError::Busy)?;
        self.write().error = None;

        let result = tokio::select! {
            biased;
            () = guard.cancel_token().cancelled() => {
                tracing::info!(request_id = %guard.id(), "Upload cancelled");
                return Err(ControllerError::Cancelled(Operation::UploadFile));
            }
            result = self.gateway.upload_file(file, FilePurpose::Assistants) => result,
        };

        match result {
            Ok(file) => {
                tracing::info!(file_id = %file.id, "File uploaded");
                self.write().pending_files.push(file.clone());
                Ok(file)
            }
            Err(e) => {
                tracing::error!(error = %e, "File upload failed");
                let err = ControllerError::Upload(e);
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Create an assistant with the default model and select it.
    #[instrument(skip(self, instructions))]
    pub async fn create_assistant(
        &self,
        name: &str,
        instructions: &str,
    ) -> Result<Assistant, ControllerError> {
        if name.trim().is_empty() || instructions.trim().is_empty() {
            return Err(ControllerError::InvalidAssistant);
        }

        let request = AssistantRequest::new(name, instructions, &self.defaults.model);
        match self.gateway.create_assistant(request).await {
            Ok(assistant) => {
                tracing::info!(assistant_id = %assistant.id, "Assistant created");
                let mut state = self.write();
                state.selected_assistant = Some(assistant.id.clone());
                state.assistants.push(assistant.clone());
                Ok(assistant)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to create assistant");
                let err = ControllerError::CreateAssistant(e);
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Point the selection at an existing assistant.
    pub fn select_assistant(&self, assistant_id: &str) -> Result<(), ControllerError> {
        let mut state = self.write();
        if !state.assistants.iter().any(|a| a.id == assistant_id) {
            return Err(ControllerError::UnknownAssistant(assistant_id.to_string()));
        }
        state.selected_assistant = Some(assistant_id.to_string());
        tracing::debug!(assistant_id = %assistant_id, "Assistant selected");
        Ok(())
    }

    /// Cancel the running send or upload, if any.
    pub fn cancel(&self) -> Option<Operation> {
        let cancelled = self.in_flight.cancel();
        if let Some(op) = cancelled {
            tracing::info!(operation = %op, "Cancellation requested");
        }
        cancelled
    }

    /// Whether a send or upload is running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_busy()
    }

    #[must_use]
    pub fn snapshot(&self) -> ConversationSnapshot {
        let state = self.read();
        ConversationSnapshot {
            assistants: state.assistants.clone(),
            selected_assistant: state.selected_assistant.clone(),
            thread_id: state.thread_id.clone(),
            messages: state.messages.clone(),
            pending_files: state.pending_files.clone(),
            error: state.error.clone(),
            in_flight: self.in_flight.current(),
        }
    }
}
