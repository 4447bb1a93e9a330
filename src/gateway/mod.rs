//! Remote assistant gateway.
//!
//! The gateway is the external service that owns assistants, threads,
//! messages, runs and files. This module defines the [`AssistantGateway`]
//! trait the rest of the crate talks to, plus the wire types it exchanges.
//!
//! # Implementations
//!
//! - [`OpenAiGateway`]: the `OpenAI` Assistants v2 API over HTTPS
//!
//! # Example
//!
//! ```rust,ignore
//! use assistant_chat::gateway::{GatewaySettings, OpenAiGateway};
//!
//! let settings = GatewaySettings {
//!     base_url: "https://api.openai.com".to_string(),
//!     api_key: "sk-...".to_string(),
//!     organization: None,
//!     request_timeout: std::time::Duration::from_secs(60),
//! };
//! let gateway = OpenAiGateway::new(settings)?;
//! let thread = gateway.create_thread().await?;
//! ```

pub mod openai;
pub mod types;

pub use openai::OpenAiGateway;
pub use types::{
    Assistant, AssistantRequest, Attachment, ContentBlock, FileObject, FilePurpose, FileUpload,
    Message, MessageRole, Run, RunError, RunStatus, Thread, Tool, display_order,
};

use std::time::Duration;

/// Connection settings for the remote gateway.
#[derive(Clone)]
pub struct GatewaySettings {
    /// Base URL without the `/v1` suffix (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// Client-held credential, injected from the environment at startup.
    pub api_key: String,
    /// Optional organization header.
    pub organization: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("organization", &self.organization)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Errors returned by gateway calls.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The request could not be sent or the response could not be read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with a non-success status.
    #[error("Gateway error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message reported by the gateway.
        message: String,
    },

    /// No credential was configured.
    #[error("Gateway API key not configured")]
    MissingCredential,
}

/// Operations offered by the remote assistant service.
///
/// Every call is a single request/response; none of them retry.
#[async_trait::async_trait]
pub trait AssistantGateway: Send + Sync {
    /// Create an assistant.
    async fn create_assistant(&self, request: AssistantRequest) -> Result<Assistant, GatewayError>;

    /// Create an empty conversation thread.
    async fn create_thread(&self) -> Result<Thread, GatewayError>;

    /// Post a user message, attaching the given uploaded files.
    async fn add_message(
        &self,
        thread_id: &str,
        content: &str,
        file_ids: &[String],
    ) -> Result<Message, GatewayError>;

    /// Start a run of `assistant_id` against `thread_id`.
    async fn start_run(&self, assistant_id: &str, thread_id: &str) -> Result<Run, GatewayError>;

    /// Fetch the current state of a run.
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, GatewayError>;

    /// Ask the gateway to stop a run.
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run, GatewayError>;

    /// All messages of a thread, newest first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, GatewayError>;

    /// Upload a file and return its identity.
    async fn upload_file(
        &self,
        file: FileUpload,
        purpose: FilePurpose,
    ) -> Result<FileObject, GatewayError>;
}
