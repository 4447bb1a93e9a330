//! `OpenAI` Assistants v2 gateway.
//!
//! Implements [`AssistantGateway`] over the REST endpoints under `/v1`,
//! authenticating with a bearer token and opting into the v2 beta.

use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;

use super::types::ListPage;
use super::{
    Assistant, AssistantGateway, AssistantRequest, Attachment, FileObject, FilePurpose,
    FileUpload, GatewayError, GatewaySettings, Message, Run, Thread,
};

/// Page size used when listing thread messages.
const MESSAGE_PAGE_LIMIT: &str = "100";

/// Gateway backed by the `OpenAI` Assistants API.
#[derive(Clone)]
pub struct OpenAiGateway {
    http: reqwest::Client,
    settings: GatewaySettings,
}

impl std::fmt::Debug for OpenAiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGateway")
            .field("settings", &self.settings)
            .finish()
    }
}

impl OpenAiGateway {
    /// Beta header required by the assistants endpoints.
    const BETA_HEADER: (&'static str, &'static str) = ("OpenAI-Beta", "assistants=v2");

    /// Create a gateway client. Fails if no API key is configured.
    pub fn new(settings: GatewaySettings) -> Result<Self, GatewayError> {
        if settings.api_key.trim().is_empty() {
            return Err(GatewayError::MissingCredential);
        }

        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self { http, settings })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}",
            self.settings.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let (name, value) = Self::BETA_HEADER;
        let mut rb = self
            .http
            .request(method, self.url(path))
            .bearer_auth(&self.settings.api_key)
            .header(name, value);
        if let Some(org) = &self.settings.organization {
            rb = rb.header("OpenAI-Organization", org);
        }
        rb
    }
}

/// Send a request and decode a JSON body, mapping non-2xx to [`GatewayError::Api`].
async fn send_json<T: DeserializeOwned>(rb: RequestBuilder) -> Result<T, GatewayError> {
    let response = rb.send().await?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Api {
            status: status.as_u16(),
            message: api_error_message(&body),
        });
    }

    Ok(response.json().await?)
}

/// Extract `error.message` from an error body, falling back to the raw text.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(ToString::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait::async_trait]
impl AssistantGateway for OpenAiGateway {
    async fn create_assistant(&self, request: AssistantRequest) -> Result<Assistant, GatewayError> {
        tracing::debug!(name = %request.name, model = %request.model, "Creating assistant");
        let rb = self.request(Method::POST, "assistants").json(&request);
        send_json(rb).await
    }

    async fn create_thread(&self) -> Result<Thread, GatewayError> {
        tracing::debug!("Creating thread");
        let rb = self.request(Method::POST, "threads").json(&json!({}));
        send_json(rb).await
    }

    async fn add_message(
        &self,
        thread_id: &str,
        content: &str,
        file_ids: &[String],
    ) -> Result<Message, GatewayError> {
        tracing::debug!(
            thread_id = %thread_id,
            content_length = content.len(),
            attachments = file_ids.len(),
            "Adding message"
        );

        let attachments: Vec<Attachment> = file_ids
            .iter()
            .map(|id| Attachment::with_all_tools(id.as_str()))
            .collect();
        let body = json!({
            "role": "user",
            "content": content,
            "attachments": attachments,
        });

        let rb = self
            .request(Method::POST, &format!("threads/{thread_id}/messages"))
            .json(&body);
        send_json(rb).await
    }

    async fn start_run(&self, assistant_id: &str, thread_id: &str) -> Result<Run, GatewayError> {
        tracing::debug!(thread_id = %thread_id, assistant_id = %assistant_id, "Starting run");
        let rb = self
            .request(Method::POST, &format!("threads/{thread_id}/runs"))
            .json(&json!({ "assistant_id": assistant_id }));
        send_json(rb).await
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, GatewayError> {
        tracing::trace!(thread_id = %thread_id, run_id = %run_id, "Fetching run");
        let rb = self.request(Method::GET, &format!("threads/{thread_id}/runs/{run_id}"));
        send_json(rb).await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run, GatewayError> {
        tracing::debug!(thread_id = %thread_id, run_id = %run_id, "Cancelling run");
        let rb = self.request(
            Method::POST,
            &format!("threads/{thread_id}/runs/{run_id}/cancel"),
        );
        send_json(rb).await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, GatewayError> {
        let path = format!("threads/{thread_id}/messages");
        let mut messages = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut rb = self
                .request(Method::GET, &path)
                .query(&[("order", "desc"), ("limit", MESSAGE_PAGE_LIMIT)]);
            if let Some(cursor) = &after {
                rb = rb.query(&[("after", cursor.as_str())]);
            }

            let ListPage {
                data,
                has_more,
                last_id,
            } = send_json::<ListPage<Message>>(rb).await?;
            messages.extend(data);

            match last_id {
                Some(id) if has_more => after = Some(id),
                _ => break,
            }
        }

        tracing::debug!(thread_id = %thread_id, count = messages.len(), "Listed messages");
        Ok(messages)
    }

    async fn upload_file(
        &self,
        file: FileUpload,
        purpose: FilePurpose,
    ) -> Result<FileObject, GatewayError> {
        let mime_type = file.mime_type();
        let FileUpload {
            filename, bytes, ..
        } = file;

        tracing::debug!(
            filename = %filename,
            size = bytes.len(),
            mime_type = %mime_type,
            purpose = purpose.as_str(),
            "Uploading file"
        );

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str(&mime_type)?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", purpose.as_str())
            .part("file", part);

        let rb = self.request(Method::POST, "files").multipart(form);
        send_json(rb).await
    }
}
