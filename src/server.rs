use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::config::AppConfig;
use crate::conversation::{
    ControllerError, ConversationController, ConversationSnapshot, Operation, RunPoller,
    SendOutcome,
};
use crate::gateway::{Assistant, AssistantGateway, FileObject, FileUpload, OpenAiGateway};

/// Maximum accepted upload size in bytes (32MB).
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let settings = config.gateway_settings().map_err(anyhow::Error::msg)?;

    info!(
        name: "gateway.config.loaded",
        base_url = %settings.base_url,
        model = %config.assistant.model,
        "Gateway configuration loaded"
    );

    // One client for the whole process, shared by reference.
    let gateway: Arc<dyn AssistantGateway> = Arc::new(OpenAiGateway::new(settings)?);
    let poller = RunPoller::new(Arc::clone(&gateway), config.poll_policy());
    let controller = Arc::new(ConversationController::new(
        gateway,
        poller,
        config.assistant_defaults(),
    ));

    if let Err(e) = controller.initialize().await {
        tracing::warn!(error = %e, "Session initialization incomplete");
    }

    let state = AppState {
        controller: Arc::clone(&controller),
    };
    let app = router(state);

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        name: "server.started",
        address = %format!("http://{address}"),
        "Server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(controller))
        .await?;

    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

async fn shutdown_signal(controller: Arc<ConversationController>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown requested");
    controller.cancel();
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/state", get(api_state))
        .route("/api/session", post(api_initialize))
        .route("/api/messages", post(api_send_message))
        .route(
            "/api/files",
            post(api_upload_file).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/assistants", post(api_create_assistant))
        .route("/api/assistants/selected", put(api_select_assistant))
        .route("/api/cancel", post(api_cancel))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// JSON error body: `{"error": "..."}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<ControllerError> for ApiError {
    fn from(err: ControllerError) -> Self {
        let status = match &err {
            ControllerError::Busy(_) | ControllerError::Cancelled(_) => StatusCode::CONFLICT,
            ControllerError::InvalidAssistant | ControllerError::NoFileSelected => {
                StatusCode::BAD_REQUEST
            }
            ControllerError::UnknownAssistant(_) => StatusCode::NOT_FOUND,
            ControllerError::InitialAssistant(_)
            | ControllerError::InitialThread(_)
            | ControllerError::Send(_)
            | ControllerError::Upload(_)
            | ControllerError::CreateAssistant(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/state - Current conversation snapshot.
async fn api_state(State(state): State<AppState>) -> Json<ConversationSnapshot> {
    Json(state.controller.snapshot())
}

/// POST /api/session - Create whatever the session is missing.
async fn api_initialize(
    State(state): State<AppState>,
) -> Result<Json<ConversationSnapshot>, ApiError> {
    state.controller.initialize().await?;
    Ok(Json(state.controller.snapshot()))
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    content: String,
}

/// POST /api/messages - Send a message and wait for the reply.
async fn api_send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendOutcome>, ApiError> {
    tracing::info!(content_length = req.content.len(), "Send message request");
    let outcome = state.controller.send_message(&req.content).await?;
    Ok(Json(outcome))
}

/// POST /api/files - Upload one file from the `file` multipart field.
async fn api_upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<FileObject>, ApiError> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(ToString::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(e.status(), e.body_text()))?;

        let mut file = FileUpload::new(filename, bytes.to_vec());
        if let Some(ct) = content_type {
            file = file.with_content_type(ct);
        }
        upload = Some(file);
        break;
    }

    let upload = upload.ok_or(ControllerError::NoFileSelected)?;
    let file = state.controller.upload_file(upload).await?;
    Ok(Json(file))
}

#[derive(Debug, Deserialize)]
struct CreateAssistantRequest {
    name: String,
    instructions: String,
}

/// POST /api/assistants - Create and select an assistant.
async fn api_create_assistant(
    State(state): State<AppState>,
    Json(req): Json<CreateAssistantRequest>,
) -> Result<Json<Assistant>, ApiError> {
    let assistant = state
        .controller
        .create_assistant(&req.name, &req.instructions)
        .await?;
    Ok(Json(assistant))
}

#[derive(Debug, Deserialize)]
struct SelectAssistantRequest {
    assistant_id: String,
}

/// PUT /api/assistants/selected - Change the selected assistant.
async fn api_select_assistant(
    State(state): State<AppState>,
    Json(req): Json<SelectAssistantRequest>,
) -> Result<Json<ConversationSnapshot>, ApiError> {
    state.controller.select_assistant(&req.assistant_id)?;
    Ok(Json(state.controller.snapshot()))
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    cancelled: Option<Operation>,
}

/// POST /api/cancel - Cancel the running send or upload.
async fn api_cancel(State(state): State<AppState>) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.controller.cancel(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// HTML Page
// ─────────────────────────────────────────────────────────────────────────────

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Assistant Chat</title>
    <style>
        body { font-family: system-ui, sans-serif; max-width: 48rem; margin: 0 auto; padding: 1rem; }
        .message { padding: .5rem .75rem; margin: .5rem 0; border-radius: .5rem; white-space: pre-wrap; }
        .message.user { background: #e8f0fe; }
        .message.assistant { background: #f1f3f4; }
        .attachment { font-size: .8rem; color: #555; }
        .error { color: #b00020; }
        .row { display: flex; gap: .5rem; margin: .5rem 0; }
        .row input[type=text] { flex: 1; }
    </style>
</head>
<body>
    <div class="row">
        <select id="assistants"></select>
        <button id="new-assistant">Create New Assistant</button>
    </div>
    <div id="messages"></div>
    <div id="error" class="error"></div>
    <div class="row">
        <input id="input" type="text" placeholder="Type your message...">
        <button id="send">Send</button>
        <input id="file" type="file">
        <button id="cancel">Cancel</button>
    </div>
    <div id="pending" class="attachment"></div>
    <div id="loading" hidden>Loading...</div>
<script>
const $ = (id) => document.getElementById(id);

async function call(method, url, body) {
    const opts = { method };
    if (body instanceof FormData) {
        opts.body = body;
    } else if (body !== undefined) {
        opts.headers = { "Content-Type": "application/json" };
        opts.body = JSON.stringify(body);
    }
    const res = await fetch(url, opts);
    const data = await res.json().catch(() => ({}));
    if (!res.ok) throw new Error(data.error || res.statusText);
    return data;
}

function render(state) {
    const select = $("assistants");
    select.replaceChildren(...state.assistants.map((a) => {
        const opt = document.createElement("option");
        opt.value = a.id;
        opt.textContent = a.name || a.id;
        opt.selected = a.id === state.selected_assistant;
        return opt;
    }));

    $("messages").replaceChildren(...state.messages.map((m) => {
        const div = document.createElement("div");
        div.className = "message " + m.role;
        for (const att of m.attachments) {
            const span = document.createElement("div");
            span.className = "attachment";
            span.textContent = att.file_id;
            div.appendChild(span);
        }
        div.appendChild(document.createTextNode(m.text));
        return div;
    }));

    $("pending").textContent = state.pending_files.map((f) => f.filename).join(", ");
    $("error").textContent = state.error || "";
    const busy = state.in_flight !== null;
    for (const id of ["input", "send", "file"]) $(id).disabled = busy;
    $("loading").hidden = !busy;
}

async function refresh() {
    render(await call("GET", "/api/state"));
}

async function act(fn) {
    try { await fn(); } catch (e) { $("error").textContent = e.message; }
    await refresh();
}

$("send").onclick = () => act(async () => {
    const content = $("input").value;
    const pending = call("POST", "/api/messages", { content });
    $("input").value = "";
    setTimeout(refresh, 100);
    await pending;
});
$("file").onchange = () => act(async () => {
    const file = $("file").files[0];
    if (!file) return;
    const form = new FormData();
    form.append("file", file);
    await call("POST", "/api/files", form);
    $("file").value = "";
});
$("assistants").onchange = () => act(() =>
    call("PUT", "/api/assistants/selected", { assistant_id: $("assistants").value }));
$("new-assistant").onclick = () => act(async () => {
    const name = prompt("Enter assistant name:");
    const instructions = prompt("Enter assistant instructions:");
    if (name && instructions) await call("POST", "/api/assistants", { name, instructions });
});
$("cancel").onclick = () => act(() => call("POST", "/api/cancel"));

refresh();
</script>
</body>
</html>
"#;
