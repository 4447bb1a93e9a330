//! Scripted in-process gateway shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use assistant_chat::conversation::{
    AssistantDefaults, ConversationController, PollPolicy, RunPoller,
};
use assistant_chat::gateway::{
    Assistant, AssistantGateway, AssistantRequest, ContentBlock, FileObject, FilePurpose,
    FileUpload, GatewayError, Message, MessageRole, Run, RunStatus, Thread, Tool,
};
use chrono::Utc;
use tokio::sync::Semaphore;

/// A gateway call as observed by [`ScriptedGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateAssistant(AssistantRequest),
    CreateThread,
    AddMessage {
        thread_id: String,
        content: String,
        file_ids: Vec<String>,
    },
    StartRun {
        assistant_id: String,
        thread_id: String,
    },
    GetRun {
        thread_id: String,
        run_id: String,
    },
    CancelRun {
        run_id: String,
    },
    ListMessages {
        thread_id: String,
    },
    UploadFile {
        filename: String,
        purpose: FilePurpose,
    },
}

/// Gateway operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CreateAssistant,
    CreateThread,
    AddMessage,
    StartRun,
    GetRun,
    ListMessages,
    UploadFile,
}

/// In-memory gateway with scripted run statuses.
///
/// `get_run` pops statuses from the script and keeps repeating the last
/// one. A completed run appends one assistant reply to the thread log.
/// Creating an assistant or thread yields once, so overlapping callers
/// interleave.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    calls: Mutex<Vec<Call>>,
    statuses: Mutex<VecDeque<RunStatus>>,
    last_status: Mutex<Option<RunStatus>>,
    failing: Mutex<HashSet<Op>>,
    log: Mutex<Vec<Message>>,
    gate: Mutex<Option<(Op, Arc<Semaphore>)>>,
    next_id: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_statuses(statuses: &[RunStatus]) -> Arc<Self> {
        let gateway = Self::new();
        gateway.script(statuses);
        gateway
    }

    pub fn script(&self, statuses: &[RunStatus]) {
        let mut script = self.statuses.lock().unwrap();
        script.clear();
        script.extend(statuses.iter().copied());
    }

    pub fn fail(&self, op: Op) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn recover(&self, op: Op) {
        self.failing.lock().unwrap().remove(&op);
    }

    /// Make every call of `op` wait for a permit on the returned semaphore.
    pub fn gate(&self, op: Op) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some((op, Arc::clone(&gate)));
        gate
    }

    pub fn gate_run_status(&self) -> Arc<Semaphore> {
        self.gate(Op::GetRun)
    }

    async fn pass_gate(&self, op: Op) {
        let gate = self
            .gate
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(gated, _)| *gated == op)
            .map(|(_, gate)| Arc::clone(gate));
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn status_queries(&self) -> usize {
        self.count(|c| matches!(c, Call::GetRun { .. }))
    }

    pub fn list_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::ListMessages { .. }))
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, op: Op) -> Result<(), GatewayError> {
        if self.failing.lock().unwrap().contains(&op) {
            return Err(GatewayError::Api {
                status: 500,
                message: format!("{op:?} failed"),
            });
        }
        Ok(())
    }

    fn id(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn message(&self, thread_id: &str, role: MessageRole, text: &str, file_ids: &[String]) -> Message {
        Message {
            id: self.id("msg"),
            thread_id: thread_id.to_string(),
            role,
            content: vec![ContentBlock::text(text)],
            attachments: file_ids
                .iter()
                .map(|id| assistant_chat::gateway::Attachment::with_all_tools(id.as_str()))
                .collect(),
            assistant_id: None,
            run_id: None,
            created_at: Utc::now(),
        }
    }

    fn next_status(&self) -> RunStatus {
        let mut last = self.last_status.lock().unwrap();
        let status = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .or(*last)
            .unwrap_or(RunStatus::Completed);
        *last = Some(status);
        status
    }
}

#[async_trait::async_trait]
impl AssistantGateway for ScriptedGateway {
    async fn create_assistant(&self, request: AssistantRequest) -> Result<Assistant, GatewayError> {
        self.record(Call::CreateAssistant(request.clone()));
        tokio::task::yield_now().await;
        self.check(Op::CreateAssistant)?;
        Ok(Assistant {
            id: self.id("asst"),
            name: Some(request.name),
            instructions: Some(request.instructions),
            model: request.model,
            tools: request.tools,
            created_at: Utc::now(),
        })
    }

    async fn create_thread(&self) -> Result<Thread, GatewayError> {
        self.record(Call::CreateThread);
        tokio::task::yield_now().await;
        self.check(Op::CreateThread)?;
        Ok(Thread {
            id: self.id("thread"),
            created_at: Utc::now(),
        })
    }

    async fn add_message(
        &self,
        thread_id: &str,
        content: &str,
        file_ids: &[String],
    ) -> Result<Message, GatewayError> {
        self.record(Call::AddMessage {
            thread_id: thread_id.to_string(),
            content: content.to_string(),
            file_ids: file_ids.to_vec(),
        });
        self.check(Op::AddMessage)?;
        let message = self.message(thread_id, MessageRole::User, content, file_ids);
        self.log.lock().unwrap().push(message.clone());
        Ok(message)
    }

    async fn start_run(&self, assistant_id: &str, thread_id: &str) -> Result<Run, GatewayError> {
        self.record(Call::StartRun {
            assistant_id: assistant_id.to_string(),
            thread_id: thread_id.to_string(),
        });
        self.check(Op::StartRun)?;
        Ok(Run {
            id: self.id("run"),
            thread_id: thread_id.to_string(),
            assistant_id: assistant_id.to_string(),
            status: RunStatus::Queued,
            last_error: None,
            created_at: Utc::now(),
        })
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, GatewayError> {
        self.record(Call::GetRun {
            thread_id: thread_id.to_string(),
            run_id: run_id.to_string(),
        });

        self.pass_gate(Op::GetRun).await;
        self.check(Op::GetRun)?;
        let status = self.next_status();
        if status == RunStatus::Completed {
            let reply = self.message(thread_id, MessageRole::Assistant, "Hi there!", &[]);
            self.log.lock().unwrap().push(reply);
        }

        Ok(Run {
            id: run_id.to_string(),
            thread_id: thread_id.to_string(),
            assistant_id: "asst_scripted".to_string(),
            status,
            last_error: None,
            created_at: Utc::now(),
        })
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run, GatewayError> {
        self.record(Call::CancelRun {
            run_id: run_id.to_string(),
        });
        Ok(Run {
            id: run_id.to_string(),
            thread_id: thread_id.to_string(),
            assistant_id: "asst_scripted".to_string(),
            status: RunStatus::Cancelling,
            last_error: None,
            created_at: Utc::now(),
        })
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, GatewayError> {
        self.record(Call::ListMessages {
            thread_id: thread_id.to_string(),
        });
        self.pass_gate(Op::ListMessages).await;
        self.check(Op::ListMessages)?;
        let mut messages: Vec<Message> = self
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.thread_id == thread_id)
            .cloned()
            .collect();
        messages.reverse();
        Ok(messages)
    }

    async fn upload_file(
        &self,
        file: FileUpload,
        purpose: FilePurpose,
    ) -> Result<FileObject, GatewayError> {
        self.record(Call::UploadFile {
            filename: file.filename.clone(),
            purpose,
        });
        self.check(Op::UploadFile)?;
        Ok(FileObject {
            id: self.id("file"),
            filename: file.filename,
            bytes: file.bytes.len() as u64,
            purpose: purpose.as_str().to_string(),
            created_at: Utc::now(),
        })
    }
}

/// Policy used by tests: the real 1s interval, unbounded.
pub fn test_policy() -> PollPolicy {
    PollPolicy::default()
}

pub fn controller(gateway: &Arc<ScriptedGateway>) -> Arc<ConversationController> {
    controller_with_policy(gateway, test_policy())
}

pub fn controller_with_policy(
    gateway: &Arc<ScriptedGateway>,
    policy: PollPolicy,
) -> Arc<ConversationController> {
    let gateway: Arc<dyn AssistantGateway> = Arc::clone(gateway) as Arc<dyn AssistantGateway>;
    let poller = RunPoller::new(Arc::clone(&gateway), policy);
    Arc::new(ConversationController::new(
        gateway,
        poller,
        AssistantDefaults::default(),
    ))
}

/// A controller that has already created its assistant and thread.
pub async fn initialized(gateway: &Arc<ScriptedGateway>) -> Arc<ConversationController> {
    let controller = controller(gateway);
    controller.initialize().await.expect("initialize");
    controller
}

pub fn all_tools() -> Vec<Tool> {
    Tool::ALL.to_vec()
}
