//! Scripted gateway doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use klaris::api::gateway::{
    AgentGateway, AgentRequest, AgentResponse, FileBlob, GatewayError, UploadGateway,
    UploadResponse,
};
use klaris::presets::AgentIds;
use klaris::{ChatController, PipelineController, Session};
use serde_json::{json, Value};
use tokio::sync::Notify;

/// Holds an agent call until the test releases it
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    /// Waits until a call is parked at the gate
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Agent double answering from per-agent queues of scripted replies
#[derive(Default)]
pub struct ScriptedAgents {
    replies: Mutex<HashMap<String, VecDeque<Result<AgentResponse, String>>>>,
    requests: Mutex<Vec<AgentRequest>>,
    gate: Option<Arc<Gate>>,
}

impl ScriptedAgents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks every call at `gate` before answering
    pub fn gated(gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn reply(&self, agent_id: &str, result: Value) -> &Self {
        self.push(agent_id, Ok(AgentResponse::success(result)))
    }

    /// Scripts a transport failure
    pub fn fail(&self, agent_id: &str, message: &str) -> &Self {
        self.push(agent_id, Err(message.to_string()))
    }

    /// Scripts a delivered envelope with a non-success status
    pub fn status(&self, agent_id: &str, status: &str) -> &Self {
        let mut response = AgentResponse::success(Value::Null);
        response.response.status = status.to_string();
        self.push(agent_id, Ok(response))
    }

    fn push(&self, agent_id: &str, reply: Result<AgentResponse, String>) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(agent_id.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AgentGateway for ScriptedAgents {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&request.agent_id)
            .and_then(|queue| queue.pop_front());
        match reply {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(GatewayError::Unavailable(message)),
            None => Err(GatewayError::Unavailable(format!(
                "no reply scripted for {}",
                request.agent_id
            ))),
        }
    }
}

/// Upload double returning a fixed reply
pub struct ScriptedUploads {
    reply: Result<UploadResponse, String>,
    received: Mutex<Vec<String>>,
}

impl ScriptedUploads {
    pub fn assets(ids: &[&str]) -> Self {
        Self {
            reply: Ok(UploadResponse {
                success: true,
                asset_ids: ids.iter().map(|id| id.to_string()).collect(),
            }),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Names of the files uploaded so far
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl UploadGateway for ScriptedUploads {
    async fn upload(&self, files: Vec<FileBlob>) -> Result<UploadResponse, GatewayError> {
        self.received
            .lock()
            .unwrap()
            .extend(files.into_iter().map(|file| file.name));
        self.reply.clone().map_err(GatewayError::Unavailable)
    }
}

pub fn summary_json() -> Value {
    json!({
        "goals": ["Pass the linear algebra final"],
        "requirements": ["Weekly problem sets"],
        "deadlines": ["Final exam on June 3"],
        "rawNotes": "Chapters 1-6, vectors through eigenvalues"
    })
}

pub fn task_json(id: &str, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "description": format!("Work through {}", title),
        "priority": "high",
        "estimatedTime": "2 hours",
        "status": "todo"
    })
}

pub fn tasks_json(ids: &[&str]) -> Value {
    let tasks: Vec<Value> = ids
        .iter()
        .map(|id| task_json(id, &format!("Task {}", id)))
        .collect();
    json!({ "tasks": tasks })
}

pub fn timeline_json(days: Vec<(&str, Vec<&str>)>) -> Value {
    let timeline: Vec<Value> = days
        .iter()
        .map(|(day, tasks)| json!({"day": day, "date": "", "tasks": tasks, "focus": format!("{} focus", day)}))
        .collect();
    json!({ "timeline": timeline })
}

/// A session wired to scripted gateways
pub struct Harness {
    pub session: Session,
    pub agents: Arc<ScriptedAgents>,
    pub uploads: Arc<ScriptedUploads>,
    pub pipeline: Arc<PipelineController>,
    pub chat: Arc<ChatController>,
    pub ids: AgentIds,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(ScriptedAgents::new(), ScriptedUploads::assets(&["asset-1"]))
    }

    pub fn with(agents: ScriptedAgents, uploads: ScriptedUploads) -> Self {
        let session = Session::in_memory();
        let ids = AgentIds::default();
        let agents = Arc::new(agents);
        let uploads = Arc::new(uploads);
        let pipeline = PipelineController::new(
            session.clone(),
            agents.clone(),
            uploads.clone(),
            ids.clone(),
        );
        let chat = ChatController::new(session.clone(), agents.clone(), ids.chat.clone());
        Self {
            session,
            agents,
            uploads,
            pipeline: Arc::new(pipeline),
            chat: Arc::new(chat),
            ids,
        }
    }

    /// Runs the pipeline up to `TasksReady` with the given task ids
    pub async fn with_tasks(self, ids: &[&str]) -> Self {
        self.agents.reply(&self.ids.summary, summary_json());
        self.agents.reply(&self.ids.task, tasks_json(ids));
        self.pipeline.submit_text("Linear algebra syllabus").await;
        self.pipeline.generate_tasks().await.unwrap();
        self
    }
}
