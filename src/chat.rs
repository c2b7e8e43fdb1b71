//! Copilot chat
//!
//! The chat side channel runs independently of the pipeline. A send appends
//! the user message right away and then either confirms it with the
//! assistant reply or leaves it unanswered when the agent fails.
//!
//! Replies may carry plan modifications. They are untrusted input: every
//! record is validated on its own and anything that does not parse or would
//! break the plan is skipped and reported.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::gateway::{AgentGateway, AgentRequest};
use crate::models::{ChatMessage, PlanError, PlanState, Task};
use crate::pipeline::StageError;
use crate::session::{Operation, Rejection, Session};

/// Modification schema version understood by this build
pub const MODIFICATION_VERSION: u64 = 1;

/// Result shape of the chat agent
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatReply {
    pub response: String,
    #[serde(default)]
    pub modifications: Vec<Value>,
    #[serde(default, rename = "studyTip")]
    pub study_tip: Option<String>,
}

/// A change to the plan requested by the chat agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Modification {
    AddTask {
        task: Task,
    },
    RemoveTask {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    ScheduleTask {
        #[serde(rename = "taskId")]
        task_id: String,
        day: String,
    },
    SetFocus {
        day: String,
        focus: String,
    },
}

impl Modification {
    /// Validates a raw record. A missing version means the current one.
    pub fn parse(raw: &Value) -> Result<Self, String> {
        if !raw.is_object() {
            return Err("modification is not an object".to_string());
        }
        match raw.get("version") {
            None => {}
            Some(version) if version.as_u64() == Some(MODIFICATION_VERSION) => {}
            Some(version) => return Err(format!("unsupported version {}", version)),
        }
        serde_json::from_value(raw.clone()).map_err(|e| e.to_string())
    }

    fn apply(self, plan: &mut PlanState) -> Result<(), PlanError> {
        match self {
            Modification::AddTask { task } => plan.add_task(task),
            Modification::RemoveTask { task_id } => plan.remove_task(&task_id).map(|_| ()),
            Modification::ScheduleTask { task_id, day } => plan.schedule_task(&task_id, &day),
            Modification::SetFocus { day, focus } => plan.set_focus(&day, focus),
        }
    }
}

/// A modification that was not applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedModification {
    pub index: usize,
    pub reason: String,
}

/// What happened to the modifications of one reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationReport {
    pub applied: usize,
    pub skipped: Vec<SkippedModification>,
}

/// Applies each record independently, in order
pub fn apply_modifications(plan: &mut PlanState, raw: &[Value]) -> ModificationReport {
    let mut report = ModificationReport::default();
    for (index, record) in raw.iter().enumerate() {
        let result = Modification::parse(record)
            .and_then(|modification| modification.apply(plan).map_err(|e| e.to_string()));
        match result {
            Ok(()) => report.applied += 1,
            Err(reason) => {
                tracing::warn!(index, "Skipping chat modification: {}", reason);
                report.skipped.push(SkippedModification { index, reason });
            }
        }
    }
    report
}

/// Outcome of a chat send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChatOutcome {
    Replied {
        message: ChatMessage,
        modifications: ModificationReport,
    },
    /// The project was reset before the reply arrived
    Stale,
    Rejected {
        reason: Rejection,
    },
}

pub struct ChatController {
    session: Session,
    agents: Arc<dyn AgentGateway>,
    agent_id: String,
}

impl ChatController {
    pub fn new(session: Session, agents: Arc<dyn AgentGateway>, agent_id: impl Into<String>) -> Self {
        Self {
            session,
            agents,
            agent_id: agent_id.into(),
        }
    }

    /// Sends a message to the chat agent.
    ///
    /// Empty text and overlapping sends are rejected. When the agent fails the
    /// user message stays unanswered, the failure is recorded on the session
    /// and returned.
    pub async fn send(&self, text: &str) -> Result<ChatOutcome, StageError> {
        if text.trim().is_empty() {
            return Ok(ChatOutcome::Rejected {
                reason: Rejection::EmptyInput,
            });
        }

        let project = match self.session.with_state(|state| {
            let chat = state.plan.chat_mut();
            if chat.is_awaiting_reply() {
                return Err(Rejection::Busy);
            }
            chat.push_provisional(text);
            Ok(state.project)
        }) {
            Ok(project) => project,
            Err(reason) => return Ok(ChatOutcome::Rejected { reason }),
        };

        let request = AgentRequest::new(&self.agent_id, text);
        let result = match self.agents.invoke(request).await {
            Ok(response) => response.decode::<ChatReply>().map_err(StageError::from),
            Err(e) => Err(e.into()),
        };

        self.session.with_state(|state| {
            if state.project != project {
                tracing::debug!(project, "discarding stale chat reply");
                return Ok(ChatOutcome::Stale);
            }

            match result {
                Ok(reply) => {
                    let message = ChatMessage::assistant(reply.response, reply.study_tip);
                    state.plan.chat_mut().confirm(message.clone());
                    let modifications = apply_modifications(&mut state.plan, &reply.modifications);
                    state.settle();
                    state.clear_failure(Operation::Chat);
                    tracing::info!(
                        applied = modifications.applied,
                        skipped = modifications.skipped.len(),
                        "chat reply received"
                    );
                    Ok(ChatOutcome::Replied {
                        message,
                        modifications,
                    })
                }
                Err(e) => {
                    tracing::warn!("Chat request failed: {}", e);
                    state.plan.chat_mut().abandon();
                    state.record_failure(Operation::Chat, e.to_string());
                    Err(e)
                }
            }
        })
    }
}
