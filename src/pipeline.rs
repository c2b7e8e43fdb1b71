//! Generation pipeline
//!
//! The [`PipelineController`] is the only component that advances the stage
//! machine:
//!
//! ```text
//! Idle → Summarizing → Summarized → TaskGenerating → TasksReady
//!      → TimelineGenerating → TimelineReady
//! ```
//!
//! Every stage captures the project generation when it starts and only
//! commits if the generation is unchanged when the agent answers. Failures
//! are handled per stage:
//!
//! | stage    | on failure                                      |
//! |----------|-------------------------------------------------|
//! | summary  | commit the demo summary, report `Degraded`      |
//! | tasks    | keep existing data, settle, return the error    |
//! | timeline | keep existing data, settle, return the error    |

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::gateway::{
    AgentGateway, AgentRequest, FileBlob, GatewayError, ReplyError, UploadGateway,
};
use crate::models::{PlanError, PlanState, Stage, Summary, Task, TimelineDay};
use crate::presets::{demo_summary, AgentIds, EXTRACTION_PROMPT};
use crate::session::{Operation, Rejection, Session, SessionState};

/// Reasons a stage failed
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Upload failed: {0}")]
    Upload(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Reply(#[from] ReplyError),

    #[error("Agent returned no {0}")]
    EmptyResult(&'static str),

    #[error("Agent result rejected: {0}")]
    Plan(#[from] PlanError),
}

/// What happened to a stage request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The agent result was committed
    Committed,
    /// The agent path failed and the fixed demo data was committed instead
    Degraded { reason: String },
    /// The project was reset while the agent call was pending; nothing was committed
    Stale,
    /// The request was not valid in the current state; nothing changed
    Rejected { reason: Rejection },
}

#[derive(Debug, Deserialize)]
struct TaskBatch {
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct TimelineBatch {
    timeline: Vec<TimelineDay>,
}

/// Identifies the project a running stage belongs to
#[derive(Debug, Clone, Copy)]
struct StageTicket {
    project: u64,
    stage: Stage,
}

impl StageTicket {
    fn is_current(&self, state: &SessionState) -> bool {
        state.project == self.project
    }
}

/// Drives summary, task and timeline generation for a session
pub struct PipelineController {
    session: Session,
    agents: Arc<dyn AgentGateway>,
    uploads: Arc<dyn UploadGateway>,
    agent_ids: AgentIds,
}

impl PipelineController {
    pub fn new(
        session: Session,
        agents: Arc<dyn AgentGateway>,
        uploads: Arc<dyn UploadGateway>,
        agent_ids: AgentIds,
    ) -> Self {
        Self {
            session,
            agents,
            uploads,
            agent_ids,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Summarizes pasted curriculum text
    pub async fn submit_text(&self, text: &str) -> StageOutcome {
        if text.trim().is_empty() {
            return StageOutcome::Rejected {
                reason: Rejection::EmptyInput,
            };
        }
        let ticket = match self.begin(Stage::Summarizing, true, |_| Ok(())) {
            Ok((ticket, ())) => ticket,
            Err(reason) => return StageOutcome::Rejected { reason },
        };

        let request = AgentRequest::new(&self.agent_ids.summary, text);
        let result = match self.agents.invoke(request).await {
            Ok(response) => response.decode::<Summary>().map_err(StageError::from),
            Err(e) => Err(e.into()),
        };
        self.finish_summary(ticket, result)
    }

    /// Uploads curriculum files and summarizes them
    pub async fn submit_files(&self, files: Vec<FileBlob>) -> StageOutcome {
        if files.is_empty() {
            return StageOutcome::Rejected {
                reason: Rejection::NoFiles,
            };
        }
        let ticket = match self.begin(Stage::Summarizing, true, |_| Ok(())) {
            Ok((ticket, ())) => ticket,
            Err(reason) => return StageOutcome::Rejected { reason },
        };

        let result = self.summarize_uploads(files).await;
        self.finish_summary(ticket, result)
    }

    async fn summarize_uploads(&self, files: Vec<FileBlob>) -> Result<Summary, StageError> {
        let upload = self
            .uploads
            .upload(files)
            .await
            .map_err(|e| StageError::Upload(e.to_string()))?;
        let assets = upload
            .into_assets()
            .ok_or_else(|| StageError::Upload("no asset references returned".to_string()))?;

        let request =
            AgentRequest::new(&self.agent_ids.summary, EXTRACTION_PROMPT).with_assets(assets);
        let response = self.agents.invoke(request).await?;
        Ok(response.decode()?)
    }

    /// Generates the task set from the summary. Rejected if tasks already exist.
    pub async fn generate_tasks(&self) -> Result<StageOutcome, StageError> {
        self.run_tasks(false).await
    }

    /// Generates the task set again, replacing the current one
    pub async fn regenerate_tasks(&self) -> Result<StageOutcome, StageError> {
        self.run_tasks(true).await
    }

    /// Plans the timeline from the task set. Rejected if a timeline already exists.
    pub async fn generate_timeline(&self) -> Result<StageOutcome, StageError> {
        self.run_timeline(false).await
    }

    /// Plans the timeline again, replacing the current one
    pub async fn regenerate_timeline(&self) -> Result<StageOutcome, StageError> {
        self.run_timeline(true).await
    }

    async fn run_tasks(&self, replace: bool) -> Result<StageOutcome, StageError> {
        let (ticket, message) = match self.begin(Stage::TaskGenerating, replace, |plan| {
            let summary = plan.summary().ok_or(Rejection::MissingSummary)?;
            if !replace && !plan.tasks().is_empty() {
                return Err(Rejection::AlreadyGenerated);
            }
            Ok(task_request(summary))
        }) {
            Ok(started) => started,
            Err(reason) => return Ok(StageOutcome::Rejected { reason }),
        };

        let request = AgentRequest::new(&self.agent_ids.task, message);
        let result = match self.agents.invoke(request).await {
            Ok(response) => response
                .decode::<TaskBatch>()
                .map_err(StageError::from)
                .and_then(|batch| non_empty(batch.tasks, "tasks")),
            Err(e) => Err(e.into()),
        };
        self.finish(ticket, Operation::Tasks, result, PlanState::commit_tasks)
    }

    async fn run_timeline(&self, replace: bool) -> Result<StageOutcome, StageError> {
        let (ticket, message) = match self.begin(Stage::TimelineGenerating, replace, |plan| {
            if plan.tasks().is_empty() {
                return Err(Rejection::MissingTasks);
            }
            if !replace && !plan.timeline().is_empty() {
                return Err(Rejection::AlreadyGenerated);
            }
            Ok(json!({ "tasks": plan.tasks() }).to_string())
        }) {
            Ok(started) => started,
            Err(reason) => return Ok(StageOutcome::Rejected { reason }),
        };

        let request = AgentRequest::new(&self.agent_ids.planning, message);
        let result = match self.agents.invoke(request).await {
            Ok(response) => response
                .decode::<TimelineBatch>()
                .map_err(StageError::from)
                .and_then(|batch| non_empty(batch.timeline, "timeline days")),
            Err(e) => Err(e.into()),
        };
        self.finish(ticket, Operation::Timeline, result, PlanState::commit_timeline)
    }

    // Checks preconditions, builds the agent payload and enters the running
    // stage, all under one lock
    fn begin<T, F>(
        &self,
        stage: Stage,
        replace: bool,
        prepare: F,
    ) -> Result<(StageTicket, T), Rejection>
    where
        F: FnOnce(&PlanState) -> Result<T, Rejection>,
    {
        self.session.with_state(|state| {
            if state.flags.pipeline_busy() {
                return Err(Rejection::Busy);
            }
            let payload = prepare(&state.plan)?;

            state.begin_stage(stage);
            tracing::info!(project = state.project, ?stage, replace, "stage started");
            Ok((
                StageTicket {
                    project: state.project,
                    stage,
                },
                payload,
            ))
        })
    }

    fn finish_summary(
        &self,
        ticket: StageTicket,
        result: Result<Summary, StageError>,
    ) -> StageOutcome {
        self.session.with_state(|state| {
            if !ticket.is_current(state) {
                tracing::debug!(project = ticket.project, "discarding stale summary");
                return StageOutcome::Stale;
            }

            let outcome = match result {
                Ok(summary) => {
                    state.plan.commit_summary(summary);
                    StageOutcome::Committed
                }
                Err(e) => {
                    tracing::warn!("Summary extraction failed, using demo summary: {}", e);
                    state.plan.commit_summary(demo_summary());
                    StageOutcome::Degraded {
                        reason: e.to_string(),
                    }
                }
            };
            state.clear_failure(Operation::Summary);
            state.end_stage(ticket.stage);
            outcome
        })
    }

    fn finish<T, F>(
        &self,
        ticket: StageTicket,
        operation: Operation,
        result: Result<T, StageError>,
        commit: F,
    ) -> Result<StageOutcome, StageError>
    where
        F: FnOnce(&mut PlanState, T) -> Result<(), PlanError>,
    {
        self.session.with_state(|state| {
            if !ticket.is_current(state) {
                tracing::debug!(project = ticket.project, ?operation, "discarding stale result");
                return Ok(StageOutcome::Stale);
            }

            let result =
                result.and_then(|value| commit(&mut state.plan, value).map_err(StageError::from));
            state.end_stage(ticket.stage);

            match result {
                Ok(()) => {
                    state.clear_failure(operation);
                    tracing::info!(project = state.project, stage = ?state.stage, "stage committed");
                    Ok(StageOutcome::Committed)
                }
                Err(e) => {
                    tracing::warn!("{:?} generation failed: {}", operation, e);
                    state.record_failure(operation, e.to_string());
                    Err(e)
                }
            }
        })
    }
}

fn non_empty<T>(items: Vec<T>, what: &'static str) -> Result<Vec<T>, StageError> {
    if items.is_empty() {
        Err(StageError::EmptyResult(what))
    } else {
        Ok(items)
    }
}

/// Message sent to the task agent
fn task_request(summary: &Summary) -> String {
    json!({
        "summary": {
            "goals": summary.goals,
            "requirements": summary.requirements,
            "deadlines": summary.deadlines,
        },
        "notes": summary.raw_notes,
    })
    .to_string()
}
