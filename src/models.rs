//! Core models for the klaris library
//!
//! This module contains the study plan data types and the mutation rules that
//! keep a plan consistent: tasks only exist under a summary, a timeline only
//! exists over tasks, and the gamification counter only ever grows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

use crate::presets::{NOTES_PREVIEW_CHARS, TASK_COMPLETION_REWARD};

/// Errors raised when a mutation would break a plan invariant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("Tasks require a committed summary")]
    MissingSummary,

    #[error("A timeline requires at least one task")]
    MissingTasks,

    #[error("Duplicate task id: {0}")]
    DuplicateTaskId(String),

    #[error("Task '{0}' not found")]
    UnknownTask(String),

    #[error("Timeline day '{0}' not found")]
    UnknownDay(String),
}

/// Priority assigned to a task by the task agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// Progress state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    /// Returns the status that follows this one in the todo → in-progress → done cycle
    pub fn next(self) -> Self {
        match self {
            TaskStatus::Todo => TaskStatus::InProgress,
            TaskStatus::InProgress => TaskStatus::Done,
            TaskStatus::Done => TaskStatus::Todo,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Done => "done",
        }
    }
}

/// Goals, requirements and deadlines extracted from the curriculum material
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub goals: Vec<String>,
    pub requirements: Vec<String>,
    pub deadlines: Vec<String>,
    #[serde(default)]
    pub raw_notes: String,
}

impl Summary {
    /// Returns the first few characters of the raw notes followed by an ellipsis
    pub fn notes_preview(&self) -> String {
        let preview: String = self.raw_notes.chars().take(NOTES_PREVIEW_CHARS).collect();
        format!("{}...", preview)
    }
}

/// A single unit of study work produced by the task agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    id: String,
    title: String,
    description: String,
    priority: Priority,
    estimated_time: String,
    #[serde(default)]
    status: TaskStatus,
}

impl Task {
    /// Creates a new task in the `todo` state
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        priority: Priority,
        estimated_time: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            priority,
            estimated_time: estimated_time.into(),
            status: TaskStatus::Todo,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn estimated_time(&self) -> &str {
        &self.estimated_time
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }
}

/// One day of the generated study timeline
///
/// `tasks` holds task ids, not tasks. An id that no longer resolves is skipped
/// by [`PlanState::schedule`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineDay {
    day: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    tasks: Vec<String>,
    #[serde(default)]
    focus: String,
}

impl TimelineDay {
    pub fn new(
        day: impl Into<String>,
        date: impl Into<String>,
        tasks: Vec<String>,
        focus: impl Into<String>,
    ) -> Self {
        Self {
            day: day.into(),
            date: date.into(),
            tasks,
            focus: focus.into(),
        }
    }

    pub fn day(&self) -> &str {
        &self.day
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn task_ids(&self) -> &[String] {
        &self.tasks
    }

    pub fn focus(&self) -> &str {
        &self.focus
    }
}

/// A timeline day with its task references resolved against the current task set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledDay {
    pub day: String,
    pub date: String,
    pub focus: String,
    pub tasks: Vec<Task>,
}

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// An entry of the copilot conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    role: Role,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tip: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tip: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tip: Option<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tip,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn tip(&self) -> Option<&str> {
        self.tip.as_deref()
    }
}

/// Append-only conversation log
///
/// A user message is appended before the agent answers and marks the log as
/// awaiting a reply. The reply is then either confirmed with an assistant
/// message or abandoned, in which case nothing else is appended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    awaiting_reply: bool,
}

impl ChatLog {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    pub(crate) fn push_provisional(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
        self.awaiting_reply = true;
    }

    pub(crate) fn confirm(&mut self, reply: ChatMessage) {
        self.messages.push(reply);
        self.awaiting_reply = false;
    }

    pub(crate) fn abandon(&mut self) {
        self.awaiting_reply = false;
    }

    fn clear(&mut self) {
        self.messages.clear();
        self.awaiting_reply = false;
    }
}

/// Pipeline stage of the current project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Idle,
    Summarizing,
    Summarized,
    TaskGenerating,
    TasksReady,
    TimelineGenerating,
    TimelineReady,
}

impl Stage {
    /// Returns true while an agent call for this stage is pending
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Stage::Summarizing | Stage::TaskGenerating | Stage::TimelineGenerating
        )
    }
}

/// Gamification counter, bounded to `0..=100`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Progress(u8);

impl Progress {
    pub const MAX: u8 = 100;

    /// Creates a progress value, clamping anything above the maximum
    pub fn new(value: u8) -> Self {
        Self(value.min(Self::MAX))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Adds `amount`, saturating at the maximum. Returns the new value.
    pub(crate) fn bump(&mut self, amount: u8) -> u8 {
        self.0 = self.0.saturating_add(amount).min(Self::MAX);
        self.0
    }
}

/// Represents a single state transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub details: Option<String>,
}

impl TransitionLogEntry {
    pub fn new(action: String, details: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            details,
        }
    }
}

// Define the maximum size for the history buffer
const MAX_HISTORY_SIZE: usize = 20;

/// The study plan of the current project
#[derive(Debug, Clone, Default)]
pub struct PlanState {
    summary: Option<Summary>,
    tasks: Vec<Task>,
    timeline: Vec<TimelineDay>,
    chat: ChatLog,
    progress: Progress,
    history: VecDeque<TransitionLogEntry>,
}

impl PlanState {
    /// Creates an empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty plan carrying over a previously earned progress value
    pub fn with_progress(progress: Progress) -> Self {
        Self {
            progress,
            ..Self::default()
        }
    }

    /// Logs a state transition, maintaining the history buffer size.
    fn log_transition(&mut self, action: &str, details: Option<String>) {
        if self.history.len() == MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history
            .push_back(TransitionLogEntry::new(action.to_string(), details));
    }

    pub fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn timeline(&self) -> &[TimelineDay] {
        &self.timeline
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub(crate) fn chat_mut(&mut self) -> &mut ChatLog {
        &mut self.chat
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn history(&self) -> impl Iterator<Item = &TransitionLogEntry> {
        self.history.iter()
    }

    /// Looks up a task by id
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    /// Number of tasks currently marked done
    pub fn completed_count(&self) -> usize {
        self.tasks.iter().filter(|task| task.is_done()).count()
    }

    /// The resting stage implied by the data present
    pub fn settled_stage(&self) -> Stage {
        if !self.timeline.is_empty() {
            Stage::TimelineReady
        } else if !self.tasks.is_empty() {
            Stage::TasksReady
        } else if self.summary.is_some() {
            Stage::Summarized
        } else {
            Stage::Idle
        }
    }

    /// Resolves every timeline day against the current task set, skipping
    /// references to tasks that no longer exist
    pub fn schedule(&self) -> Vec<ScheduledDay> {
        self.timeline
            .iter()
            .map(|day| ScheduledDay {
                day: day.day.clone(),
                date: day.date.clone(),
                focus: day.focus.clone(),
                tasks: day
                    .tasks
                    .iter()
                    .filter_map(|id| self.task(id).cloned())
                    .collect(),
            })
            .collect()
    }

    /// Replaces the summary. Tasks and timeline derived from an older summary are dropped.
    pub(crate) fn commit_summary(&mut self, summary: Summary) {
        self.log_transition(
            "commit_summary",
            Some(format!(
                "{} goals, {} requirements, {} deadlines",
                summary.goals.len(),
                summary.requirements.len(),
                summary.deadlines.len()
            )),
        );
        self.summary = Some(summary);
        self.tasks.clear();
        self.timeline.clear();
    }

    /// Replaces the task set wholesale. The timeline built over the old set is dropped.
    pub(crate) fn commit_tasks(&mut self, tasks: Vec<Task>) -> Result<(), PlanError> {
        if self.summary.is_none() {
            return Err(PlanError::MissingSummary);
        }
        let mut seen = HashSet::new();
        for task in &tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(PlanError::DuplicateTaskId(task.id.clone()));
            }
        }

        self.log_transition("commit_tasks", Some(format!("{} tasks", tasks.len())));
        self.tasks = tasks;
        self.timeline.clear();
        Ok(())
    }

    /// Replaces the timeline wholesale
    pub(crate) fn commit_timeline(&mut self, timeline: Vec<TimelineDay>) -> Result<(), PlanError> {
        if self.tasks.is_empty() {
            return Err(PlanError::MissingTasks);
        }

        self.log_transition("commit_timeline", Some(format!("{} days", timeline.len())));
        self.timeline = timeline;
        Ok(())
    }

    /// Advances a task through its status cycle.
    ///
    /// Landing on `done` earns [`TASK_COMPLETION_REWARD`] progress. Leaving
    /// `done` never takes progress away. Returns the new status, or `None`
    /// when no task has the given id.
    pub(crate) fn toggle_status(&mut self, id: &str) -> Option<TaskStatus> {
        let task = self.tasks.iter_mut().find(|task| task.id == id)?;
        task.status = task.status.next();
        let status = task.status;

        if status == TaskStatus::Done {
            self.progress.bump(TASK_COMPLETION_REWARD);
        }
        self.log_transition(
            "toggle_status",
            Some(format!("Task '{}' is now {}", id, status.as_str())),
        );
        Some(status)
    }

    /// Adds a clamped amount of progress
    pub(crate) fn reward(&mut self, amount: u8) -> Progress {
        self.progress.bump(amount);
        self.progress
    }

    /// Adds a single task to an existing task set
    pub(crate) fn add_task(&mut self, mut task: Task) -> Result<(), PlanError> {
        if self.summary.is_none() {
            return Err(PlanError::MissingSummary);
        }
        if self.task(&task.id).is_some() {
            return Err(PlanError::DuplicateTaskId(task.id));
        }

        // Completion only counts when it happens through the status cycle
        task.status = TaskStatus::Todo;
        self.log_transition("add_task", Some(format!("Added task '{}'", task.id)));
        self.tasks.push(task);
        Ok(())
    }

    /// Removes a task. Timeline references to it are left dangling.
    pub(crate) fn remove_task(&mut self, id: &str) -> Result<Task, PlanError> {
        let position = self
            .tasks
            .iter()
            .position(|task| task.id == id)
            .ok_or_else(|| PlanError::UnknownTask(id.to_string()))?;
        let removed = self.tasks.remove(position);

        if self.tasks.is_empty() {
            self.timeline.clear();
        }
        self.log_transition("remove_task", Some(format!("Removed task '{}'", id)));
        Ok(removed)
    }

    /// Moves a task onto the timeline day with the given label
    pub(crate) fn schedule_task(&mut self, id: &str, day: &str) -> Result<(), PlanError> {
        if self.task(id).is_none() {
            return Err(PlanError::UnknownTask(id.to_string()));
        }
        if !self.timeline.iter().any(|entry| entry.day == day) {
            return Err(PlanError::UnknownDay(day.to_string()));
        }

        for entry in &mut self.timeline {
            if entry.day == day {
                if !entry.tasks.iter().any(|task_id| task_id == id) {
                    entry.tasks.push(id.to_string());
                }
            } else {
                entry.tasks.retain(|task_id| task_id != id);
            }
        }
        self.log_transition(
            "schedule_task",
            Some(format!("Scheduled task '{}' on {}", id, day)),
        );
        Ok(())
    }

    /// Rewrites the focus line of a timeline day
    pub(crate) fn set_focus(&mut self, day: &str, focus: String) -> Result<(), PlanError> {
        let entry = self
            .timeline
            .iter_mut()
            .find(|entry| entry.day == day)
            .ok_or_else(|| PlanError::UnknownDay(day.to_string()))?;
        entry.focus = focus;
        self.log_transition("set_focus", Some(format!("Updated focus of {}", day)));
        Ok(())
    }

    /// Clears everything tied to the current project. Progress is kept.
    pub(crate) fn reset_project(&mut self) {
        self.summary = None;
        self.tasks.clear();
        self.timeline.clear();
        self.chat.clear();
        self.log_transition("reset_project", None);
    }
}
