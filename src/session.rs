//! Session state shared by the controllers
//!
//! A [`Session`] owns the plan of the current project together with the
//! pipeline stage, the focus timer state and the display preferences. It is
//! cheap to clone; every clone points at the same state.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::focus::FocusState;
use crate::models::{
    ChatMessage, PlanState, Progress, ScheduledDay, Stage, Summary, Task, TaskStatus,
    TimelineDay, TransitionLogEntry,
};
use crate::prefs::{
    load_progress, GamificationMode, MemoryStore, PreferenceStore, Preferences, Theme, MODE_KEY,
    PROGRESS_KEY, THEME_KEY,
};

/// Why an operation was turned into a no-op
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    EmptyInput,
    NoFiles,
    Busy,
    MissingSummary,
    MissingTasks,
    AlreadyGenerated,
    SessionActive,
    InvalidDuration,
    NotActive,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Rejection::EmptyInput => "input is empty",
            Rejection::NoFiles => "no files were provided",
            Rejection::Busy => "another request is still in progress",
            Rejection::MissingSummary => "no summary has been generated yet",
            Rejection::MissingTasks => "no tasks have been generated yet",
            Rejection::AlreadyGenerated => "results already exist; regenerate to replace them",
            Rejection::SessionActive => "a focus session is already running",
            Rejection::InvalidDuration => "a focus session lasts at least one minute",
            Rejection::NotActive => "no focus session is running",
        };
        f.write_str(message)
    }
}

/// Operation a reported failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Summary,
    Tasks,
    Timeline,
    Chat,
}

/// The most recent failure surfaced to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub operation: Operation,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Per-stage "in progress" flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivityFlags {
    pub summarizing: bool,
    pub generating_tasks: bool,
    pub generating_timeline: bool,
}

impl ActivityFlags {
    /// Returns true while any pipeline stage is running
    pub fn pipeline_busy(&self) -> bool {
        self.summarizing || self.generating_tasks || self.generating_timeline
    }

    fn mark(&mut self, stage: Stage, running: bool) {
        match stage {
            Stage::Summarizing => self.summarizing = running,
            Stage::TaskGenerating => self.generating_tasks = running,
            Stage::TimelineGenerating => self.generating_timeline = running,
            _ => {}
        }
    }
}

/// Everything the session owns
#[derive(Debug)]
pub struct SessionState {
    pub(crate) plan: PlanState,
    pub(crate) stage: Stage,
    pub(crate) project: u64,
    pub(crate) flags: ActivityFlags,
    pub(crate) focus: FocusState,
    pub(crate) preferences: Preferences,
    pub(crate) last_failure: Option<StageFailure>,
}

impl SessionState {
    fn new(preferences: Preferences, progress: Progress) -> Self {
        Self {
            plan: PlanState::with_progress(progress),
            stage: Stage::Idle,
            project: 0,
            flags: ActivityFlags::default(),
            focus: FocusState::default(),
            preferences,
            last_failure: None,
        }
    }

    pub fn plan(&self) -> &PlanState {
        &self.plan
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Generation counter of the current project
    pub fn project(&self) -> u64 {
        self.project
    }

    pub fn flags(&self) -> ActivityFlags {
        self.flags
    }

    pub fn focus(&self) -> &FocusState {
        &self.focus
    }

    pub fn preferences(&self) -> Preferences {
        self.preferences
    }

    pub fn last_failure(&self) -> Option<&StageFailure> {
        self.last_failure.as_ref()
    }

    /// Enters a running stage
    pub(crate) fn begin_stage(&mut self, stage: Stage) {
        self.flags.mark(stage, true);
        self.stage = stage;
    }

    /// Leaves a running stage and settles on the stage implied by the data
    pub(crate) fn end_stage(&mut self, stage: Stage) {
        self.flags.mark(stage, false);
        self.settle();
    }

    /// Re-derives the resting stage unless a stage is still running
    pub(crate) fn settle(&mut self) {
        if !self.flags.pipeline_busy() {
            self.stage = self.plan.settled_stage();
        }
    }

    pub(crate) fn record_failure(&mut self, operation: Operation, message: String) {
        self.last_failure = Some(StageFailure {
            operation,
            message,
            at: Utc::now(),
        });
    }

    pub(crate) fn clear_failure(&mut self, operation: Operation) {
        if self
            .last_failure
            .as_ref()
            .is_some_and(|failure| failure.operation == operation)
        {
            self.last_failure = None;
        }
    }
}

/// Serializable view of the session, consumed by renderers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub project: u64,
    pub stage: Stage,
    pub flags: ActivityFlags,
    pub chatting: bool,
    pub summary: Option<Summary>,
    pub tasks: Vec<Task>,
    pub completed_tasks: usize,
    pub timeline: Vec<TimelineDay>,
    pub schedule: Vec<ScheduledDay>,
    pub chat: Vec<ChatMessage>,
    pub progress: Progress,
    pub focus: FocusState,
    pub preferences: Preferences,
    pub last_failure: Option<StageFailure>,
    pub history: Vec<TransitionLogEntry>,
}

/// Shared handle to the application session
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionState>>,
    update_tx: Arc<tokio::sync::broadcast::Sender<()>>,
    store: Arc<dyn PreferenceStore>,
}

impl Session {
    /// Creates a session, reading preferences and progress from `store` once
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        // Create a broadcast channel with capacity for 100 messages
        let (tx, _rx) = tokio::sync::broadcast::channel(100);
        let state = SessionState::new(Preferences::load(store.as_ref()), load_progress(store.as_ref()));

        Self {
            inner: Arc::new(Mutex::new(state)),
            update_tx: Arc::new(tx),
            store,
        }
    }

    /// Creates a session whose preferences are not persisted
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::default()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // Applies a mutation, persists a changed progress counter and notifies observers.
    // Progress is written while the lock is held so concurrent writes land in order.
    pub(crate) fn with_state<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut SessionState) -> R,
    {
        let result = {
            let mut state = self.lock();
            let before = state.plan.progress();
            let result = f(&mut state);
            let after = state.plan.progress();
            if after != before {
                self.persist(PROGRESS_KEY, &after.value().to_string());
            }
            result
        };

        // Notify observers about state changes
        let _ = self.update_tx.send(());

        result
    }

    /// Reads the state without notifying observers
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&SessionState) -> R,
    {
        f(&self.lock())
    }

    fn persist(&self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            tracing::warn!("Failed to persist preference '{}': {}", key, e);
        }
    }

    // Subscribe to state updates
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.update_tx.subscribe()
    }

    pub fn stage(&self) -> Stage {
        self.read(|state| state.stage)
    }

    pub fn progress(&self) -> Progress {
        self.read(|state| state.plan.progress())
    }

    pub fn project(&self) -> u64 {
        self.read(|state| state.project)
    }

    /// Captures the whole session for rendering
    pub fn snapshot(&self) -> SessionSnapshot {
        self.read(|state| SessionSnapshot {
            project: state.project,
            stage: state.stage,
            flags: state.flags,
            chatting: state.plan.chat().is_awaiting_reply(),
            summary: state.plan.summary().cloned(),
            tasks: state.plan.tasks().to_vec(),
            completed_tasks: state.plan.completed_count(),
            timeline: state.plan.timeline().to_vec(),
            schedule: state.plan.schedule(),
            chat: state.plan.chat().messages().to_vec(),
            progress: state.plan.progress(),
            focus: state.focus.clone(),
            preferences: state.preferences,
            last_failure: state.last_failure.clone(),
            history: state.plan.history().cloned().collect(),
        })
    }

    /// Starts a new project.
    ///
    /// Clears the summary, tasks, timeline and chat log and returns the stage
    /// machine to `Idle`. Results of agent calls started before the reset are
    /// discarded when they arrive. Gamification progress is kept.
    pub fn new_project(&self) -> u64 {
        self.with_state(|state| {
            state.project += 1;
            state.plan.reset_project();
            state.flags = ActivityFlags::default();
            state.stage = Stage::Idle;
            state.last_failure = None;
            tracing::info!(project = state.project, "started new project");
            state.project
        })
    }

    /// Cycles the status of a task. Unknown ids are a no-op.
    pub fn toggle_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.with_state(|state| state.plan.toggle_status(task_id))
    }

    pub fn set_theme(&self, theme: Theme) {
        self.with_state(|state| state.preferences.theme = theme);
        self.persist(THEME_KEY, theme.as_str());
    }

    /// Switches between dark and light themes
    pub fn toggle_dark_mode(&self) -> Theme {
        let theme = self.read(|state| state.preferences.theme).toggled();
        self.set_theme(theme);
        theme
    }

    pub fn set_gamification_mode(&self, mode: GamificationMode) {
        self.with_state(|state| state.preferences.gamification_mode = mode);
        self.persist(MODE_KEY, mode.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Summary, Task};
    use crate::prefs::PrefsError;

    fn seeded_session(store: Arc<dyn PreferenceStore>) -> Session {
        let session = Session::new(store);
        session.with_state(|state| {
            state.plan.commit_summary(Summary::default());
            state
                .plan
                .commit_tasks(vec![Task::new("t1", "Read", "", Priority::High, "1h")])
                .unwrap();
            state.settle();
        });
        session
    }

    #[test]
    fn test_progress_is_persisted_on_change() {
        let store = Arc::new(MemoryStore::default());
        let session = seeded_session(store.clone());

        session.toggle_status("t1");
        assert_eq!(store.get(PROGRESS_KEY), None);

        session.toggle_status("t1");
        assert_eq!(store.get(PROGRESS_KEY).as_deref(), Some("5"));

        let restored = Session::new(store);
        assert_eq!(restored.progress().value(), 5);
    }

    // Holds the first progress write long enough for a second update to queue up
    #[derive(Default)]
    struct SlowStore {
        inner: MemoryStore,
    }

    impl PreferenceStore for SlowStore {
        fn get(&self, key: &str) -> Option<String> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), PrefsError> {
            if key == PROGRESS_KEY && value == "5" {
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
            self.inner.set(key, value)
        }
    }

    #[test]
    fn test_concurrent_progress_writes_keep_the_latest_value() {
        let store = Arc::new(SlowStore::default());
        let session = Session::new(store.clone());
        session.with_state(|state| {
            state.plan.commit_summary(Summary::default());
            state
                .plan
                .commit_tasks(vec![
                    Task::new("t1", "Read", "", Priority::High, "1h"),
                    Task::new("t2", "Write", "", Priority::Low, "1h"),
                ])
                .unwrap();
        });
        session.toggle_status("t1");
        session.toggle_status("t2");

        let first = session.clone();
        let slow = std::thread::spawn(move || first.toggle_status("t1"));
        std::thread::sleep(std::time::Duration::from_millis(20));
        session.toggle_status("t2");
        slow.join().unwrap();

        assert_eq!(session.progress().value(), 10);
        assert_eq!(store.get(PROGRESS_KEY).as_deref(), Some("10"));
        assert_eq!(Session::new(store).progress().value(), 10);
    }

    #[test]
    fn test_new_project_resets_plan_but_not_progress() {
        let session = seeded_session(Arc::new(MemoryStore::default()));
        session.toggle_status("t1");
        session.toggle_status("t1");
        assert_eq!(session.stage(), Stage::TasksReady);

        let project = session.new_project();

        assert_eq!(project, 1);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.stage, Stage::Idle);
        assert!(snapshot.summary.is_none());
        assert!(snapshot.tasks.is_empty());
        assert_eq!(snapshot.progress.value(), 5);
    }

    #[test]
    fn test_preferences_are_written_on_change() {
        let store = Arc::new(MemoryStore::default());
        let session = Session::new(store.clone());

        assert_eq!(session.toggle_dark_mode(), Theme::Dark);
        session.set_gamification_mode(GamificationMode::Streak);

        assert_eq!(store.get(THEME_KEY).as_deref(), Some("dark"));
        assert_eq!(store.get(MODE_KEY).as_deref(), Some("streak"));
        assert_eq!(
            Session::new(store).snapshot().preferences.gamification_mode,
            GamificationMode::Streak
        );
    }

    #[test]
    fn test_updates_are_broadcast() {
        let session = Session::in_memory();
        let mut updates = session.subscribe();
        session.new_project();
        assert!(updates.try_recv().is_ok());
    }
}
