//! Focus session timer
//!
//! A focus session counts down once per second. Running out the clock earns
//! progress; cancelling the session abandons it without reward. Every tick is
//! applied under the session lock and checks the run it belongs to, so a
//! cancelled or replaced session never ticks again.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::presets::FOCUS_COMPLETION_REWARD;
use crate::session::{Rejection, Session};

const TICK: Duration = Duration::from_secs(1);

/// Countdown state of the focus session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusState {
    active: bool,
    remaining_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    goal: Option<String>,
    #[serde(skip)]
    run: u64,
}

/// Result of applying one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Running(u64),
    Completed,
    Halted,
}

impl FocusState {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.remaining_seconds
    }

    pub fn goal(&self) -> Option<&str> {
        self.goal.as_deref()
    }

    /// Id of the most recently armed countdown
    pub(crate) fn run(&self) -> u64 {
        self.run
    }

    /// Arms a new countdown and returns its run id
    pub(crate) fn begin(&mut self, minutes: u32, goal: &str) -> Result<u64, Rejection> {
        if self.active {
            return Err(Rejection::SessionActive);
        }
        if minutes < 1 {
            return Err(Rejection::InvalidDuration);
        }

        self.run += 1;
        self.active = true;
        self.remaining_seconds = u64::from(minutes) * 60;
        let goal = goal.trim();
        self.goal = (!goal.is_empty()).then(|| goal.to_string());
        Ok(self.run)
    }

    /// Counts down one second for the given run
    pub(crate) fn tick(&mut self, run: u64) -> Tick {
        if !self.active || run != self.run {
            return Tick::Halted;
        }

        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            self.active = false;
            Tick::Completed
        } else {
            Tick::Running(self.remaining_seconds)
        }
    }

    /// Abandons the running session. Returns the seconds that were left.
    pub(crate) fn cancel(&mut self) -> Result<u64, Rejection> {
        if !self.active {
            return Err(Rejection::NotActive);
        }
        let remaining = self.remaining_seconds;
        self.active = false;
        self.remaining_seconds = 0;
        Ok(remaining)
    }
}

/// Outcome of a focus timer operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FocusOutcome {
    Started { remaining_seconds: u64 },
    Cancelled { remaining_seconds: u64 },
    Rejected { reason: Rejection },
}

/// Drives the focus countdown of a session
pub struct FocusSessionTimer {
    session: Session,
    // Ticker task of the newest run that has installed one
    ticker: Mutex<Option<(u64, JoinHandle<()>)>>,
}

impl FocusSessionTimer {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            ticker: Mutex::new(None),
        }
    }

    /// Starts a focus session.
    ///
    /// Must be called from within a Tokio runtime; the countdown runs as a
    /// spawned task.
    pub fn start(&self, minutes: u32, goal: &str) -> FocusOutcome {
        let run = match self
            .session
            .with_state(|state| state.focus.begin(minutes, goal))
        {
            Ok(run) => run,
            Err(reason) => return FocusOutcome::Rejected { reason },
        };
        tracing::info!(minutes, goal, "focus session started");

        let session = self.session.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + TICK, TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let tick = session.with_state(|state| match state.focus.tick(run) {
                    Tick::Completed => {
                        let progress = state.plan.reward(FOCUS_COMPLETION_REWARD);
                        tracing::info!(progress = progress.value(), "focus session completed");
                        Tick::Completed
                    }
                    other => other,
                });
                if matches!(tick, Tick::Completed | Tick::Halted) {
                    break;
                }
            }
        });

        self.install_ticker(run, handle);
        FocusOutcome::Started {
            remaining_seconds: u64::from(minutes) * 60,
        }
    }

    /// Abandons the running session without reward
    pub fn cancel(&self) -> FocusOutcome {
        let cancelled = self.session.with_state(|state| {
            let remaining = state.focus.cancel()?;
            Ok::<_, Rejection>((remaining, state.focus.run()))
        });
        match cancelled {
            Ok((remaining_seconds, run)) => {
                self.release_ticker(run);
                tracing::info!(remaining_seconds, "focus session abandoned");
                FocusOutcome::Cancelled { remaining_seconds }
            }
            Err(reason) => FocusOutcome::Rejected { reason },
        }
    }

    /// Returns the current countdown state
    pub fn state(&self) -> FocusState {
        self.session.read(|state| state.focus.clone())
    }

    fn lock_ticker(&self) -> std::sync::MutexGuard<'_, Option<(u64, JoinHandle<()>)>> {
        match self.ticker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // Keeps the ticker of the newest run. A ticker arriving after a newer run
    // installed its own is already stale and is stopped instead.
    fn install_ticker(&self, run: u64, handle: JoinHandle<()>) {
        let mut ticker = self.lock_ticker();
        if ticker.as_ref().is_some_and(|(installed, _)| *installed > run) {
            handle.abort();
            return;
        }
        if let Some((_, previous)) = ticker.replace((run, handle)) {
            previous.abort();
        }
    }

    // Stops the ticker of a cancelled run, leaving any newer run untouched
    fn release_ticker(&self, run: u64) {
        let mut ticker = self.lock_ticker();
        if ticker.as_ref().is_some_and(|(installed, _)| *installed == run) {
            if let Some((_, handle)) = ticker.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for FocusSessionTimer {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.lock_ticker().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::{Priority, Summary, Task};

    #[test]
    fn test_begin_rejects_invalid_requests() {
        let mut focus = FocusState::default();
        assert_eq!(focus.begin(0, "nothing"), Err(Rejection::InvalidDuration));

        let run = focus.begin(25, "write essay").unwrap();
        assert_eq!(focus.remaining_seconds(), 1500);
        assert!(focus.is_active());
        assert_eq!(focus.goal(), Some("write essay"));

        assert_eq!(focus.begin(5, "again"), Err(Rejection::SessionActive));
        assert_eq!(focus.remaining_seconds(), 1500);
        assert_eq!(focus.tick(run), Tick::Running(1499));
    }

    #[test]
    fn test_countdown_completes_at_zero() {
        let mut focus = FocusState::default();
        let run = focus.begin(1, "").unwrap();
        for expected in (1..60).rev() {
            assert_eq!(focus.tick(run), Tick::Running(expected));
        }
        assert_eq!(focus.tick(run), Tick::Completed);
        assert!(!focus.is_active());
        assert_eq!(focus.tick(run), Tick::Halted);
    }

    #[test]
    fn test_cancel_halts_further_ticks() {
        let mut focus = FocusState::default();
        let run = focus.begin(25, "").unwrap();
        assert_eq!(focus.cancel(), Ok(1500));
        assert_eq!(focus.remaining_seconds(), 0);
        assert_eq!(focus.tick(run), Tick::Halted);
        assert_eq!(focus.cancel(), Err(Rejection::NotActive));
    }

    #[test]
    fn test_stale_run_cannot_tick_a_new_session() {
        let mut focus = FocusState::default();
        let old = focus.begin(1, "").unwrap();
        focus.cancel().unwrap();
        let _new = focus.begin(1, "").unwrap();
        assert_eq!(focus.tick(old), Tick::Halted);
        assert_eq!(focus.remaining_seconds(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_completion_rewards_progress() {
        let session = Session::in_memory();
        let timer = FocusSessionTimer::new(session.clone());

        assert_eq!(
            timer.start(1, "flashcards"),
            FocusOutcome::Started {
                remaining_seconds: 60
            }
        );
        tokio::time::sleep(Duration::from_millis(30_500)).await;
        assert_eq!(timer.state().remaining_seconds(), 30);
        assert!(timer.state().is_active());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!timer.state().is_active());
        assert_eq!(timer.state().remaining_seconds(), 0);
        assert_eq!(session.progress().value(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_cancel_keeps_progress() {
        let session = Session::in_memory();
        let timer = FocusSessionTimer::new(session.clone());

        timer.start(25, "write essay");
        tokio::time::sleep(Duration::from_millis(600_500)).await;
        assert_eq!(timer.state().remaining_seconds(), 900);

        assert_eq!(
            timer.cancel(),
            FocusOutcome::Cancelled {
                remaining_seconds: 900
            }
        );
        tokio::time::sleep(Duration::from_secs(5)).await;

        let state = timer.state();
        assert!(!state.is_active());
        assert_eq!(state.remaining_seconds(), 0);
        assert_eq!(session.progress().value(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_cancel_cleanup_keeps_new_session_running() {
        let session = Session::in_memory();
        let timer = FocusSessionTimer::new(session.clone());
        timer.start(1, "first");

        // The cancel lands in the state, a new session starts, then the
        // cancel gets around to stopping its ticker
        let cancelled = session.with_state(|state| {
            state.focus.cancel().unwrap();
            state.focus.run()
        });
        timer.start(1, "second");
        timer.release_ticker(cancelled);

        tokio::time::sleep(Duration::from_millis(60_500)).await;
        assert!(!timer.state().is_active());
        assert_eq!(session.progress().value(), 10);
        assert!(matches!(timer.start(1, ""), FocusOutcome::Started { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outdated_ticker_does_not_replace_newer_one() {
        let session = Session::in_memory();
        let timer = FocusSessionTimer::new(session.clone());
        timer.start(1, "");

        let outdated = tokio::spawn(std::future::pending::<()>());
        timer.install_ticker(0, outdated);
        assert_eq!(timer.lock_ticker().as_ref().map(|(run, _)| *run), Some(1));

        tokio::time::sleep(Duration::from_millis(60_500)).await;
        assert_eq!(session.progress().value(), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_cancel_and_start_never_orphan_a_session() {
        let timer = Arc::new(FocusSessionTimer::new(Session::in_memory()));

        for _ in 0..500 {
            timer.start(1, "");
            let cancelling = {
                let timer = timer.clone();
                tokio::spawn(async move { timer.cancel() })
            };
            let starting = {
                let timer = timer.clone();
                tokio::spawn(async move { timer.start(1, "") })
            };
            cancelling.await.unwrap();
            starting.await.unwrap();

            let run = timer.session.read(|state| state.focus.run());
            if timer.state().is_active() {
                let installed = timer.lock_ticker().as_ref().map(|(run, _)| *run);
                assert_eq!(installed, Some(run));
            }
            timer.cancel();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_and_focus_rewards_on_the_same_tick() {
        for (earned, expected) in [(0, 15), (90, 100)] {
            let session = Session::in_memory();
            session.with_state(|state| {
                state.plan.reward(earned);
                state.plan.commit_summary(Summary::default());
                state
                    .plan
                    .commit_tasks(vec![Task::new("t1", "Read", "", Priority::High, "1h")])
                    .unwrap();
                state.plan.toggle_status("t1");
            });
            let timer = FocusSessionTimer::new(session.clone());
            timer.start(1, "");

            // Wakes on the instant of the final tick
            tokio::time::sleep(Duration::from_secs(60)).await;
            session.toggle_status("t1");
            tokio::time::sleep(Duration::from_millis(500)).await;

            assert!(!timer.state().is_active());
            assert_eq!(session.progress().value(), expected);
        }
    }
}
