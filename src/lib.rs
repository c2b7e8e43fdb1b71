//! Klaris library crate
//!
//! Turns unstructured curriculum material into a study plan by driving a
//! sequence of external agents: a summary, a task set and a day-by-day
//! timeline, plus a copilot chat and a gamified focus timer.

pub mod api;
pub mod chat;
pub mod cli;
pub mod focus;
pub mod models;
pub mod pipeline;
pub mod prefs;
pub mod presets;
pub mod session;

// Re-export commonly used types
pub use chat::{ChatController, ChatOutcome};
pub use focus::{FocusOutcome, FocusSessionTimer};
pub use models::{PlanState, Stage, Summary, Task, TaskStatus, TimelineDay};
pub use pipeline::{PipelineController, StageError, StageOutcome};
pub use session::{Rejection, Session};
