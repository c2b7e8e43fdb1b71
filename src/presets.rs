//! Predefined agents, prompts and fallback data for Klaris
//!
//! This module defines the well-known agent ids the pipeline talks to, the
//! fixed prompt used for uploaded documents, and the demonstration summary the
//! summarizing stage falls back to when extraction fails.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::models::Summary;

/// Prompt sent to the summary agent alongside uploaded documents
pub const EXTRACTION_PROMPT: &str = "Extract goals, requirements, and deadlines from this document";

/// Progress earned when a task lands on `done`
pub const TASK_COMPLETION_REWARD: u8 = 5;

/// Progress earned when a focus session runs to zero
pub const FOCUS_COMPLETION_REWARD: u8 = 10;

/// Default focus session length in minutes
pub const DEFAULT_FOCUS_MINUTES: u32 = 25;

/// Number of characters of the raw notes shown in previews
pub const NOTES_PREVIEW_CHARS: usize = 50;

pub const SUMMARY_AGENT_ID: &str = "69858c4bfe576c19864be7ab";
pub const TASK_AGENT_ID: &str = "69858c5ca791e6e318b8dee2";
pub const PLANNING_AGENT_ID: &str = "69858c72c613a65b3c419476";
pub const CHAT_AGENT_ID: &str = "69858c892237a2c55706b069";

/// Identifiers of the four external agents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIds {
    pub summary: String,
    pub task: String,
    pub planning: String,
    pub chat: String,
}

impl Default for AgentIds {
    fn default() -> Self {
        Self {
            summary: SUMMARY_AGENT_ID.to_string(),
            task: TASK_AGENT_ID.to_string(),
            planning: PLANNING_AGENT_ID.to_string(),
            chat: CHAT_AGENT_ID.to_string(),
        }
    }
}

lazy_static! {
    static ref DEMO_SUMMARY: Summary = Summary {
        goals: vec![
            "Understand the core concepts of each course unit".to_string(),
            "Complete every graded assignment on time".to_string(),
            "Prepare a revision routine ahead of the final exam".to_string(),
        ],
        requirements: vec![
            "Attend weekly lectures and review the slides".to_string(),
            "Submit problem sets through the course portal".to_string(),
            "Deliver a final project with a short written report".to_string(),
        ],
        deadlines: vec![
            "Problem set 1: end of week 2".to_string(),
            "Project proposal: end of week 5".to_string(),
            "Final exam: week 12".to_string(),
        ],
        raw_notes: "Sample curriculum used while the document could not be analyzed. \
                    Start a new project to try again with your own material."
            .to_string(),
    };
}

/// Returns the fixed demonstration summary
pub fn demo_summary() -> Summary {
    DEMO_SUMMARY.clone()
}

/// Renders a second count as `m:ss`
pub fn format_clock(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
