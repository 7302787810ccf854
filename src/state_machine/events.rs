use crate::models::WorkAssignment;
use serde::{Deserialize, Serialize};

/// Events that can trigger step state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StepEvent {
    /// Every prerequisite step has completed
    Unlock,
    /// An operator acquired the unit
    Claim(WorkAssignment),
    /// The assignee or a supervisor gave the unit back
    Release,
    /// The bundle's full piece count passed the step
    Complete,
}

impl StepEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Unlock => "unlock",
            Self::Claim(_) => "claim",
            Self::Release => "release",
            Self::Complete => "complete",
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Extract the assignment if this is a claim event
    pub fn assignment(&self) -> Option<&WorkAssignment> {
        match self {
            Self::Claim(assignment) => Some(assignment),
            _ => None,
        }
    }
}
