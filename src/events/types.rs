use crate::constants::events;
use crate::models::BundleId;
use serde::{Deserialize, Serialize};

/// Outbound event emitted after a committed state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum FlowEvent {
    #[serde(rename_all = "camelCase")]
    WorkClaimed {
        bundle_id: BundleId,
        step_number: u32,
        operator_id: String,
    },
    #[serde(rename_all = "camelCase")]
    WorkReleased {
        bundle_id: BundleId,
        step_number: u32,
        operator_id: String,
    },
    #[serde(rename_all = "camelCase")]
    StepCompleted { bundle_id: BundleId, step_number: u32 },
    #[serde(rename_all = "camelCase")]
    StepsUnlocked {
        bundle_id: BundleId,
        step_numbers: Vec<u32>,
    },
    #[serde(rename_all = "camelCase")]
    BundleCompleted { bundle_id: BundleId },
}

impl FlowEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::WorkClaimed { .. } => events::WORK_CLAIMED,
            Self::WorkReleased { .. } => events::WORK_RELEASED,
            Self::StepCompleted { .. } => events::STEP_COMPLETED,
            Self::StepsUnlocked { .. } => events::STEPS_UNLOCKED,
            Self::BundleCompleted { .. } => events::BUNDLE_COMPLETED,
        }
    }

    pub fn bundle_id(&self) -> &BundleId {
        match self {
            Self::WorkClaimed { bundle_id, .. }
            | Self::WorkReleased { bundle_id, .. }
            | Self::StepCompleted { bundle_id, .. }
            | Self::StepsUnlocked { bundle_id, .. }
            | Self::BundleCompleted { bundle_id } => bundle_id,
        }
    }

    /// Deduplication key: the same logical occurrence always yields the same key
    ///
    /// Claims and releases can legitimately repeat for one unit, so their key
    /// includes the operator; a consumer that sees the same claim key twice in a
    /// row is looking at a redelivery.
    pub fn natural_key(&self) -> String {
        match self {
            Self::WorkClaimed {
                bundle_id,
                step_number,
                operator_id,
            }
            | Self::WorkReleased {
                bundle_id,
                step_number,
                operator_id,
            } => format!("{}:{bundle_id}:{step_number}:{operator_id}", self.event_name()),
            Self::StepCompleted {
                bundle_id,
                step_number,
            } => format!("{}:{bundle_id}:{step_number}", self.event_name()),
            Self::StepsUnlocked {
                bundle_id,
                step_numbers,
            } => {
                let steps: Vec<String> = step_numbers.iter().map(u32::to_string).collect();
                format!("{}:{bundle_id}:{}", self.event_name(), steps.join(","))
            }
            Self::BundleCompleted { bundle_id } => format!("{}:{bundle_id}", self.event_name()),
        }
    }
}
