use serde::{Deserialize, Serialize};

/// Occupancy of one analysis slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Idle,
    Busy,
    /// A job is running and a newer one waits behind it
    BusyPending,
}

impl SlotState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &SlotState) -> bool {
        use SlotState::*;

        matches!(
            (self, target),
            // submit
            (Idle, Busy) |
            (Busy, BusyPending) |
            (BusyPending, BusyPending) |

            // completion or failure
            (Busy, Idle) |
            (BusyPending, Busy)
        )
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Idle => "Idle",
            Self::Busy => "Busy",
            Self::BusyPending => "Busy+Pending",
        }
    }
}

impl Default for SlotState {
    fn default() -> Self {
        Self::Idle
    }
}
