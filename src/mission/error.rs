//! Error types for mission setup.
//!
//! These are raised before or instead of flying. Failures once the mission is under way are
//! reported as a terminal [`MissionState`] instead.

use crate::path::InvalidPathError;
use crate::state_machine::mission::MissionState;
use crate::translate::TranslateError;

#[derive(Debug, thiserror::Error)]
pub enum MissionError {
    #[error(transparent)]
    InvalidPath(#[from] InvalidPathError),

    /// The path cannot be expressed in commands within the vehicle's limits.
    #[error(transparent)]
    Translate(#[from] TranslateError),

    /// The state machine stopped producing work without reaching a terminal state.
    #[error("mission stalled in state {0:?}")]
    Stalled(MissionState),
}
