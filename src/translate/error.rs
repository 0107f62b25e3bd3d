//! Error types for path translation.

use std::fmt;

/// Which part of a route a translation error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    /// The vertical adjustment performed before the first segment.
    Altitude,
    /// The path segment at this index.
    Segment(usize),
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Altitude => write!(f, "altitude adjustment"),
            Leg::Segment(index) => write!(f, "segment {index}"),
        }
    }
}

/// Indicates that a leg is shorter than the smallest move the vehicle can execute.
///
/// Short segments must be merged into their successor by the caller (see
/// [`Path::merge_short_segments`](crate::path::Path::merge_short_segments)); the translator never
/// drops them silently.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{leg} is {distance} long, below the minimum move of {min_move}")]
pub struct UnreachableSegmentError {
    pub leg: Leg,
    pub distance: f64,
    pub min_move: f64,
}

/// Indicates that a set of capability limits cannot be honored by the translator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidLimits {
    #[error("{name} must be finite and positive, got {value}")]
    NotPositive { name: &'static str, value: f64 },

    #[error("max_single_move ({max_single_move}) must be at least twice min_move ({min_move})")]
    MoveRangeTooNarrow { max_single_move: f64, min_move: f64 },
}

/// Indicates that a path cannot be turned into vehicle commands.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TranslateError {
    #[error(transparent)]
    Unreachable(#[from] UnreachableSegmentError),

    /// A leg would expand into more commands than one leg may produce.
    #[error("{leg} would need more than {limit} commands")]
    TooManyCommands { leg: Leg, limit: usize },
}
