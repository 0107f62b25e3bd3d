//! Error types for building a path from external map data.

/// Indicates that the supplied waypoints do not describe a flyable path.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidPathError {
    /// No waypoints were supplied at all.
    #[error("a path requires at least one waypoint")]
    Empty,

    /// Two consecutive waypoints coincide, which would translate into a no-op move.
    #[error("waypoints {index} and {} coincide (zero-length segment)", .index + 1)]
    ZeroLengthSegment { index: usize },

    /// A coordinate is NaN or infinite.
    #[error("waypoint {index} has a non-finite coordinate")]
    NonFinite { index: usize },

    /// Two consecutive waypoints are so far apart that their distance overflows.
    #[error("waypoints {index} and {} are too far apart to measure", .index + 1)]
    UnboundedSegment { index: usize },

    /// Merging short segments left a single leg that is itself too short.
    #[error("first and last waypoints are {span} apart, less than the minimum leg of {min_len}")]
    SpanTooShort { span: f64, min_len: f64 },
}
