//! The geometric description of a flight route: waypoints supplied by a map collaborator and the
//! segments derived from them.

pub mod error;

use serde::{Deserialize, Serialize};

pub use self::error::InvalidPathError;

/// A 2D coordinate in abstract map units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(&self, other: &Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Compass bearing towards `other` in degrees, `[0, 360)`.
    ///
    /// The positive y axis is 0° and the positive x axis is 90°, so a positive change of bearing
    /// is a clockwise turn.
    pub fn bearing_to(&self, other: &Point) -> f64 {
        let bearing = (other.x - self.x)
            .atan2(other.y - self.y)
            .to_degrees()
            .rem_euclid(360.0);

        // rem_euclid rounds tiny negative angles up to exactly 360.0
        if bearing >= 360.0 { 0.0 } else { bearing }
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// A straight leg between two consecutive waypoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub from: Point,
    pub to: Point,
    /// Always strictly positive.
    pub distance: f64,
    /// Degrees in `[0, 360)`.
    pub bearing: f64,
}

impl Segment {
    fn between(from: Point, to: Point) -> Self {
        Self {
            from,
            to,
            distance: from.distance_to(&to),
            bearing: from.bearing_to(&to),
        }
    }
}

/// An ordered, connected chain of segments.
///
/// A [`Path`] can only be obtained through [`build_path`], which guarantees that
/// `segments[i].to == segments[i + 1].from` and that no segment has zero length.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    waypoints: Vec<Point>,
    segments: Vec<Segment>,
}

impl Path {
    pub fn waypoints(&self) -> &[Point] {
        &self.waypoints
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns `true` for a single-waypoint path, which has nothing to fly.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn total_distance(&self) -> f64 {
        self.segments.iter().map(|segment| segment.distance).sum()
    }

    /// Produce a new path in which no segment is shorter than `min_len`, by folding each short
    /// segment into the one that follows it.
    ///
    /// Intermediate waypoints are dropped until the accumulated leg reaches `min_len`. The first
    /// and final waypoints are always kept, so when they lie closer than `min_len` to each other
    /// (a small closed loop, for instance) no valid path exists and
    /// [`InvalidPathError::SpanTooShort`] is returned.
    pub fn merge_short_segments(&self, min_len: f64) -> Result<Path, InvalidPathError> {
        let Some((last, rest)) = self.waypoints.split_last() else {
            return Err(InvalidPathError::Empty);
        };
        let Some((first, intermediate)) = rest.split_first() else {
            return Ok(self.clone());
        };

        let mut kept = vec![*first];
        for point in intermediate {
            let anchor = kept[kept.len() - 1];
            if anchor.distance_to(point) >= min_len {
                kept.push(*point);
            }
        }

        // Fold a short closing leg back until the final waypoint is far enough from its anchor
        while kept.len() > 1 && kept[kept.len() - 1].distance_to(last) < min_len {
            kept.pop();
        }
        let span = first.distance_to(last);
        if kept.len() == 1 && span < min_len {
            return Err(InvalidPathError::SpanTooShort { span, min_len });
        }
        kept.push(*last);

        build_path(&kept)
    }
}

/// Build a [`Path`] from an ordered sequence of at least one waypoint.
///
/// Distances are Euclidean and bearings are normalized to `[0, 360)`.
pub fn build_path(points: &[Point]) -> Result<Path, InvalidPathError> {
    if points.is_empty() {
        return Err(InvalidPathError::Empty);
    }

    if let Some(index) = points
        .iter()
        .position(|point| !point.x.is_finite() || !point.y.is_finite())
    {
        return Err(InvalidPathError::NonFinite { index });
    }

    let segments = points
        .windows(2)
        .enumerate()
        .map(|(index, pair)| {
            if pair[0] == pair[1] {
                return Err(InvalidPathError::ZeroLengthSegment { index });
            }
            let segment = Segment::between(pair[0], pair[1]);
            if !segment.distance.is_finite() {
                return Err(InvalidPathError::UnboundedSegment { index });
            }
            Ok(segment)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Path {
        waypoints: points.to_vec(),
        segments,
    })
}
