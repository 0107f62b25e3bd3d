//! Conversion of a [`Path`] into the primitive commands a vehicle understands.
//!
//! Every segment becomes a rotation that aligns the vehicle with the segment bearing followed by
//! one or more forward moves. Moves longer than the vehicle can perform in one command are split
//! into the minimum number of equal sub-moves.

pub mod error;

use bon::{Builder, bon};

use crate::command::{Command, MoveDirection, RotateDirection};
use crate::path::Path;

pub use self::error::{InvalidLimits, Leg, TranslateError, UnreachableSegmentError};

/// Bounds the vehicle declares for a single command.
///
/// Only constructible through [`CapabilityLimits::builder`], which validates the bounds, so every
/// instance guarantees that any leg of at least `min_move` can be split into sub-moves within
/// `[min_move, max_single_move]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapabilityLimits {
    max_single_move: f64,
    min_move: f64,
    max_rotation: f64,
}

#[bon]
impl CapabilityLimits {
    #[builder]
    pub fn new(
        #[builder(default = 500.0)] max_single_move: f64,
        #[builder(default = 20.0)] min_move: f64,
        #[builder(default = 360.0)] max_rotation: f64,
    ) -> Result<Self, InvalidLimits> {
        for (name, value) in [
            ("max_single_move", max_single_move),
            ("min_move", min_move),
            ("max_rotation", max_rotation),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(InvalidLimits::NotPositive { name, value });
            }
        }

        if max_single_move < 2.0 * min_move {
            return Err(InvalidLimits::MoveRangeTooNarrow {
                max_single_move,
                min_move,
            });
        }

        Ok(Self {
            max_single_move,
            min_move,
            max_rotation,
        })
    }

    pub fn max_single_move(&self) -> f64 {
        self.max_single_move
    }

    pub fn min_move(&self) -> f64 {
        self.min_move
    }

    pub fn max_rotation(&self) -> f64 {
        self.max_rotation
    }
}

impl Default for CapabilityLimits {
    fn default() -> Self {
        Self {
            max_single_move: 500.0,
            min_move: 20.0,
            max_rotation: 360.0,
        }
    }
}

/// Per-mission translation settings.
#[derive(Debug, Clone, Copy, PartialEq, Builder)]
pub struct TranslateOptions {
    /// Heading of the vehicle when the path starts, in degrees (0 = positive map y axis).
    #[builder(default = 0.0)]
    pub initial_heading: f64,

    /// Signed vertical adjustment performed before the first segment. Positive climbs.
    #[builder(default = 0.0)]
    pub altitude_change: f64,

    /// Issue every move and turn as a whole number of units, so that a wire format that carries
    /// integers flies exactly the distances the commands add up to.
    #[builder(default)]
    pub integer_units: bool,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Most commands a single leg, or the turn before it, may expand into.
pub const MAX_COMMANDS_PER_LEG: usize = 1000;

/// Translate `path` into commands, starting from a heading of 0°.
pub fn translate(path: &Path, limits: &CapabilityLimits) -> Result<Vec<Command>, TranslateError> {
    translate_with(path, limits, &TranslateOptions::default())
}

/// Translate `path` into commands using explicit [`TranslateOptions`].
///
/// Heading is tracked locally for the duration of this call and starts from
/// `options.initial_heading` every time.
pub fn translate_with(
    path: &Path,
    limits: &CapabilityLimits,
    options: &TranslateOptions,
) -> Result<Vec<Command>, TranslateError> {
    let bounds = Bounds::new(limits, options.integer_units);
    let mut commands = Vec::new();

    if options.altitude_change != 0.0 {
        let height = options.altitude_change.abs();
        let direction = if options.altitude_change > 0.0 {
            MoveDirection::Up
        } else {
            MoveDirection::Down
        };
        commands.extend(split_move(Leg::Altitude, direction, height, &bounds)?);
    }

    let mut heading = normalize_heading(options.initial_heading);

    for (index, segment) in path.segments().iter().enumerate() {
        let leg = Leg::Segment(index);
        let turn = bounds.quantize(turn_angle(heading, segment.bearing));
        commands.extend(rotation(leg, turn, &bounds)?);
        heading = if bounds.integer {
            normalize_heading(heading + turn)
        } else {
            segment.bearing
        };

        commands.extend(split_move(leg, MoveDirection::Forward, segment.distance, &bounds)?);
    }

    Ok(commands)
}

/// Command bounds in the units commands are issued in.
#[derive(Debug, Clone, Copy)]
struct Bounds {
    max_move: f64,
    min_move: f64,
    max_rotation: f64,
    limits: CapabilityLimits,
    integer: bool,
}

impl Bounds {
    fn new(limits: &CapabilityLimits, integer: bool) -> Self {
        if integer {
            Self {
                max_move: limits.max_single_move.floor(),
                min_move: limits.min_move.ceil(),
                max_rotation: limits.max_rotation.floor().max(1.0),
                limits: *limits,
                integer,
            }
        } else {
            Self {
                max_move: limits.max_single_move,
                min_move: limits.min_move,
                max_rotation: limits.max_rotation,
                limits: *limits,
                integer,
            }
        }
    }

    fn quantize(&self, value: f64) -> f64 {
        if self.integer { value.round() } else { value }
    }

    /// Split `total` into the minimum number of near-equal parts no larger than `max`.
    fn split(&self, leg: Leg, total: f64, min: f64, max: f64) -> Result<Vec<f64>, TranslateError> {
        let count = (total / max).ceil();
        if count.is_nan() || count > MAX_COMMANDS_PER_LEG as f64 {
            return Err(TranslateError::TooManyCommands {
                leg,
                limit: MAX_COMMANDS_PER_LEG,
            });
        }
        let count = (count as usize).max(1);

        Ok(if self.integer {
            split_whole(total, count)
        } else {
            split_evenly(total, count, min, max)
        })
    }
}

fn check_reachable(leg: Leg, distance: f64, limits: &CapabilityLimits) -> Result<(), TranslateError> {
    if distance < limits.min_move {
        return Err(UnreachableSegmentError {
            leg,
            distance,
            min_move: limits.min_move,
        }
        .into());
    }
    Ok(())
}

fn normalize_heading(heading: f64) -> f64 {
    let heading = heading.rem_euclid(360.0);
    if heading >= 360.0 { 0.0 } else { heading }
}

/// Shortest signed turn from `heading` to `bearing`, in `(-180, 180]`. Positive is clockwise.
fn turn_angle(heading: f64, bearing: f64) -> f64 {
    let delta = (bearing - heading).rem_euclid(360.0);
    if delta > 180.0 { delta - 360.0 } else { delta }
}

/// Rotation commands for a signed `turn`.
///
/// Always yields at least one command, even for a zero turn, so every segment starts with an
/// explicit heading alignment.
fn rotation(leg: Leg, turn: f64, bounds: &Bounds) -> Result<Vec<Command>, TranslateError> {
    let direction = if turn < 0.0 {
        RotateDirection::CounterClockwise
    } else {
        RotateDirection::Clockwise
    };

    let parts = bounds.split(leg, turn.abs(), 0.0, bounds.max_rotation)?;
    Ok(parts
        .into_iter()
        .map(|degrees| Command::Rotate { direction, degrees })
        .collect())
}

fn split_move(
    leg: Leg,
    direction: MoveDirection,
    distance: f64,
    bounds: &Bounds,
) -> Result<Vec<Command>, TranslateError> {
    check_reachable(leg, distance, &bounds.limits)?;

    let distance = bounds.quantize(distance);
    let parts = bounds.split(leg, distance, bounds.min_move, bounds.max_move)?;
    if parts.iter().any(|part| *part < bounds.min_move) {
        return Err(UnreachableSegmentError {
            leg,
            distance,
            min_move: bounds.min_move,
        }
        .into());
    }

    Ok(parts
        .into_iter()
        .map(|distance| Command::Move {
            direction,
            distance,
        })
        .collect())
}

/// Equal parts of `total`. The final part absorbs the rounding remainder so the parts sum to
/// `total`.
fn split_evenly(total: f64, count: usize, min: f64, max: f64) -> Vec<f64> {
    let step = total / count as f64;

    let mut parts = vec![step.clamp(min, max); count];
    if let Some(last) = parts.last_mut() {
        *last = (total - step * (count - 1) as f64).clamp(min, max);
    }
    parts
}

/// Whole-unit parts of a whole `total`, differing by at most one unit. Larger parts come first.
fn split_whole(total: f64, count: usize) -> Vec<f64> {
    let total = total as u64;
    let count = count as u64;
    let base = total / count;
    let extra = total % count;

    (0..count)
        .map(|index| (base + u64::from(index < extra)) as f64)
        .collect()
}
