use std::fmt;

/// Direction of a translational move, relative to the vehicle's current heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveDirection {
    Forward,
    Back,
    Left,
    Right,
    Up,
    Down,
}

/// Direction of an in-place yaw rotation, as seen from above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RotateDirection {
    Clockwise,
    CounterClockwise,
}

/// One discrete instruction to the vehicle.
///
/// Move distances are in vehicle units and rotation values in degrees. Values produced by the
/// [translator](crate::translate) are always within the declared capability limits.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect,
    Takeoff,
    Move {
        direction: MoveDirection,
        distance: f64,
    },
    Rotate {
        direction: RotateDirection,
        degrees: f64,
    },
    Land,
    Disconnect,
    EmergencyStop,
}

impl Command {
    pub fn forward(distance: f64) -> Self {
        Self::Move {
            direction: MoveDirection::Forward,
            distance,
        }
    }

    pub fn clockwise(degrees: f64) -> Self {
        Self::Rotate {
            direction: RotateDirection::Clockwise,
            degrees,
        }
    }

    pub fn counter_clockwise(degrees: f64) -> Self {
        Self::Rotate {
            direction: RotateDirection::CounterClockwise,
            degrees,
        }
    }
}

/// An explicit answer from the vehicle to a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Nack(String),
}

/// The outcome of dispatching a single [`Command`] through a [`Link`](crate::link::Link).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Ack,
    /// The vehicle explicitly rejected the command. Never retried.
    Nack(String),
    /// No reply arrived within the retry budget; the link is presumed broken.
    Timeout,
}

impl From<Reply> for CommandResult {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Ack => CommandResult::Ack,
            Reply::Nack(reason) => CommandResult::Nack(reason),
        }
    }
}

/// Identifier correlating an outbound command with its reply. Monotonically increasing per link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceId(pub u32);

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
