//! Waypoint mission control for small UDP-commanded quadcopters.
//!
//! A mission turns a [`Path`](path::Path) of map points into vehicle [`Command`](command::Command)s,
//! then flies them over a lossy [`link`] under the supervision of a pure
//! [`MissionMachine`](state_machine::mission::MissionMachine) that owns every safety decision.

pub mod command;
pub mod config;
pub mod link;
pub mod mission;
pub mod path;
pub mod state_machine;
pub mod telemetry;
pub mod translate;

pub use command::{Command, CommandResult};
pub use mission::{AbortHandle, Mission, MissionOutcome, MissionReport};
pub use path::{Path, Point, build_path};
pub use translate::{CapabilityLimits, TranslateError, TranslateOptions, translate};
