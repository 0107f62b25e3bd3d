//! The mission state machine: connect, take off, fly the translated path, land.
//!
//! ```text
//! Idle -> Connecting -> Connected -> TakingOff -> Flying -> Landing -> Disconnected
//!              \             \            \          \          \
//!               +-------------+------------+----------+----------+--> Aborted(reason)
//! ```
//!
//! The machine dispatches one command at a time and waits for its [`CommandResult`] before
//! producing the next. Safety checks run at a single checkpoint right before each flight command
//! is released.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use bon::Builder;
use tracing::{debug, error, info, warn};

use super::StateMachine;
use super::wrappers::input::SystemInput;
use crate::command::{Command, CommandResult};
use crate::telemetry::TelemetrySnapshot;

/// Mission-level retry and safety policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct MissionConfig {
    /// Additional Connect attempts after the first one fails.
    #[builder(default = 3)]
    pub connect_retries: u32,

    /// Additional Land attempts after the first one fails.
    #[builder(default = 5)]
    pub land_retries: u32,

    /// Battery percentage below which the vehicle lands immediately.
    #[builder(default = 10)]
    pub min_safe_battery: u8,

    /// Maximum silence from the vehicle before it is landed.
    #[builder(default = Duration::from_secs(10))]
    pub heartbeat_timeout: Duration,

    /// Issue one best-effort EmergencyStop once landing has been given up on.
    #[builder(default)]
    pub emergency_stop_on_land_failure: bool,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Why a mission ended without completing its path.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    /// Connect was never acknowledged.
    LinkUnreachable,
    /// A command timed out once the mission was under way. No Land was attempted.
    LinkLost,
    /// The vehicle refused to take off.
    PreflightRejected { reason: String },
    /// The vehicle refused a flight command; it was landed instead of continuing.
    CommandRejected { command: Command, reason: String },
    /// Land was never acknowledged. The vehicle may still be airborne.
    LandFailed,
    /// The operator cancelled the mission.
    OperatorAbort,
    /// Battery dropped below the safe threshold; the vehicle was landed.
    LowBattery { battery_pct: u8 },
    /// The vehicle went silent for too long; it was landed.
    HeartbeatLost { stale: Duration },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::LinkUnreachable => write!(f, "vehicle unreachable"),
            AbortReason::LinkLost => write!(f, "link lost mid-mission"),
            AbortReason::PreflightRejected { reason } => {
                write!(f, "takeoff rejected by vehicle: {reason}")
            }
            AbortReason::CommandRejected { command, reason } => {
                write!(f, "{command:?} rejected by vehicle: {reason}")
            }
            AbortReason::LandFailed => write!(f, "landing never acknowledged"),
            AbortReason::OperatorAbort => write!(f, "aborted by operator"),
            AbortReason::LowBattery { battery_pct } => {
                write!(f, "battery low ({battery_pct}%)")
            }
            AbortReason::HeartbeatLost { stale } => {
                write!(f, "no heartbeat for {:.1}s", stale.as_secs_f64())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MissionState {
    Idle,
    Connecting,
    Connected,
    TakingOff,
    Flying,
    Landing,
    Disconnected,
    Aborted(AbortReason),
}

impl MissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MissionState::Disconnected | MissionState::Aborted(_))
    }
}

/// A request to stop flying the path, from either the operator or the safety envelope.
///
/// Both sources are consumed at the same checkpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AbortSignal {
    Operator,
    LowBattery { battery_pct: u8 },
    HeartbeatLost { stale: Duration },
}

impl From<AbortSignal> for AbortReason {
    fn from(signal: AbortSignal) -> Self {
        match signal {
            AbortSignal::Operator => AbortReason::OperatorAbort,
            AbortSignal::LowBattery { battery_pct } => AbortReason::LowBattery { battery_pct },
            AbortSignal::HeartbeatLost { stale } => AbortReason::HeartbeatLost { stale },
        }
    }
}

#[derive(Debug)]
pub enum MissionInput {
    Connect,
    StartMission(Vec<Command>),
    Result(CommandResult),
    Telemetry(TelemetrySnapshot),
    Abort,
}

#[derive(Debug, PartialEq)]
pub enum MissionOutput {
    /// Send this command and feed its result back as [`MissionInput::Result`].
    Dispatch(Command),
    /// The mission reached a terminal state. Emitted exactly once.
    Finished(MissionState),
}

/// One mission's worth of sequencing state. A new mission requires a new machine.
#[derive(Debug)]
pub struct MissionMachine {
    config: MissionConfig,
    state: MissionState,
    plan: VecDeque<Command>,
    outbox: Option<Command>,
    in_flight: Option<Command>,
    failures: u32,
    now: Option<Instant>,
    telemetry: TelemetrySnapshot,
    flying_since: Option<Instant>,
    abort_requested: bool,
    landing_cause: Option<AbortReason>,
    reported: bool,
}

impl MissionMachine {
    pub fn new(config: MissionConfig) -> Self {
        Self {
            config,
            state: MissionState::Idle,
            plan: VecDeque::new(),
            outbox: None,
            in_flight: None,
            failures: 0,
            now: None,
            telemetry: TelemetrySnapshot::default(),
            flying_since: None,
            abort_requested: false,
            landing_cause: None,
            reported: false,
        }
    }

    pub fn state(&self) -> &MissionState {
        &self.state
    }

    /// Flight commands not yet dispatched.
    pub fn remaining_commands(&self) -> usize {
        self.plan.len()
    }

    fn process_connect(&mut self) {
        if self.state != MissionState::Idle {
            warn!(state = ?self.state, "Connect ignored outside Idle");
            return;
        }
        self.transition(MissionState::Connecting);
        self.failures = 0;
        self.outbox = Some(Command::Connect);
    }

    fn process_start(&mut self, plan: Vec<Command>) {
        if self.state != MissionState::Connected {
            warn!(state = ?self.state, "StartMission ignored outside Connected");
            return;
        }
        info!(commands = plan.len(), "Starting mission");
        self.plan = plan.into();
        self.transition(MissionState::TakingOff);
        self.outbox = Some(Command::Takeoff);
    }

    fn process_result(&mut self, result: CommandResult) {
        let Some(command) = self.in_flight.take() else {
            warn!(?result, "Result received with no command in flight");
            return;
        };
        debug!(?command, ?result, "Command resolved");

        match self.state {
            MissionState::Connecting => match result {
                CommandResult::Ack => self.transition(MissionState::Connected),
                CommandResult::Nack(_) | CommandResult::Timeout => {
                    self.failures += 1;
                    if self.failures > self.config.connect_retries {
                        self.abort(AbortReason::LinkUnreachable);
                    } else {
                        warn!(attempt = self.failures, ?result, "Connect failed, retrying");
                        self.outbox = Some(Command::Connect);
                    }
                }
            },

            MissionState::TakingOff => match result {
                CommandResult::Ack => {
                    self.flying_since = self.now;
                    self.transition(MissionState::Flying);
                }
                CommandResult::Nack(reason) => {
                    self.abort(AbortReason::PreflightRejected { reason });
                }
                CommandResult::Timeout => self.abort(AbortReason::LinkLost),
            },

            MissionState::Flying => match result {
                CommandResult::Ack => {}
                CommandResult::Nack(reason) => {
                    warn!(?command, %reason, "Vehicle rejected flight command, landing");
                    self.begin_landing(Some(AbortReason::CommandRejected { command, reason }));
                }
                CommandResult::Timeout => self.abort(AbortReason::LinkLost),
            },

            MissionState::Landing => match result {
                CommandResult::Ack => match self.landing_cause.take() {
                    Some(cause) => self.transition(MissionState::Aborted(cause)),
                    None => self.transition(MissionState::Disconnected),
                },
                CommandResult::Nack(_) | CommandResult::Timeout => {
                    self.failures += 1;
                    if self.failures > self.config.land_retries {
                        error!(attempts = self.failures, "Landing was never acknowledged");
                        self.abort(AbortReason::LandFailed);
                        if self.config.emergency_stop_on_land_failure {
                            self.outbox = Some(Command::EmergencyStop);
                        }
                    } else {
                        warn!(attempt = self.failures, ?result, "Land failed, retrying");
                        self.outbox = Some(Command::Land);
                    }
                }
            },

            // Only the best-effort EmergencyStop resolves after a terminal state
            MissionState::Disconnected | MissionState::Aborted(_) => {}

            MissionState::Idle | MissionState::Connected => {
                warn!(state = ?self.state, ?command, "Unexpected command result");
            }
        }
    }

    fn process_abort(&mut self) {
        if !self.abort_requested {
            info!(state = ?self.state, "Operator abort requested");
            self.abort_requested = true;
        }
    }

    /// The pending abort signal, if any, in priority order.
    fn abort_signal(&self) -> Option<AbortSignal> {
        if self.abort_requested {
            return Some(AbortSignal::Operator);
        }

        if let Some(battery_pct) = self.telemetry.battery_pct {
            if battery_pct < self.config.min_safe_battery {
                return Some(AbortSignal::LowBattery { battery_pct });
            }
        }

        let now = self.now?;
        let reference = match (self.telemetry.last_heartbeat, self.flying_since) {
            (Some(heartbeat), Some(since)) => heartbeat.max(since),
            (Some(heartbeat), None) => heartbeat,
            (None, Some(since)) => since,
            (None, None) => return None,
        };
        let stale = now.saturating_duration_since(reference);
        (stale > self.config.heartbeat_timeout).then_some(AbortSignal::HeartbeatLost { stale })
    }

    /// Runs before anything is released to the link.
    fn checkpoint(&mut self) {
        match self.state {
            MissionState::Connecting | MissionState::Connected | MissionState::TakingOff => {
                // Still on the ground: nothing to land
                if self.abort_requested {
                    self.abort(AbortReason::OperatorAbort);
                }
            }
            MissionState::Flying => {
                if let Some(signal) = self.abort_signal() {
                    warn!(?signal, remaining = self.plan.len(), "Abandoning path");
                    self.begin_landing(Some(signal.into()));
                    return;
                }

                if self.outbox.is_none() {
                    match self.plan.pop_front() {
                        Some(command) => self.outbox = Some(command),
                        None => {
                            info!("Path complete");
                            self.begin_landing(None);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn begin_landing(&mut self, cause: Option<AbortReason>) {
        self.plan.clear();
        self.failures = 0;
        self.landing_cause = cause;
        self.transition(MissionState::Landing);
        self.outbox = Some(Command::Land);
    }

    fn abort(&mut self, reason: AbortReason) {
        self.plan.clear();
        self.outbox = None;
        self.transition(MissionState::Aborted(reason));
    }

    fn transition(&mut self, next: MissionState) {
        info!(from = ?self.state, to = ?next, "Mission state transition");
        self.state = next;
    }

    fn poll_dispatch(&mut self) -> Option<Command> {
        if self.in_flight.is_some() {
            return None;
        }

        self.checkpoint();

        let command = self.outbox.take()?;
        self.in_flight = Some(command.clone());
        Some(command)
    }

    fn poll_finished(&mut self) -> Option<MissionState> {
        if self.in_flight.is_none() && self.state.is_terminal() && !self.reported {
            self.reported = true;
            return Some(self.state.clone());
        }
        None
    }
}

impl StateMachine for MissionMachine {
    type Input = SystemInput<MissionInput, Instant>;
    type Output = MissionOutput;

    fn process_input(&mut self, input: Self::Input) {
        match input {
            SystemInput::System(now) => self.now = Some(now),
            SystemInput::Input(MissionInput::Connect) => self.process_connect(),
            SystemInput::Input(MissionInput::StartMission(plan)) => self.process_start(plan),
            SystemInput::Input(MissionInput::Result(result)) => self.process_result(result),
            SystemInput::Input(MissionInput::Telemetry(snapshot)) => self.telemetry = snapshot,
            SystemInput::Input(MissionInput::Abort) => self.process_abort(),
        }
    }

    fn poll_output(&mut self) -> Option<Self::Output> {
        if let Some(command) = self.poll_dispatch() {
            return Some(MissionOutput::Dispatch(command));
        }

        if let Some(state) = self.poll_finished() {
            return Some(MissionOutput::Finished(state));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(machine: &mut MissionMachine, input: MissionInput) {
        machine.process_input(SystemInput::Input(input));
    }

    fn reply(machine: &mut MissionMachine, result: CommandResult) {
        send(machine, MissionInput::Result(result));
    }

    fn expect_dispatch(machine: &mut MissionMachine) -> Command {
        match machine.poll_output() {
            Some(MissionOutput::Dispatch(command)) => command,
            other => panic!("expected a dispatch, got {other:?}"),
        }
    }

    fn flight_plan() -> Vec<Command> {
        vec![
            Command::clockwise(0.0),
            Command::forward(50.0),
            Command::forward(50.0),
        ]
    }

    /// A machine that has taken off at `t0` and has `plan` queued.
    fn airborne(config: MissionConfig, plan: Vec<Command>, t0: Instant) -> MissionMachine {
        let mut machine = MissionMachine::new(config);
        machine.process_input(SystemInput::System(t0));

        send(&mut machine, MissionInput::Connect);
        assert_eq!(expect_dispatch(&mut machine), Command::Connect);
        reply(&mut machine, CommandResult::Ack);
        assert!(machine.poll_output().is_none());

        send(&mut machine, MissionInput::StartMission(plan));
        assert_eq!(expect_dispatch(&mut machine), Command::Takeoff);
        reply(&mut machine, CommandResult::Ack);
        assert_eq!(machine.state(), &MissionState::Flying);

        machine
    }

    #[test]
    fn test_nominal_mission() {
        let mut machine = airborne(MissionConfig::default(), flight_plan(), Instant::now());

        for expected in flight_plan() {
            assert_eq!(expect_dispatch(&mut machine), expected);
            reply(&mut machine, CommandResult::Ack);
        }

        assert_eq!(expect_dispatch(&mut machine), Command::Land);
        assert_eq!(machine.state(), &MissionState::Landing);
        reply(&mut machine, CommandResult::Ack);

        assert_eq!(
            machine.poll_output(),
            Some(MissionOutput::Finished(MissionState::Disconnected))
        );
        // Finished is only reported once
        assert!(machine.poll_output().is_none());
    }

    #[test]
    fn test_no_output_while_command_in_flight() {
        let mut machine = airborne(MissionConfig::default(), flight_plan(), Instant::now());

        expect_dispatch(&mut machine);
        assert!(machine.poll_output().is_none());
        assert!(machine.poll_output().is_none());
        assert_eq!(machine.remaining_commands(), 2);
    }

    #[test]
    fn test_connect_retries_exhausted() {
        let mut machine = MissionMachine::new(MissionConfig::default());
        send(&mut machine, MissionInput::Connect);

        // First attempt plus three retries
        for _ in 0..4 {
            assert_eq!(expect_dispatch(&mut machine), Command::Connect);
            reply(&mut machine, CommandResult::Timeout);
        }

        assert_eq!(
            machine.poll_output(),
            Some(MissionOutput::Finished(MissionState::Aborted(
                AbortReason::LinkUnreachable
            )))
        );
    }

    #[test]
    fn test_connect_recovers_within_retries() {
        let mut machine = MissionMachine::new(MissionConfig::default());
        send(&mut machine, MissionInput::Connect);

        expect_dispatch(&mut machine);
        reply(&mut machine, CommandResult::Timeout);
        expect_dispatch(&mut machine);
        reply(&mut machine, CommandResult::Ack);

        assert_eq!(machine.state(), &MissionState::Connected);
    }

    #[test]
    fn test_takeoff_rejected() {
        let mut machine = MissionMachine::new(MissionConfig::default());
        send(&mut machine, MissionInput::Connect);
        expect_dispatch(&mut machine);
        reply(&mut machine, CommandResult::Ack);

        send(&mut machine, MissionInput::StartMission(flight_plan()));
        assert_eq!(expect_dispatch(&mut machine), Command::Takeoff);
        reply(&mut machine, CommandResult::Nack("low battery".into()));

        assert_eq!(
            machine.poll_output(),
            Some(MissionOutput::Finished(MissionState::Aborted(
                AbortReason::PreflightRejected {
                    reason: "low battery".into()
                }
            )))
        );
    }

    #[test]
    fn test_low_battery_lands_before_next_command() {
        let t0 = Instant::now();
        let mut machine = airborne(MissionConfig::default(), flight_plan(), t0);

        expect_dispatch(&mut machine);
        reply(&mut machine, CommandResult::Ack);

        send(
            &mut machine,
            MissionInput::Telemetry(TelemetrySnapshot {
                battery_pct: Some(5),
                height: Some(100.0),
                last_heartbeat: Some(t0),
            }),
        );

        // Two commands remain, but the next dispatch must be Land
        assert_eq!(expect_dispatch(&mut machine), Command::Land);
        assert_eq!(machine.state(), &MissionState::Landing);
        assert_eq!(machine.remaining_commands(), 0);

        reply(&mut machine, CommandResult::Ack);
        assert_eq!(
            machine.poll_output(),
            Some(MissionOutput::Finished(MissionState::Aborted(
                AbortReason::LowBattery { battery_pct: 5 }
            )))
        );
    }

    #[test]
    fn test_stale_heartbeat_lands() {
        let t0 = Instant::now();
        let mut machine = airborne(MissionConfig::default(), flight_plan(), t0);

        expect_dispatch(&mut machine);
        reply(&mut machine, CommandResult::Ack);

        // No telemetry at all since takeoff, and 11s have passed
        machine.process_input(SystemInput::System(t0 + Duration::from_secs(11)));

        assert_eq!(expect_dispatch(&mut machine), Command::Land);
        reply(&mut machine, CommandResult::Ack);
        assert!(matches!(
            machine.poll_output(),
            Some(MissionOutput::Finished(MissionState::Aborted(
                AbortReason::HeartbeatLost { .. }
            )))
        ));
    }

    #[test]
    fn test_recent_heartbeat_keeps_flying() {
        let t0 = Instant::now();
        let mut machine = airborne(MissionConfig::default(), flight_plan(), t0);

        send(
            &mut machine,
            MissionInput::Telemetry(TelemetrySnapshot {
                battery_pct: Some(80),
                height: None,
                last_heartbeat: Some(t0 + Duration::from_secs(9)),
            }),
        );
        machine.process_input(SystemInput::System(t0 + Duration::from_secs(15)));

        assert_eq!(expect_dispatch(&mut machine), Command::clockwise(0.0));
    }

    #[test]
    fn test_mid_path_timeout_aborts_without_land() {
        let mut machine = airborne(MissionConfig::default(), flight_plan(), Instant::now());

        expect_dispatch(&mut machine);
        reply(&mut machine, CommandResult::Ack);
        expect_dispatch(&mut machine);
        reply(&mut machine, CommandResult::Timeout);

        assert_eq!(
            machine.poll_output(),
            Some(MissionOutput::Finished(MissionState::Aborted(
                AbortReason::LinkLost
            )))
        );
        assert!(machine.poll_output().is_none());
    }

    #[test]
    fn test_rejected_flight_command_lands() {
        let mut machine = airborne(MissionConfig::default(), flight_plan(), Instant::now());

        let command = expect_dispatch(&mut machine);
        reply(&mut machine, CommandResult::Nack("out of range".into()));

        assert_eq!(expect_dispatch(&mut machine), Command::Land);
        reply(&mut machine, CommandResult::Ack);
        assert_eq!(
            machine.poll_output(),
            Some(MissionOutput::Finished(MissionState::Aborted(
                AbortReason::CommandRejected {
                    command,
                    reason: "out of range".into()
                }
            )))
        );
    }

    #[test]
    fn test_land_retries_then_land_failed() {
        let mut machine = airborne(MissionConfig::default(), Vec::new(), Instant::now());

        // First attempt plus five retries
        for _ in 0..6 {
            assert_eq!(expect_dispatch(&mut machine), Command::Land);
            reply(&mut machine, CommandResult::Timeout);
        }

        assert_eq!(
            machine.poll_output(),
            Some(MissionOutput::Finished(MissionState::Aborted(
                AbortReason::LandFailed
            )))
        );
    }

    #[test]
    fn test_land_failure_triggers_emergency_stop() {
        let config = MissionConfig::builder()
            .land_retries(0)
            .emergency_stop_on_land_failure(true)
            .build();
        let mut machine = airborne(config, Vec::new(), Instant::now());

        assert_eq!(expect_dispatch(&mut machine), Command::Land);
        reply(&mut machine, CommandResult::Timeout);

        assert_eq!(expect_dispatch(&mut machine), Command::EmergencyStop);
        reply(&mut machine, CommandResult::Timeout);

        assert_eq!(
            machine.poll_output(),
            Some(MissionOutput::Finished(MissionState::Aborted(
                AbortReason::LandFailed
            )))
        );
    }

    #[test]
    fn test_operator_abort_while_flying_lands() {
        let mut machine = airborne(MissionConfig::default(), flight_plan(), Instant::now());

        expect_dispatch(&mut machine);
        // Requested mid-command: honored once the command resolves
        send(&mut machine, MissionInput::Abort);
        assert!(machine.poll_output().is_none());
        reply(&mut machine, CommandResult::Ack);

        assert_eq!(expect_dispatch(&mut machine), Command::Land);
        reply(&mut machine, CommandResult::Ack);
        assert_eq!(
            machine.poll_output(),
            Some(MissionOutput::Finished(MissionState::Aborted(
                AbortReason::OperatorAbort
            )))
        );
    }

    #[test]
    fn test_operator_abort_on_ground_skips_takeoff() {
        let mut machine = MissionMachine::new(MissionConfig::default());
        send(&mut machine, MissionInput::Connect);
        expect_dispatch(&mut machine);
        reply(&mut machine, CommandResult::Ack);

        send(&mut machine, MissionInput::Abort);
        send(&mut machine, MissionInput::StartMission(flight_plan()));

        assert_eq!(
            machine.poll_output(),
            Some(MissionOutput::Finished(MissionState::Aborted(
                AbortReason::OperatorAbort
            )))
        );
    }
}
