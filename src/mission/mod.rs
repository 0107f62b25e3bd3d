//! Running a mission: the async driver around [`MissionMachine`].
//!
//! [`Mission`] owns the link for the duration of one flight. It translates the path up front,
//! then repeatedly samples the clock, the telemetry snapshot and the operator abort flag, feeds
//! them to the machine and performs whatever the machine asks for.

pub mod error;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bon::bon;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::command::Command;
use crate::link::Link;
use crate::path::Path;
use crate::state_machine::StateMachine;
use crate::state_machine::mission::{
    AbortReason, MissionConfig, MissionInput, MissionMachine, MissionOutput, MissionState,
};
use crate::state_machine::wrappers::input::SystemInput;
use crate::telemetry::TelemetryMonitor;
use crate::translate::{CapabilityLimits, TranslateOptions, translate_with};

pub use self::error::MissionError;

#[derive(Clone, Copy, Hash, PartialEq, Eq)]
pub struct MissionId(Uuid);

impl MissionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for MissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MissionId({})", self.0)
    }
}

impl fmt::Display for MissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cancels a running mission from anywhere.
///
/// Cancellation is cooperative: it takes effect before the next command is dispatched and never
/// interrupts a command that is already being retried.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    requested: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn request_abort(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MissionOutcome {
    Succeeded,
    Aborted(AbortReason),
}

/// Everything an operator needs to know about a finished mission.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionReport {
    pub mission_id: MissionId,
    pub final_state: MissionState,
    pub outcome: MissionOutcome,
    /// Commands handed to the link, in order. Retransmissions are not repeated here.
    pub dispatched: Vec<Command>,
}

/// A single flight over a [`Link`]. Consumed by [`run`](Mission::run).
#[derive(Debug)]
pub struct Mission<L> {
    id: MissionId,
    link: L,
    monitor: TelemetryMonitor,
    config: MissionConfig,
    limits: CapabilityLimits,
    options: TranslateOptions,
    abort: AbortHandle,
}

#[bon]
impl<L: Link> Mission<L> {
    /// `monitor` must be the monitor the link reports inbound traffic to.
    #[builder]
    pub fn new(
        link: L,
        monitor: TelemetryMonitor,
        #[builder(default)] config: MissionConfig,
        #[builder(default)] limits: CapabilityLimits,
        #[builder(default)] options: TranslateOptions,
    ) -> Self {
        Self {
            id: MissionId::generate(),
            link,
            monitor,
            config,
            limits,
            options,
            abort: AbortHandle::default(),
        }
    }

    pub fn id(&self) -> MissionId {
        self.id
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Fly `path` from connect to disconnect.
    ///
    /// Returns an error only if the path cannot be translated, in which case nothing was sent.
    /// Every other ending, successful or not, is described by the [`MissionReport`].
    pub async fn run(self, path: &Path) -> Result<MissionReport, MissionError> {
        let span = info_span!("mission", id = %self.id);
        self.execute(path).instrument(span).await
    }

    async fn execute(self, path: &Path) -> Result<MissionReport, MissionError> {
        let mut plan = Some(translate_with(path, &self.limits, &self.options)?);
        info!(
            segments = path.segments().len(),
            distance = path.total_distance(),
            commands = plan.as_ref().map_or(0, Vec::len),
            "Mission planned"
        );

        let mut machine = MissionMachine::new(self.config);
        let mut dispatched = Vec::new();
        machine.process_input(SystemInput::Input(MissionInput::Connect));

        let final_state = loop {
            machine.process_input(SystemInput::sample());
            machine.process_input(SystemInput::Input(MissionInput::Telemetry(
                self.monitor.snapshot(),
            )));
            if self.abort.is_requested() {
                machine.process_input(SystemInput::Input(MissionInput::Abort));
            }

            match machine.poll_output() {
                Some(MissionOutput::Dispatch(command)) => {
                    dispatched.push(command.clone());
                    let result = self.link.send(command).await;
                    machine.process_input(SystemInput::Input(MissionInput::Result(result)));
                }
                Some(MissionOutput::Finished(state)) => break state,
                // Connected and waiting for the path
                None => match plan.take() {
                    Some(plan) => {
                        machine.process_input(SystemInput::Input(MissionInput::StartMission(plan)))
                    }
                    None => return Err(MissionError::Stalled(machine.state().clone())),
                },
            }
        };

        if !dispatched.is_empty() {
            self.link.send(Command::Disconnect).await;
        }
        self.monitor.reset();

        let outcome = match &final_state {
            MissionState::Aborted(reason) => {
                warn!(%reason, "Mission aborted");
                MissionOutcome::Aborted(reason.clone())
            }
            _ => {
                info!(commands = dispatched.len(), "Mission complete");
                MissionOutcome::Succeeded
            }
        };

        Ok(MissionReport {
            mission_id: self.id,
            final_state,
            outcome,
            dispatched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandResult, Reply, SequenceId};
    use crate::link::channel::{DatagramChannel, MemoryChannel};
    use crate::link::codec::TextCodec;
    use crate::link::{LinkConfig, LinkTransport};
    use crate::path::{Point, build_path};
    use crate::translate::TranslateError;
    use crate::telemetry::TelemetryFrame;
    use std::sync::Mutex;

    enum VehicleAction {
        Reply(Reply),
        Silent,
        StateThenAck(TelemetryFrame),
    }

    type Received = Arc<Mutex<Vec<(SequenceId, Command)>>>;

    /// A simulated vehicle speaking the tagged text protocol.
    fn spawn_vehicle<F>(channel: MemoryChannel, behavior: F) -> Received
    where
        F: Fn(SequenceId, &Command) -> VehicleAction + Send + 'static,
    {
        let received: Received = Arc::default();
        let log = Arc::clone(&received);

        tokio::spawn(async move {
            let codec = TextCodec::tagged();
            while let Ok(datagram) = channel.recv().await {
                let Some((Some(seq), command)) = codec.decode_command(&datagram) else {
                    continue;
                };
                let action = behavior(seq, &command);
                log.lock().unwrap().push((seq, command));

                match action {
                    VehicleAction::Reply(reply) => {
                        let _ = channel.send(&TextCodec::encode_reply(Some(seq), &reply)).await;
                    }
                    VehicleAction::Silent => {}
                    VehicleAction::StateThenAck(frame) => {
                        let _ = channel.send(&TextCodec::encode_state(&frame)).await;
                        let _ = channel
                            .send(&TextCodec::encode_reply(Some(seq), &Reply::Ack))
                            .await;
                    }
                }
            }
        });

        received
    }

    fn corner_path() -> Path {
        let points: Vec<Point> = [(0.0, 0.0), (0.0, 100.0), (100.0, 100.0)]
            .into_iter()
            .map(Point::from)
            .collect();
        build_path(&points).unwrap()
    }

    fn limits() -> CapabilityLimits {
        CapabilityLimits::builder()
            .max_single_move(50.0)
            .build()
            .unwrap()
    }

    fn mission_over(
        channel: MemoryChannel,
    ) -> Mission<LinkTransport<MemoryChannel, TextCodec>> {
        let monitor = TelemetryMonitor::new();
        let link = LinkTransport::spawn(
            channel,
            TextCodec::tagged(),
            LinkConfig::default(),
            monitor.clone(),
        );
        Mission::builder()
            .link(link)
            .monitor(monitor)
            .limits(limits())
            .build()
    }

    fn corner_route_commands() -> Vec<Command> {
        vec![
            Command::clockwise(0.0),
            Command::forward(50.0),
            Command::forward(50.0),
            Command::clockwise(90.0),
            Command::forward(50.0),
            Command::forward(50.0),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_ack_mission_disconnects() {
        let (ours, theirs) = MemoryChannel::pair();
        let received = spawn_vehicle(theirs, |_, _| VehicleAction::Reply(Reply::Ack));

        let report = mission_over(ours).run(&corner_path()).await.unwrap();

        let mut expected = vec![Command::Connect, Command::Takeoff];
        expected.extend(corner_route_commands());
        expected.push(Command::Land);

        assert_eq!(report.final_state, MissionState::Disconnected);
        assert_eq!(report.outcome, MissionOutcome::Succeeded);
        assert_eq!(report.dispatched, expected);

        // What reached the vehicle, in order. Disconnect and the zero turn stay local
        let on_wire: Vec<Command> = received
            .lock()
            .unwrap()
            .iter()
            .map(|(_, command)| command.clone())
            .collect();
        let sent: Vec<Command> = expected
            .into_iter()
            .filter(|command| *command != Command::clockwise(0.0))
            .collect();
        assert_eq!(on_wire, sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_lost_on_third_flight_command_never_lands() {
        let (ours, theirs) = MemoryChannel::pair();
        // Sequence ids: 1 Connect, 2 Takeoff, 3..5 the first three flight commands
        let received = spawn_vehicle(theirs, |seq, _| {
            if seq == SequenceId(5) {
                VehicleAction::Silent
            } else {
                VehicleAction::Reply(Reply::Ack)
            }
        });

        let report = mission_over(ours).run(&corner_path()).await.unwrap();

        assert_eq!(report.final_state, MissionState::Aborted(AbortReason::LinkLost));
        assert_eq!(report.outcome, MissionOutcome::Aborted(AbortReason::LinkLost));
        assert_eq!(report.dispatched.len(), 5);

        let received = received.lock().unwrap();
        assert!(received.iter().all(|(_, command)| *command != Command::Land));
        // The silent command was sent once and retransmitted three times
        assert_eq!(
            received.iter().filter(|(seq, _)| *seq == SequenceId(5)).count(),
            4
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_battery_telemetry_lands_early() {
        let (ours, theirs) = MemoryChannel::pair();
        let _received = spawn_vehicle(theirs, |seq, _| {
            if seq == SequenceId(4) {
                VehicleAction::StateThenAck(TelemetryFrame {
                    battery_pct: Some(5),
                    height: Some(80.0),
                })
            } else {
                VehicleAction::Reply(Reply::Ack)
            }
        });

        let mission = mission_over(ours);
        let monitor = mission.monitor.clone();
        let report = mission.run(&corner_path()).await.unwrap();

        assert_eq!(
            report.dispatched,
            vec![
                Command::Connect,
                Command::Takeoff,
                Command::clockwise(0.0),
                Command::forward(50.0),
                Command::Land,
            ]
        );
        assert_eq!(
            report.outcome,
            MissionOutcome::Aborted(AbortReason::LowBattery { battery_pct: 5 })
        );

        // Telemetry does not outlive the mission
        assert_eq!(monitor.snapshot().battery_pct, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_takeoff_rejection_is_preflight_failure() {
        let (ours, theirs) = MemoryChannel::pair();
        let _received = spawn_vehicle(theirs, |_, command| match command {
            Command::Takeoff => VehicleAction::Reply(Reply::Nack("error battery low".into())),
            _ => VehicleAction::Reply(Reply::Ack),
        });

        let report = mission_over(ours).run(&corner_path()).await.unwrap();

        assert_eq!(
            report.outcome,
            MissionOutcome::Aborted(AbortReason::PreflightRejected {
                reason: "error battery low".into()
            })
        );
        assert_eq!(report.dispatched, vec![Command::Connect, Command::Takeoff]);
    }

    /// A link that acks everything and requests an operator abort when it sees `trigger`.
    struct AbortingLink {
        trigger: Command,
        abort: Mutex<Option<AbortHandle>>,
        sent: Arc<Mutex<Vec<Command>>>,
    }

    impl AbortingLink {
        fn new(trigger: Command) -> (Self, Arc<Mutex<Vec<Command>>>) {
            let sent: Arc<Mutex<Vec<Command>>> = Arc::default();
            let link = Self {
                trigger,
                abort: Mutex::new(None),
                sent: Arc::clone(&sent),
            };
            (link, sent)
        }
    }

    impl Link for AbortingLink {
        async fn send(&self, command: Command) -> CommandResult {
            if command == self.trigger {
                if let Some(abort) = self.abort.lock().unwrap().as_ref() {
                    abort.request_abort();
                }
            }
            self.sent.lock().unwrap().push(command);
            CommandResult::Ack
        }
    }

    #[tokio::test]
    async fn test_operator_abort_lands_and_reports() {
        let (link, sent) = AbortingLink::new(Command::clockwise(90.0));
        let mission = Mission::builder()
            .link(link)
            .monitor(TelemetryMonitor::new())
            .limits(limits())
            .build();
        *mission.link.abort.lock().unwrap() = Some(mission.abort_handle());

        let report = mission.run(&corner_path()).await.unwrap();

        let expected = vec![
            Command::Connect,
            Command::Takeoff,
            Command::clockwise(0.0),
            Command::forward(50.0),
            Command::forward(50.0),
            Command::clockwise(90.0),
            Command::Land,
        ];
        assert_eq!(report.dispatched, expected);
        assert_eq!(report.final_state, MissionState::Aborted(AbortReason::OperatorAbort));

        // Disconnect goes to the link after the report is settled
        let sent = sent.lock().unwrap();
        assert_eq!(sent.last(), Some(&Command::Disconnect));
        assert_eq!(sent.len(), expected.len() + 1);
    }

    #[tokio::test]
    async fn test_abort_before_connect_sends_nothing() {
        let (link, sent) = AbortingLink::new(Command::EmergencyStop);
        let mission = Mission::builder()
            .link(link)
            .monitor(TelemetryMonitor::new())
            .limits(limits())
            .build();
        mission.abort_handle().request_abort();

        let report = mission.run(&corner_path()).await.unwrap();

        assert_eq!(report.final_state, MissionState::Aborted(AbortReason::OperatorAbort));
        assert!(report.dispatched.is_empty());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_segment_fails_before_any_dispatch() {
        let (link, sent) = AbortingLink::new(Command::EmergencyStop);
        let mission = Mission::builder()
            .link(link)
            .monitor(TelemetryMonitor::new())
            .build();

        let points = [Point::from((0.0, 0.0)), Point::from((0.0, 5.0))];
        let result = mission.run(&build_path(&points).unwrap()).await;

        assert!(matches!(
            result,
            Err(MissionError::Translate(TranslateError::Unreachable(_)))
        ));
        assert!(sent.lock().unwrap().is_empty());
    }
}
