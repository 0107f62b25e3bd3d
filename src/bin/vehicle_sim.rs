use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::interval;
use tracing::{debug, info, warn};
use waypoint_mission::command::{Command, MoveDirection, Reply, RotateDirection, SequenceId};
use waypoint_mission::link::codec::TextCodec;
use waypoint_mission::telemetry::TelemetryFrame;

const TAKEOFF_HEIGHT: f64 = 80.0;
const MOVE_RANGE: std::ops::RangeInclusive<f64> = 20.0..=500.0;
const ROTATION_RANGE: std::ops::RangeInclusive<f64> = 1.0..=360.0;
const MIN_TAKEOFF_BATTERY: u8 = 10;

/// Kinematic model of a quadcopter in SDK mode.
#[derive(Debug)]
struct SimVehicle {
    sdk_mode: bool,
    airborne: bool,
    battery_pct: u8,
    heading: f64,
    x: f64,
    y: f64,
    height: f64,
}

impl SimVehicle {
    fn new(battery_pct: u8) -> Self {
        Self {
            sdk_mode: false,
            airborne: false,
            battery_pct,
            heading: 0.0,
            x: 0.0,
            y: 0.0,
            height: 0.0,
        }
    }

    fn execute(&mut self, command: &Command) -> Reply {
        if !self.sdk_mode && *command != Command::Connect {
            return Reply::Nack("error not in SDK mode".into());
        }

        match command {
            Command::Connect => self.sdk_mode = true,
            Command::Takeoff => {
                if self.battery_pct < MIN_TAKEOFF_BATTERY {
                    return Reply::Nack("error battery low".into());
                }
                self.airborne = true;
                self.height = TAKEOFF_HEIGHT;
            }
            Command::Land | Command::EmergencyStop => {
                self.airborne = false;
                self.height = 0.0;
            }
            Command::Move {
                direction,
                distance,
            } => {
                if !self.airborne {
                    return Reply::Nack("error not flying".into());
                }
                if !MOVE_RANGE.contains(distance) {
                    return Reply::Nack("error out of range".into());
                }
                self.travel(*direction, *distance);
            }
            Command::Rotate { direction, degrees } => {
                if !self.airborne {
                    return Reply::Nack("error not flying".into());
                }
                if !ROTATION_RANGE.contains(degrees) {
                    return Reply::Nack("error out of range".into());
                }
                let signed = match direction {
                    RotateDirection::Clockwise => *degrees,
                    RotateDirection::CounterClockwise => -degrees,
                };
                self.heading = (self.heading + signed).rem_euclid(360.0);
            }
            Command::Disconnect => {}
        }
        Reply::Ack
    }

    fn travel(&mut self, direction: MoveDirection, distance: f64) {
        let offset = match direction {
            MoveDirection::Forward => 0.0,
            MoveDirection::Right => 90.0,
            MoveDirection::Back => 180.0,
            MoveDirection::Left => 270.0,
            MoveDirection::Up => {
                self.height += distance;
                return;
            }
            MoveDirection::Down => {
                self.height = (self.height - distance).max(0.0);
                return;
            }
        };
        let bearing = (self.heading + offset).to_radians();
        self.x += distance * bearing.sin();
        self.y += distance * bearing.cos();
    }

    fn tick(&mut self) {
        if self.airborne {
            self.battery_pct = self.battery_pct.saturating_sub(1);
        }
    }

    fn state(&self) -> TelemetryFrame {
        TelemetryFrame {
            battery_pct: Some(self.battery_pct),
            height: Some(self.height),
        }
    }
}

/// Simulated quadcopter answering the plain-text SDK over UDP.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to receive commands on
    #[arg(long, env = "SIM_ADDR", default_value = "127.0.0.1:18889")]
    addr: SocketAddr,

    /// Probability of dropping any datagram, in either direction
    #[arg(long, env = "SIM_LOSS", default_value_t = 0.1, value_parser = probability)]
    loss: f64,

    /// Battery percentage at start
    #[arg(long, env = "SIM_BATTERY", default_value_t = 100)]
    battery: u8,

    /// Where to send state datagrams; defaults to the last controller seen
    #[arg(long, env = "STATE_TARGET")]
    state_target: Option<SocketAddr>,

    /// Seed for reproducible loss patterns
    #[arg(long, env = "SIM_SEED")]
    seed: Option<u64>,
}

fn probability(value: &str) -> Result<f64, String> {
    let loss: f64 = value.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&loss) {
        Ok(loss)
    } else {
        Err(format!("{loss} is not a probability"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let Args {
        addr,
        loss,
        battery,
        state_target,
        seed,
    } = Args::parse();

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let socket = UdpSocket::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, loss, battery, "Simulated vehicle listening");

    let codec = TextCodec::new();
    let mut vehicle = SimVehicle::new(battery);
    let mut controller: Option<SocketAddr> = None;
    let mut last: Option<(SequenceId, Reply)> = None;
    let mut ticker = interval(Duration::from_secs(1));
    let mut buf = [0u8; 2048];

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                vehicle.tick();
                let Some(target) = state_target.or(controller) else {
                    continue;
                };
                if rng.random_bool(loss) {
                    continue;
                }
                if let Err(e) = socket.send_to(&TextCodec::encode_state(&vehicle.state()), target).await {
                    warn!(error = %e, %target, "Failed to send state");
                }
            }

            received = socket.recv_from(&mut buf) => {
                let (len, peer) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(error = %e, "Receive failed");
                        continue;
                    }
                };
                if rng.random_bool(loss) {
                    debug!(%peer, "Dropped inbound datagram");
                    continue;
                }
                controller = Some(peer);

                let Some((seq, command)) = codec.decode_command(&buf[..len]) else {
                    warn!(datagram = %String::from_utf8_lossy(&buf[..len]), "Unknown command");
                    let reply = TextCodec::encode_reply(None, &Reply::Nack("error unknown command".into()));
                    let _ = socket.send_to(&reply, peer).await;
                    continue;
                };

                // A retransmission of the last command is answered again, not executed again
                let reply = match (&last, seq) {
                    (Some((last_seq, reply)), Some(seq)) if *last_seq == seq => {
                        debug!(%seq, "Duplicate command");
                        reply.clone()
                    }
                    _ => {
                        let reply = vehicle.execute(&command);
                        info!(
                            ?command,
                            ?reply,
                            x = vehicle.x,
                            y = vehicle.y,
                            height = vehicle.height,
                            heading = vehicle.heading,
                            "Executed"
                        );
                        if let Some(seq) = seq {
                            last = Some((seq, reply.clone()));
                        }
                        reply
                    }
                };

                if rng.random_bool(loss) {
                    debug!(%peer, "Dropped reply");
                    continue;
                }
                if let Err(e) = socket.send_to(&TextCodec::encode_reply(seq, &reply), peer).await {
                    warn!(error = %e, %peer, "Failed to send reply");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn flying() -> SimVehicle {
        let mut vehicle = SimVehicle::new(100);
        assert_eq!(vehicle.execute(&Command::Connect), Reply::Ack);
        assert_eq!(vehicle.execute(&Command::Takeoff), Reply::Ack);
        vehicle
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_loss_must_be_a_probability() {
        assert_eq!(probability("0.25"), Ok(0.25));
        assert!(probability("1.5").is_err());
        assert!(probability("often").is_err());
    }

    #[test]
    fn test_rotation_outside_sdk_range_rejected() {
        let mut vehicle = flying();

        for degrees in [0.0, 361.0] {
            assert_eq!(
                vehicle.execute(&Command::clockwise(degrees)),
                Reply::Nack("error out of range".into())
            );
        }
        assert_eq!(vehicle.heading, 0.0);

        assert_eq!(vehicle.execute(&Command::counter_clockwise(90.0)), Reply::Ack);
        assert_eq!(vehicle.heading, 270.0);
    }

    #[test]
    fn test_move_tracks_position() {
        let mut vehicle = flying();

        assert_eq!(vehicle.execute(&Command::clockwise(90.0)), Reply::Ack);
        assert_eq!(vehicle.execute(&Command::forward(50.0)), Reply::Ack);
        assert!((vehicle.x - 50.0).abs() < 1e-9);
        assert!(vehicle.y.abs() < 1e-9);

        assert_eq!(
            vehicle.execute(&Command::forward(10.0)),
            Reply::Nack("error out of range".into())
        );
    }
}
