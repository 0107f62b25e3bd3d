use anyhow::{Context, Result, bail};
use clap::Parser;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};
use waypoint_mission::config::Settings;
use waypoint_mission::link::LinkTransport;
use waypoint_mission::link::channel::UdpChannel;
use waypoint_mission::link::codec::TextCodec;
use waypoint_mission::telemetry::TelemetryMonitor;
use waypoint_mission::{Mission, MissionOutcome, Point, TranslateOptions, build_path};

/// Fly a waypoint route with a UDP-commanded quadcopter.
///
/// Link, safety and translation tuning is read from `MISSION_*` environment variables.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON file holding a list of `{"x": .., "y": ..}` waypoints
    waypoints: PathBuf,

    /// Fold segments shorter than the minimum move into their successors
    #[arg(long)]
    merge_short: bool,

    /// Vehicle command address
    #[arg(long, env = "VEHICLE_ADDR", default_value = "192.168.10.1:8889")]
    vehicle: SocketAddr,

    /// Local address to send commands from
    #[arg(long, env = "LOCAL_ADDR", default_value = "0.0.0.0:8889")]
    local: SocketAddr,

    /// Local address for vehicle state datagrams, or `none`
    #[arg(long, env = "STATE_ADDR", default_value = "0.0.0.0:8890")]
    state: StateAddr,

    /// Factor applied to every waypoint coordinate
    #[arg(long, env = "MISSION_SCALE", default_value_t = 1.0)]
    scale: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct StateAddr(Option<SocketAddr>);

impl FromStr for StateAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "none" => Ok(Self(None)),
            addr => addr.parse().map(|addr| Self(Some(addr))),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let settings = Settings::from_env().context("invalid mission settings")?;
    let waypoints_file = args.waypoints.display();

    let raw = std::fs::read_to_string(&args.waypoints)
        .with_context(|| format!("failed to read {waypoints_file}"))?;
    let points: Vec<Point> = serde_json::from_str::<Vec<Point>>(&raw)
        .with_context(|| format!("{waypoints_file} is not a list of points"))?
        .into_iter()
        .map(|point| Point::new(point.x * args.scale, point.y * args.scale))
        .collect();

    let mut path = build_path(&points)?;
    if args.merge_short {
        path = path.merge_short_segments(settings.limits.min_move())?;
    }
    info!(
        waypoints = path.waypoints().len(),
        distance = path.total_distance(),
        vehicle = %args.vehicle,
        "Loaded path"
    );

    let channel = UdpChannel::connect(args.local, args.vehicle, args.state.0).await?;
    let codec = if settings.tag_sequence {
        TextCodec::tagged()
    } else {
        TextCodec::new()
    };
    let monitor = TelemetryMonitor::new();
    let link = LinkTransport::spawn(channel, codec, settings.link, monitor.clone());

    let mut updates = WatchStream::new(monitor.subscribe());
    let telemetry_log = tokio::spawn(async move {
        while let Some(snapshot) = updates.next().await {
            debug!(
                battery = ?snapshot.battery_pct,
                height = ?snapshot.height,
                "Telemetry"
            );
        }
    });

    let mission = Mission::builder()
        .link(link)
        .monitor(monitor)
        .config(settings.mission)
        .limits(settings.limits)
        // The text protocol carries whole units only
        .options(TranslateOptions {
            integer_units: true,
            ..settings.translate
        })
        .build();

    let abort = mission.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, aborting mission");
            abort.request_abort();
        }
    });

    let report = mission.run(&path).await?;
    telemetry_log.abort();

    println!("Mission {}: {:?}", report.mission_id, report.final_state);
    for (index, command) in report.dispatched.iter().enumerate() {
        println!("  {:>3}. {command:?}", index + 1);
    }

    match report.outcome {
        MissionOutcome::Succeeded => Ok(()),
        MissionOutcome::Aborted(reason) => bail!("mission aborted: {reason}"),
    }
}
