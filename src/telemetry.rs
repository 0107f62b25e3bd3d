//! Last-known vehicle health, recorded from inbound datagrams.
//!
//! The monitor only records. Thresholds and abort decisions belong to the
//! [mission state machine](crate::state_machine::mission).

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

/// Fields carried by one inbound telemetry datagram. Partial frames are common, so every field is
/// optional.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryFrame {
    pub battery_pct: Option<u8>,
    /// Height above takeoff point, in vehicle units.
    pub height: Option<f64>,
}

impl TelemetryFrame {
    /// A frame carrying no fields; observing it only refreshes the heartbeat.
    pub fn heartbeat() -> Self {
        Self::default()
    }
}

/// Most recently observed vehicle health.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetrySnapshot {
    pub battery_pct: Option<u8>,
    pub height: Option<f64>,
    pub last_heartbeat: Option<Instant>,
}

/// Shared handle to the telemetry snapshot of the active mission.
///
/// Clones share the same snapshot. The link's receiver task is the single writer; any number of
/// readers copy the snapshot out without holding it.
#[derive(Debug, Clone)]
pub struct TelemetryMonitor {
    snapshot: Arc<watch::Sender<TelemetrySnapshot>>,
}

impl TelemetryMonitor {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(TelemetrySnapshot::default());
        Self {
            snapshot: Arc::new(snapshot),
        }
    }

    /// Record a frame received at `at`. Fields absent from the frame keep their previous value.
    pub fn observe(&self, frame: &TelemetryFrame, at: Instant) {
        self.snapshot.send_modify(|snapshot| {
            if let Some(battery_pct) = frame.battery_pct {
                snapshot.battery_pct = Some(battery_pct);
            }
            if let Some(height) = frame.height {
                snapshot.height = Some(height);
            }
            snapshot.last_heartbeat = Some(at);
        });
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        *self.snapshot.borrow()
    }

    /// Forget everything observed so far.
    pub fn reset(&self) {
        self.snapshot.send_replace(TelemetrySnapshot::default());
    }

    /// Receive every snapshot change, e.g. for an operator display.
    pub fn subscribe(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.snapshot.subscribe()
    }
}

impl Default for TelemetryMonitor {
    fn default() -> Self {
        Self::new()
    }
}
