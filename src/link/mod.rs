//! The reliability layer between the mission and a lossy datagram channel.
//!
//! [`LinkTransport`] assigns every outbound command a [`SequenceId`], retransmits it with
//! exponential backoff until a reply arrives or the retry budget runs out, and correlates replies
//! on a background receiver task. Exactly one command is in flight at a time: the vehicle
//! processes commands serially and a reordered reply cannot be told apart from a lost one.

pub mod backoff;
pub mod channel;
pub mod codec;
pub mod error;

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bon::bon;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use self::backoff::Backoff;
use self::channel::DatagramChannel;
use self::codec::{Codec, Encoding, Inbound};
use crate::command::{Command, CommandResult, Reply, SequenceId};
use crate::telemetry::{TelemetryFrame, TelemetryMonitor};

pub use self::error::LinkError;

/// Anything that can carry a command to the vehicle and report how it went.
pub trait Link: Send + Sync {
    /// Dispatch `command` and wait until it is acknowledged, rejected or given up on.
    fn send(&self, command: Command) -> impl Future<Output = CommandResult> + Send;
}

/// Retry and timeout policy of a [`LinkTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    max_retries: u32,
    ack_timeout: Duration,
    backoff_base: Duration,
    backoff_max: Duration,
    telemetry_buffer: usize,
}

#[bon]
impl LinkConfig {
    /// `ack_timeout` must not be shorter than `min_command_time`, the shortest time the vehicle
    /// documents for executing a command.
    #[builder]
    pub fn new(
        #[builder(default = 3)] max_retries: u32,
        #[builder(default = Duration::from_secs(7))] ack_timeout: Duration,
        #[builder(default = Duration::from_millis(300))] backoff_base: Duration,
        #[builder(default = Duration::from_secs(2))] backoff_max: Duration,
        #[builder(default = Duration::from_secs(1))] min_command_time: Duration,
        #[builder(default = 64)] telemetry_buffer: usize,
    ) -> Result<Self, LinkError> {
        if ack_timeout < min_command_time {
            return Err(LinkError::AckTimeoutTooShort {
                ack_timeout,
                min_command_time,
            });
        }

        Ok(Self {
            max_retries,
            ack_timeout,
            backoff_base,
            backoff_max,
            telemetry_buffer: telemetry_buffer.max(1),
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            ack_timeout: Duration::from_secs(7),
            backoff_base: Duration::from_millis(300),
            backoff_max: Duration::from_secs(2),
            telemetry_buffer: 64,
        }
    }
}

/// Untagged replies still expected for commands that have already resolved.
///
/// Each extra transmission of a command may draw its own late answer. Without a sequence tag those
/// answers are indistinguishable from the reply to the next command, so they are discarded until
/// the count is exhausted or the window closes.
#[derive(Debug, Default)]
struct OwedReplies {
    count: u32,
    until: Option<tokio::time::Instant>,
}

/// State shared between senders and the receiver task.
struct Shared<C, K> {
    channel: C,
    codec: K,
    pending: DashMap<SequenceId, oneshot::Sender<Reply>, ahash::RandomState>,
    owed: Mutex<OwedReplies>,
    monitor: TelemetryMonitor,
    inbound: Mutex<VecDeque<TelemetryFrame>>,
    inbound_capacity: usize,
}

impl<C, K> Shared<C, K> {
    fn in_flight(&self) -> Option<SequenceId> {
        self.pending.iter().next().map(|entry| *entry.key())
    }

    /// Buffer a telemetry frame, evicting the oldest one when full.
    fn buffer_frame(&self, frame: TelemetryFrame) {
        let Ok(mut inbound) = self.inbound.lock() else {
            return;
        };
        if inbound.len() >= self.inbound_capacity {
            inbound.pop_front();
            debug!("Telemetry buffer full, oldest frame dropped");
        }
        inbound.push_back(frame);
    }

    fn expect_late_replies(&self, count: u32, window: Duration) {
        if count == 0 {
            return;
        }
        let Ok(mut owed) = self.owed.lock() else {
            return;
        };
        let now = tokio::time::Instant::now();
        if owed.until.is_some_and(|until| now >= until) {
            owed.count = 0;
        }
        owed.count += count;
        owed.until = Some(now + window);
    }

    /// Consume one owed reply, if any is still expected.
    fn take_owed_reply(&self) -> bool {
        let Ok(mut owed) = self.owed.lock() else {
            return false;
        };
        match owed.until {
            Some(until) if owed.count > 0 && tokio::time::Instant::now() < until => {
                owed.count -= 1;
                true
            }
            _ => {
                *owed = OwedReplies::default();
                false
            }
        }
    }

    fn resolve(&self, seq: Option<SequenceId>, reply: Reply) {
        let seq = match seq {
            Some(seq) => seq,
            None if self.take_owed_reply() => {
                debug!(?reply, "Untagged reply to an earlier transmission discarded");
                return;
            }
            // Untagged replies belong to the only request in flight
            None => match self.in_flight() {
                Some(seq) => seq,
                None => {
                    debug!(?reply, "Reply with nothing in flight");
                    return;
                }
            },
        };

        match self.pending.remove(&seq) {
            Some((_, waiter)) => {
                let _ = waiter.send(reply);
            }
            None => debug!(%seq, ?reply, "Late or duplicate reply ignored"),
        }
    }
}

/// Request/response transport over a [`DatagramChannel`], encoded by a [`Codec`].
pub struct LinkTransport<C, K> {
    shared: Arc<Shared<C, K>>,
    config: LinkConfig,
    next_seq: AtomicU32,
    send_lock: tokio::sync::Mutex<()>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl<C, K> std::fmt::Debug for LinkTransport<C, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkTransport")
            .field("config", &self.config)
            .field("next_seq", &self.next_seq)
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

impl<C: DatagramChannel, K: Codec> LinkTransport<C, K> {
    /// Start the receiver task and return the transport. Must be called within a tokio runtime.
    ///
    /// Every recognized inbound datagram refreshes the heartbeat of `monitor`; telemetry
    /// datagrams also update its snapshot.
    pub fn spawn(channel: C, codec: K, config: LinkConfig, monitor: TelemetryMonitor) -> Self {
        let shared = Arc::new(Shared {
            channel,
            codec,
            pending: DashMap::default(),
            owed: Mutex::default(),
            monitor,
            inbound: Mutex::new(VecDeque::with_capacity(config.telemetry_buffer)),
            inbound_capacity: config.telemetry_buffer,
        });

        let receiver = tokio::spawn(receive_loop(Arc::clone(&shared)));

        Self {
            shared,
            config,
            next_seq: AtomicU32::new(1),
            send_lock: tokio::sync::Mutex::new(()),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Dispatch `command`, retransmitting until a reply arrives or retries are exhausted.
    ///
    /// [`Command::Disconnect`] never reaches the wire: it stops the receiver task locally and is
    /// always acknowledged. Commands the codec reports as no-ops are acknowledged without being sent.
    ///
    /// Answers the vehicle may still send to the extra transmissions are accounted for, so an
    /// untagged late reply is never attributed to the following command.
    pub async fn send(&self, command: Command) -> CommandResult {
        if command == Command::Disconnect {
            self.shutdown();
            return CommandResult::Ack;
        }

        let _in_flight = self.send_lock.lock().await;

        let seq = SequenceId(self.next_seq.fetch_add(1, Ordering::Relaxed));
        let payload = match self.shared.codec.encode(seq, &command) {
            Encoding::Datagram(payload) => payload,
            Encoding::NoOp => {
                debug!(%seq, ?command, "Command has no effect, acknowledged locally");
                return CommandResult::Ack;
            }
            Encoding::Unsupported => {
                warn!(%seq, ?command, "Command has no wire encoding");
                return CommandResult::Nack(format!("{command:?} has no wire encoding"));
            }
        };

        let (result, transmissions) = self.transmit(seq, &command, &payload).await;

        // One transmission was answered by the reply, unless the command timed out
        let unanswered = match result {
            CommandResult::Timeout => transmissions,
            _ => transmissions.saturating_sub(1),
        };
        let window = self.config.ack_timeout * (self.config.max_retries + 1);
        self.shared.expect_late_replies(unanswered, window);
        result
    }

    /// Send `payload` until answered. Returns the result and the number of transmissions.
    async fn transmit(
        &self,
        seq: SequenceId,
        command: &Command,
        payload: &[u8],
    ) -> (CommandResult, u32) {
        let (waiter, mut reply) = oneshot::channel();
        self.shared.pending.insert(seq, waiter);
        let mut backoff = Backoff::new(self.config.backoff_base, self.config.backoff_max);
        let mut transmissions = 0;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = backoff.next_delay();
                warn!(%seq, attempt, ?delay, ?command, "No reply, retransmitting");
                tokio::time::sleep(delay).await;

                // A slow reply may have landed during the backoff
                match reply.try_recv() {
                    Ok(reply) => return (reply.into(), transmissions),
                    Err(oneshot::error::TryRecvError::Closed) => break,
                    Err(oneshot::error::TryRecvError::Empty) => {}
                }
            }

            debug!(%seq, attempt, ?command, "Sending command");
            transmissions += 1;
            if let Err(e) = self.shared.channel.send(payload).await {
                warn!(%seq, error = %e, "Datagram send failed");
            }

            match tokio::time::timeout(self.config.ack_timeout, &mut reply).await {
                Ok(Ok(reply)) => {
                    debug!(%seq, ?reply, "Command resolved");
                    return (reply.into(), transmissions);
                }
                // The receiver went away with our waiter; nothing can answer any more
                Ok(Err(_)) => break,
                Err(_) => {}
            }
        }

        self.shared.pending.remove(&seq);
        warn!(%seq, ?command, retries = self.config.max_retries, "Command timed out");
        (CommandResult::Timeout, transmissions)
    }

    /// The oldest buffered telemetry frame, if any. Never blocks.
    ///
    /// The buffer holds the most recent `telemetry_buffer` frames; older ones are evicted first.
    pub fn poll_inbound(&self) -> Option<TelemetryFrame> {
        self.shared.inbound.lock().ok()?.pop_front()
    }

    pub fn monitor(&self) -> &TelemetryMonitor {
        &self.shared.monitor
    }

    fn shutdown(&self) {
        let handle = self.receiver.lock().ok().and_then(|mut receiver| receiver.take());
        if let Some(handle) = handle {
            info!("Link disconnected");
            handle.abort();
        }
        self.shared.pending.clear();
    }
}

impl<C, K> Drop for LinkTransport<C, K> {
    fn drop(&mut self) {
        if let Ok(mut receiver) = self.receiver.lock() {
            if let Some(handle) = receiver.take() {
                handle.abort();
            }
        }
    }
}

impl<C: DatagramChannel, K: Codec> Link for LinkTransport<C, K> {
    fn send(&self, command: Command) -> impl Future<Output = CommandResult> + Send {
        LinkTransport::send(self, command)
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

async fn receive_loop<C: DatagramChannel, K: Codec>(shared: Arc<Shared<C, K>>) {
    loop {
        let datagram = match shared.channel.recv().await {
            Ok(datagram) => datagram,
            Err(e) if is_transient(&e) => {
                debug!(error = %e, "Transient receive error");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Link receiver stopped");
                break;
            }
        };
        let received_at = Instant::now();

        match shared.codec.decode(&datagram) {
            Inbound::Reply { seq, reply } => {
                shared
                    .monitor
                    .observe(&TelemetryFrame::heartbeat(), received_at);
                shared.resolve(seq, reply);
            }
            Inbound::Telemetry(frame) => {
                shared.monitor.observe(&frame, received_at);
                shared.buffer_frame(frame);
            }
            Inbound::Unrecognized => {
                debug!(len = datagram.len(), "Ignoring unrecognized datagram");
            }
        }
    }
}
