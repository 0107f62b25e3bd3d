//! Raw datagram channels to a vehicle. No ordering, delivery or integrity guarantees.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};
use tracing::info;

use super::error::LinkError;

const MAX_DATAGRAM: usize = 2048;

/// A duplex, lossy datagram primitive.
pub trait DatagramChannel: Send + Sync + 'static {
    fn send(&self, payload: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Wait for the next inbound datagram.
    fn recv(&self) -> impl Future<Output = io::Result<Bytes>> + Send;
}

/// UDP channel to a vehicle.
///
/// Commands and replies travel over a socket associated with the vehicle's command address.
/// Vehicles that push state from a different source port are heard on an optional second socket.
#[derive(Debug)]
pub struct UdpChannel {
    command: UdpSocket,
    state: Option<UdpSocket>,
}

impl UdpChannel {
    pub async fn connect(
        local: SocketAddr,
        vehicle: SocketAddr,
        state: Option<SocketAddr>,
    ) -> Result<Self, LinkError> {
        let command = UdpSocket::bind(local)
            .await
            .map_err(|source| LinkError::Bind {
                addr: local,
                source,
            })?;
        command
            .connect(vehicle)
            .await
            .map_err(|source| LinkError::Connect {
                addr: vehicle,
                source,
            })?;

        let state = match state {
            Some(addr) => Some(
                UdpSocket::bind(addr)
                    .await
                    .map_err(|source| LinkError::Bind { addr, source })?,
            ),
            None => None,
        };

        info!(%local, %vehicle, state = ?state.as_ref().map(|s| s.local_addr().ok()), "UDP link ready");

        Ok(Self { command, state })
    }
}

impl DatagramChannel for UdpChannel {
    async fn send(&self, payload: &[u8]) -> io::Result<()> {
        self.command.send(payload).await.map(|_| ())
    }

    async fn recv(&self) -> io::Result<Bytes> {
        let mut command_buf = [0u8; MAX_DATAGRAM];

        let Some(state) = &self.state else {
            let len = self.command.recv(&mut command_buf).await?;
            return Ok(Bytes::copy_from_slice(&command_buf[..len]));
        };

        let mut state_buf = [0u8; MAX_DATAGRAM];
        tokio::select! {
            received = self.command.recv(&mut command_buf) => {
                let len = received?;
                Ok(Bytes::copy_from_slice(&command_buf[..len]))
            }
            received = state.recv_from(&mut state_buf) => {
                let (len, _) = received?;
                Ok(Bytes::copy_from_slice(&state_buf[..len]))
            }
        }
    }
}

/// One end of an in-process datagram pipe, for simulated vehicles.
#[derive(Debug)]
pub struct MemoryChannel {
    outbound: mpsc::UnboundedSender<Bytes>,
    inbound: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl MemoryChannel {
    /// Create two connected ends: whatever one sends, the other receives.
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        (
            MemoryChannel {
                outbound: a_tx,
                inbound: Mutex::new(b_rx),
            },
            MemoryChannel {
                outbound: b_tx,
                inbound: Mutex::new(a_rx),
            },
        )
    }
}

impl DatagramChannel for MemoryChannel {
    async fn send(&self, payload: &[u8]) -> io::Result<()> {
        self.outbound
            .send(Bytes::copy_from_slice(payload))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))
    }

    async fn recv(&self) -> io::Result<Bytes> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_is_duplex() {
        let (a, b) = MemoryChannel::pair();

        a.send(b"command").await.unwrap();
        b.send(b"ok").await.unwrap();

        assert_eq!(b.recv().await.unwrap(), "command");
        assert_eq!(a.recv().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_memory_recv_fails_when_peer_dropped() {
        let (a, b) = MemoryChannel::pair();
        drop(b);

        let err = a.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(a.send(b"land").await.is_err());
    }

    #[tokio::test]
    async fn test_udp_round_trip() {
        let vehicle = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let vehicle_addr = vehicle.local_addr().unwrap();

        let channel = UdpChannel::connect("127.0.0.1:0".parse().unwrap(), vehicle_addr, None)
            .await
            .unwrap();
        channel.send(b"takeoff").await.unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = vehicle.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"takeoff");

        vehicle.send_to(b"ok", from).await.unwrap();
        assert_eq!(channel.recv().await.unwrap(), "ok");
    }
}
