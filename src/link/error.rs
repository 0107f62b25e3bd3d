//! Error types for setting up a vehicle link.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("failed to bind local socket {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to associate with vehicle at {addr}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Retrying before the vehicle can possibly have finished a command only floods the link.
    #[error(
        "ack_timeout ({ack_timeout:?}) is below the vehicle's minimum command time ({min_command_time:?})"
    )]
    AckTimeoutTooShort {
        ack_timeout: Duration,
        min_command_time: Duration,
    },
}
