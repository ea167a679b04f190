//! Transport and service errors.

use std::net::SocketAddr;
use std::time::Duration;

use fcgi_protocol::ProtocolError;

/// Failure while moving records over one connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer closed the connection. `mid_frame` is set when a partial
    /// record was buffered at the time.
    #[error("connection closed by peer (mid-frame: {mid_frame})")]
    Closed { mid_frame: bool },

    #[error("connection I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection idle for longer than {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

/// Failure to start the service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service is already running")]
    AlreadyRunning,

    #[error("invalid listen address {address:?}: {source}")]
    InvalidAddress {
        address: String,
        source: std::net::AddrParseError,
    },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },
}
