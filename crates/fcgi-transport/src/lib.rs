//! FastCGI Transport Layer
//!
//! Moves records on and off the wire and owns the listening socket:
//! - [`Transceiver`]: record-level receive/send over one connection,
//!   absorbing short reads and bounding every operation by a timeout
//! - [`Service`]: binds the listener, runs the accept loop, and hands each
//!   connection to a bounded pool of workers
//! - Connection tracking for health reporting and shutdown logging
//!
//! The transport is decoupled from request handling via the
//! [`ConnectionHandler`] trait.

pub mod connection;
pub mod error;
pub mod server;
pub mod transceiver;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use error::{ServiceError, TransportError};
pub use server::{ConnectionHandler, Service, ServiceConfig};
pub use transceiver::{AsyncStream, Transceiver};
