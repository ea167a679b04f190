//! FastCGI Server: request assembly and role dispatch.
//!
//! [`FcgiServer`] implements the transport layer's `ConnectionHandler`: for
//! every connection it runs the [`Request`] state machine, resolves the
//! requested role in the [`RoleRegistry`], and guarantees a well-formed
//! END_REQUEST (or a clean close) for every request it accepted.

pub mod config;
pub mod registry;
pub mod request;
pub mod router;

pub use config::{RequestLimits, ServerInfo};
pub use registry::{RoleRegistry, RoleSlot};
pub use request::{AbortReason, Request, RunOutcome};
pub use router::FcgiServer;
