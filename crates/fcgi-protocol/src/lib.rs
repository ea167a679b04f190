//! FastCGI protocol types.
//!
//! Bit-exact wire representation of FastCGI records, the typed bodies carried
//! by BEGIN_REQUEST / END_REQUEST / UNKNOWN_TYPE records, the name/value pair
//! encoding used by PARAMS and GET_VALUES, and the per-request context the
//! state machine fills in. This crate does no I/O.

pub mod body;
pub mod context;
pub mod error;
pub mod params;
pub mod record;

pub use body::{
    BeginRequestBody, EndRequestBody, FAILURE_EXIT_CODE, FCGI_KEEP_CONN, ProtocolStatus,
    RoleKind, UnknownTypeBody,
};
pub use context::{RequestContext, RequestState};
pub use error::ProtocolError;
pub use params::NameValueDecoder;
pub use record::{Record, RecordHeader, RecordType};
