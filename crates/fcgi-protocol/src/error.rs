//! Protocol-level errors: malformed frames, malformed bodies, and
//! out-of-order records.

use crate::context::RequestState;
use crate::record::RecordType;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("content length {0} exceeds the record limit")]
    ContentTooLong(usize),

    #[error("{record_type:?} body must be {expected} bytes, got {actual}")]
    InvalidBodyLength {
        record_type: RecordType,
        expected: usize,
        actual: usize,
    },

    #[error("unknown protocol status {0}")]
    UnknownStatus(u8),

    #[error("name/value stream ended inside a pair ({0} bytes left over)")]
    TruncatedNameValue(usize),

    #[error("unexpected {record_type:?} record while {state:?}")]
    UnexpectedRecord {
        record_type: RecordType,
        state: RequestState,
    },

    #[error("invalid request state transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: RequestState,
        to: RequestState,
    },
}

impl ProtocolError {
    /// Whether the byte stream is still correctly framed after this error.
    ///
    /// A bad header or oversized frame leaves the reader at an unknown
    /// offset, so nothing more can be read from that connection.
    pub fn preserves_framing(&self) -> bool {
        !matches!(self, Self::UnsupportedVersion(_) | Self::ContentTooLong(_))
    }
}
