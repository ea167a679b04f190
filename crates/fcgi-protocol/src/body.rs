//! Typed record bodies.

use crate::error::ProtocolError;
use crate::record::RecordType;

/// BEGIN_REQUEST flag: keep the connection open after END_REQUEST.
pub const FCGI_KEEP_CONN: u8 = 1;

/// Application exit code reported when a request fails before or inside its role.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Roles defined by FastCGI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Responder,
    Authorizer,
    Filter,
}

impl RoleKind {
    pub fn id(&self) -> u16 {
        match self {
            Self::Responder => 1,
            Self::Authorizer => 2,
            Self::Filter => 3,
        }
    }

    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            1 => Some(Self::Responder),
            2 => Some(Self::Authorizer),
            3 => Some(Self::Filter),
            _ => None,
        }
    }
}

/// Body of a BEGIN_REQUEST record: role (u16), flags (u8), 5 reserved bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginRequestBody {
    pub role: u16,
    pub flags: u8,
}

impl BeginRequestBody {
    pub const LEN: usize = 8;

    pub fn new(role: u16, keep_connection: bool) -> Self {
        Self {
            role,
            flags: if keep_connection { FCGI_KEEP_CONN } else { 0 },
        }
    }

    pub fn parse(content: &[u8]) -> Result<Self, ProtocolError> {
        match content {
            [r0, r1, flags, _, _, _, _, _] => Ok(Self {
                role: u16::from_be_bytes([*r0, *r1]),
                flags: *flags,
            }),
            _ => Err(ProtocolError::InvalidBodyLength {
                record_type: RecordType::BeginRequest,
                expected: Self::LEN,
                actual: content.len(),
            }),
        }
    }

    pub fn keep_connection(&self) -> bool {
        self.flags & FCGI_KEEP_CONN != 0
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let role = self.role.to_be_bytes();
        [role[0], role[1], self.flags, 0, 0, 0, 0, 0]
    }
}

/// Protocol-level completion status carried by END_REQUEST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStatus {
    RequestComplete,
    CantMpxConn,
    Overloaded,
    UnknownRole,
}

impl ProtocolStatus {
    pub fn code(&self) -> u8 {
        match self {
            Self::RequestComplete => 0,
            Self::CantMpxConn => 1,
            Self::Overloaded => 2,
            Self::UnknownRole => 3,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        match code {
            0 => Ok(Self::RequestComplete),
            1 => Ok(Self::CantMpxConn),
            2 => Ok(Self::Overloaded),
            3 => Ok(Self::UnknownRole),
            c => Err(ProtocolError::UnknownStatus(c)),
        }
    }
}

/// Body of an END_REQUEST record: appStatus (i32), protocolStatus (u8), 3 reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequestBody {
    pub app_status: i32,
    pub protocol_status: ProtocolStatus,
}

impl EndRequestBody {
    pub const LEN: usize = 8;

    pub fn new(protocol_status: ProtocolStatus, app_status: i32) -> Self {
        Self {
            app_status,
            protocol_status,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let app = self.app_status.to_be_bytes();
        [app[0], app[1], app[2], app[3], self.protocol_status.code(), 0, 0, 0]
    }

    pub fn parse(content: &[u8]) -> Result<Self, ProtocolError> {
        match content {
            [a0, a1, a2, a3, status, _, _, _] => Ok(Self {
                app_status: i32::from_be_bytes([*a0, *a1, *a2, *a3]),
                protocol_status: ProtocolStatus::from_code(*status)?,
            }),
            _ => Err(ProtocolError::InvalidBodyLength {
                record_type: RecordType::EndRequest,
                expected: Self::LEN,
                actual: content.len(),
            }),
        }
    }
}

/// Body of an UNKNOWN_TYPE record: the unrecognised type byte plus 7 reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownTypeBody {
    pub record_type: u8,
}

impl UnknownTypeBody {
    pub const LEN: usize = 8;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        [self.record_type, 0, 0, 0, 0, 0, 0, 0]
    }
}
