//! Request context: the logical request assembled from one connection's records.
//!
//! One [`RequestContext`] exists per BEGIN_REQUEST. It is owned by the task
//! serving the connection and is never shared. The state tag only moves
//! forward; see [`RequestState::can_advance_to`].

use std::collections::HashMap;

use crate::body::{BeginRequestBody, RoleKind};
use crate::error::ProtocolError;

/// Stage of the request state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    AwaitingBegin,
    StreamingParams,
    StreamingBody,
    Complete,
    Aborted,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }

    /// Legal transitions: one stage forward, or into `Aborted` from any
    /// non-terminal stage.
    pub fn can_advance_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::AwaitingBegin, Self::StreamingParams)
            | (Self::StreamingParams, Self::StreamingBody)
            | (Self::StreamingBody, Self::Complete) => true,
            (from, Self::Aborted) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Context for a single logical request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request id from the BEGIN_REQUEST header (0 until it arrives).
    pub request_id: u16,
    /// Raw role id; may name a role nobody registered.
    pub role: u16,
    /// Whether the peer asked to keep the connection after END_REQUEST.
    pub keep_connection: bool,
    /// CGI-style environment from the PARAMS stream.
    pub params: HashMap<String, String>,
    /// Raw STDIN body.
    pub stdin: Vec<u8>,
    state: RequestState,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: 0,
            role: 0,
            keep_connection: false,
            params: HashMap::new(),
            stdin: Vec::new(),
            state: RequestState::AwaitingBegin,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Move to `next`, refusing any backwards or skipping transition.
    pub fn advance(&mut self, next: RequestState) -> Result<(), ProtocolError> {
        if !self.state.can_advance_to(next) {
            return Err(ProtocolError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Record the BEGIN_REQUEST fields and enter `StreamingParams`.
    pub fn begin(&mut self, request_id: u16, body: BeginRequestBody) -> Result<(), ProtocolError> {
        self.advance(RequestState::StreamingParams)?;
        self.request_id = request_id;
        self.role = body.role;
        self.keep_connection = body.keep_connection();
        Ok(())
    }

    pub fn role_kind(&self) -> Option<RoleKind> {
        RoleKind::from_id(self.role)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &[u8] {
        &self.stdin
    }

    pub fn is_complete(&self) -> bool {
        self.state == RequestState::Complete
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
