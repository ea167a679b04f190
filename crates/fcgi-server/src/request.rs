//! Request: assembles one logical request from the records on a connection.
//!
//! ```text
//! AwaitingBegin ─BEGIN─▶ StreamingParams ─PARAMS{}─▶ StreamingBody ─STDIN{}─▶ Complete
//!       │                      │                          │
//!       └──────────────────────┴──────────────────────────┴──▶ Aborted
//! ```
//!
//! Management records (request id 0) are answered in any state without
//! touching the request. A BEGIN for another id while this request is open
//! is refused with CANT_MPX_CONN; other records for foreign ids are ignored.
//! Leftover records of the request that ended just before this one on the
//! same connection are ignored while awaiting BEGIN.

use fcgi_protocol::params::{decode_pairs, encode_pairs};
use fcgi_protocol::{
    BeginRequestBody, EndRequestBody, NameValueDecoder, ProtocolError, ProtocolStatus, Record,
    RecordType, RequestContext, RequestState, UnknownTypeBody,
};
use fcgi_transport::{Transceiver, TransportError};
use tracing::debug;

use crate::config::{RequestLimits, ServerInfo};

/// Why a request was abandoned before completion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbortReason {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("peer sent ABORT_REQUEST")]
    AbortRequested,

    #[error("{stream:?} stream exceeds {limit} bytes")]
    LimitExceeded { stream: RecordType, limit: usize },
}

impl AbortReason {
    /// Whether further records can still be read from the connection.
    pub fn preserves_framing(&self) -> bool {
        match self {
            Self::Protocol(e) => e.preserves_framing(),
            _ => true,
        }
    }
}

/// Result of [`Request::run`] when the connection itself survived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Complete,
    Aborted(AbortReason),
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

enum Step {
    Continue,
    Reply(Record),
    Complete,
}

pub struct Request {
    context: RequestContext,
    limits: RequestLimits,
    info: ServerInfo,
    decoder: NameValueDecoder,
    params_bytes: usize,
    reply_id: Option<u16>,
    previous_id: Option<u16>,
}

impl Request {
    pub fn new(limits: RequestLimits, info: ServerInfo) -> Self {
        Self {
            context: RequestContext::new(),
            limits,
            info,
            decoder: NameValueDecoder::new(),
            params_bytes: 0,
            reply_id: None,
            previous_id: None,
        }
    }

    /// Id of the request that last ended on this connection. Its remaining
    /// stream records are dropped instead of aborting this request.
    pub fn following(mut self, previous_id: Option<u16>) -> Self {
        self.previous_id = previous_id;
        self
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn into_context(self) -> RequestContext {
        self.context
    }

    pub fn state(&self) -> RequestState {
        self.context.state()
    }

    /// Id an END_REQUEST should be addressed to: the open request, or the
    /// offending record if the request never began. `None` if no record
    /// was ever decoded.
    pub fn reply_id(&self) -> Option<u16> {
        self.reply_id
    }

    /// Drive the state machine until the request completes or aborts.
    ///
    /// # Errors
    /// Connection failures, including the peer closing, are returned as
    /// errors and leave the request unfinished. Malformed records are not
    /// errors; they produce [`RunOutcome::Aborted`].
    pub async fn run(&mut self, tx: &mut Transceiver) -> Result<RunOutcome, TransportError> {
        loop {
            let record = match tx.receive().await {
                Ok(record) => record,
                Err(TransportError::Protocol(e)) => return Ok(self.abort(e.into())),
                Err(e) => return Err(e),
            };

            match self.process(record) {
                Ok(Step::Continue) => {}
                Ok(Step::Reply(reply)) => tx.send_record(&reply).await?,
                Ok(Step::Complete) => return Ok(RunOutcome::Complete),
                Err(reason) => return Ok(self.abort(reason)),
            }
        }
    }

    fn abort(&mut self, reason: AbortReason) -> RunOutcome {
        if !self.context.state().is_terminal() {
            // Always legal from a non-terminal state
            let _ = self.context.advance(RequestState::Aborted);
        }
        RunOutcome::Aborted(reason)
    }

    fn process(&mut self, record: Record) -> Result<Step, AbortReason> {
        if record.is_management() {
            return Ok(Step::Reply(self.management_reply(&record)?));
        }

        let state = self.context.state();
        if state == RequestState::AwaitingBegin {
            if record.record_type != RecordType::BeginRequest
                && self.previous_id == Some(record.request_id)
            {
                debug!(
                    "Ignoring trailing {:?} for ended request {}",
                    record.record_type, record.request_id
                );
                return Ok(Step::Continue);
            }
            self.reply_id = Some(record.request_id);
            if record.record_type != RecordType::BeginRequest {
                return Err(unexpected(&record, state));
            }
            let body = BeginRequestBody::parse(&record.content)?;
            self.context.begin(record.request_id, body)?;
            debug!("BEGIN id={} role={}", record.request_id, body.role);
            return Ok(Step::Continue);
        }

        if record.request_id != self.context.request_id {
            if record.record_type == RecordType::BeginRequest {
                debug!(
                    "Refusing BEGIN id={} while id={} is open",
                    record.request_id, self.context.request_id
                );
                let body = EndRequestBody::new(ProtocolStatus::CantMpxConn, 0);
                return Ok(Step::Reply(Record::new(
                    RecordType::EndRequest,
                    record.request_id,
                    body.to_bytes().to_vec(),
                )?));
            }
            debug!(
                "Ignoring {:?} for inactive request {}",
                record.record_type, record.request_id
            );
            return Ok(Step::Continue);
        }

        match (state, record.record_type) {
            (_, RecordType::AbortRequest) => Err(AbortReason::AbortRequested),

            (RequestState::StreamingParams, RecordType::Params) if record.is_empty() => {
                std::mem::take(&mut self.decoder).finish()?;
                self.context.advance(RequestState::StreamingBody)?;
                Ok(Step::Continue)
            }
            (RequestState::StreamingParams, RecordType::Params) => {
                self.params_bytes += record.content.len();
                if self.params_bytes > self.limits.max_params_bytes {
                    return Err(AbortReason::LimitExceeded {
                        stream: RecordType::Params,
                        limit: self.limits.max_params_bytes,
                    });
                }
                self.context.params.extend(self.decoder.feed(&record.content));
                Ok(Step::Continue)
            }

            (RequestState::StreamingBody, RecordType::Stdin) if record.is_empty() => {
                self.context.advance(RequestState::Complete)?;
                Ok(Step::Complete)
            }
            (RequestState::StreamingBody, RecordType::Stdin) => {
                if self.context.stdin.len() + record.content.len() > self.limits.max_body_bytes {
                    return Err(AbortReason::LimitExceeded {
                        stream: RecordType::Stdin,
                        limit: self.limits.max_body_bytes,
                    });
                }
                self.context.stdin.extend_from_slice(&record.content);
                Ok(Step::Continue)
            }

            _ => Err(unexpected(&record, state)),
        }
    }

    fn management_reply(&self, record: &Record) -> Result<Record, ProtocolError> {
        match record.record_type {
            RecordType::GetValues => {
                // A malformed query gets an empty answer
                let names = decode_pairs(&record.content).unwrap_or_default();
                let values: Vec<(String, String)> = names
                    .into_iter()
                    .filter_map(|(name, _)| self.info.lookup(&name).map(|value| (name, value)))
                    .collect();
                let content =
                    encode_pairs(values.iter().map(|(n, v)| (n.as_str(), v.as_str())));
                Record::new(RecordType::GetValuesResult, record.request_id, content.freeze())
            }
            other => {
                debug!("Unknown management record {other:?}");
                let body = UnknownTypeBody {
                    record_type: other.code(),
                };
                Record::new(
                    RecordType::UnknownType,
                    record.request_id,
                    body.to_bytes().to_vec(),
                )
            }
        }
    }
}

fn unexpected(record: &Record, state: RequestState) -> AbortReason {
    AbortReason::Protocol(ProtocolError::UnexpectedRecord {
        record_type: record.record_type,
        state,
    })
}
