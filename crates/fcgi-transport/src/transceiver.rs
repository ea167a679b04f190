//! Record-level framing over one connection.
//!
//! A [`Transceiver`] owns the connection's byte stream. Incoming bytes are
//! buffered until a whole record is available, so short reads and records
//! spanning several reads are invisible to callers. Every outgoing record
//! (or batch of stream records) is encoded into one buffer and written with
//! a single `write_all`.

use std::time::Duration;

use bytes::BytesMut;
use fcgi_protocol::record::MAX_CONTENT_LEN;
use fcgi_protocol::{EndRequestBody, ProtocolStatus, Record, RecordType};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::TransportError;

/// Any bidirectional byte stream a connection can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

const READ_BUFFER_CAPACITY: usize = 8 * 1024;

pub struct Transceiver {
    stream: Box<dyn AsyncStream>,
    read_buf: BytesMut,
    io_timeout: Duration,
    peer: String,
    closed: bool,
    /// Streams with data sent and no terminator yet.
    open_streams: Vec<(RecordType, u16)>,
}

impl Transceiver {
    pub fn new<S: AsyncStream + 'static>(stream: S, io_timeout: Duration) -> Self {
        Self {
            stream: Box::new(stream),
            read_buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            io_timeout,
            peer: String::from("unknown"),
            closed: false,
            open_streams: Vec::new(),
        }
    }

    /// Label used in log lines for this connection.
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Whether this side has closed the connection (or seen the peer close it).
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Block until one full record has been read.
    ///
    /// # Errors
    /// - [`TransportError::Closed`] if the peer closed the connection
    /// - [`TransportError::Protocol`] for a malformed header
    /// - [`TransportError::Io`] / [`TransportError::Timeout`] for socket failures
    pub async fn receive(&mut self) -> Result<Record, TransportError> {
        if self.closed {
            return Err(TransportError::Closed { mid_frame: false });
        }

        loop {
            if let Some(record) = Record::decode(&mut self.read_buf)? {
                trace!(
                    "{} <- {:?} id={} len={}",
                    self.peer,
                    record.record_type,
                    record.request_id,
                    record.content.len()
                );
                return Ok(record);
            }

            let limit = self.io_timeout;
            let read = timeout(limit, self.stream.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| TransportError::Timeout(limit))??;

            if read == 0 {
                self.closed = true;
                let mid_frame = !self.read_buf.is_empty();
                debug!("Peer {} closed the connection (mid-frame: {mid_frame})", self.peer);
                return Err(TransportError::Closed { mid_frame });
            }
        }
    }

    /// Send one record with minimal padding.
    ///
    /// # Errors
    /// Payloads longer than 65535 bytes are rejected with a protocol error;
    /// use [`Transceiver::send_stream`] for arbitrary-length stream data.
    pub async fn send(
        &mut self,
        record_type: RecordType,
        request_id: u16,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let record = Record::new(record_type, request_id, payload.to_vec())?;
        self.send_record(&record).await
    }

    pub async fn send_record(&mut self, record: &Record) -> Result<(), TransportError> {
        trace!(
            "{} -> {:?} id={} len={}",
            self.peer,
            record.record_type,
            record.request_id,
            record.content.len()
        );
        self.write_frame(&record.to_bytes()).await
    }

    /// Send `data` as stream records of at most 65535 bytes each.
    ///
    /// Does not terminate the stream; empty `data` sends nothing.
    pub async fn send_stream(
        &mut self,
        record_type: RecordType,
        request_id: u16,
        data: &[u8],
    ) -> Result<(), TransportError> {
        if data.is_empty() {
            return Ok(());
        }

        let mut frames = BytesMut::new();
        for chunk in data.chunks(MAX_CONTENT_LEN) {
            Record::new(record_type, request_id, chunk.to_vec())?.encode(&mut frames);
        }
        trace!(
            "{} -> {:?} id={} len={} (stream)",
            self.peer,
            record_type,
            request_id,
            data.len()
        );
        self.write_frame(&frames).await?;
        if !self.open_streams.contains(&(record_type, request_id)) {
            self.open_streams.push((record_type, request_id));
        }
        Ok(())
    }

    /// Send the zero-length record that ends a stream.
    pub async fn end_stream(
        &mut self,
        record_type: RecordType,
        request_id: u16,
    ) -> Result<(), TransportError> {
        self.send_record(&Record::end_of_stream(record_type, request_id))
            .await?;
        self.open_streams
            .retain(|open| *open != (record_type, request_id));
        Ok(())
    }

    /// Terminate every stream of `request_id` that has data sent but no
    /// terminator, in the order the streams were started.
    pub async fn end_open_streams(&mut self, request_id: u16) -> Result<(), TransportError> {
        let pending: Vec<RecordType> = self
            .open_streams
            .iter()
            .filter(|(_, id)| *id == request_id)
            .map(|(record_type, _)| *record_type)
            .collect();
        for record_type in pending {
            self.end_stream(record_type, request_id).await?;
        }
        Ok(())
    }

    /// Send END_REQUEST and close the connection unless it is to be kept.
    pub async fn send_end_request(
        &mut self,
        request_id: u16,
        status: ProtocolStatus,
        app_status: i32,
        keep_connection: bool,
    ) -> Result<(), TransportError> {
        let body = EndRequestBody::new(status, app_status);
        self.send(RecordType::EndRequest, request_id, &body.to_bytes())
            .await?;
        debug!(
            "{} END_REQUEST id={request_id} status={status:?} app={app_status}",
            self.peer
        );

        if !keep_connection {
            self.close().await;
        }
        Ok(())
    }

    /// Flush and shut down the write side. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let limit = self.io_timeout;
        match timeout(limit, self.stream.shutdown()).await {
            Ok(Ok(())) => debug!("Closed connection to {}", self.peer),
            Ok(Err(e)) => debug!("Error closing connection to {}: {e}", self.peer),
            Err(_) => debug!("Timed out closing connection to {}", self.peer),
        }
    }

    async fn write_frame(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed { mid_frame: false });
        }

        let limit = self.io_timeout;
        let stream = &mut self.stream;
        timeout(limit, async move {
            stream.write_all(bytes).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| TransportError::Timeout(limit))??;
        Ok(())
    }
}

impl std::fmt::Debug for Transceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transceiver")
            .field("peer", &self.peer)
            .field("buffered", &self.read_buf.len())
            .field("closed", &self.closed)
            .field("open_streams", &self.open_streams)
            .finish()
    }
}
