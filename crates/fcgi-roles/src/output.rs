//! Buffered STDOUT/STDERR for one request.
//!
//! Roles write into memory; [`RoleOutput::flush`] pushes what is buffered
//! through the connection's transceiver. Flushing may happen any number of
//! times before the final flush, which terminates STDOUT (always) and STDERR
//! (only if anything was written to it). After the final flush further
//! flushes are no-ops.

use fcgi_protocol::RecordType;
use fcgi_transport::{Transceiver, TransportError};

pub struct RoleOutput<'a> {
    transceiver: &'a mut Transceiver,
    request_id: u16,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    stderr_used: bool,
    bytes_sent: usize,
    finished: bool,
}

impl<'a> RoleOutput<'a> {
    pub fn new(transceiver: &'a mut Transceiver, request_id: u16) -> Self {
        Self {
            transceiver,
            request_id,
            stdout: Vec::new(),
            stderr: Vec::new(),
            stderr_used: false,
            bytes_sent: 0,
            finished: false,
        }
    }

    pub fn write_stdout(&mut self, data: &[u8]) {
        self.stdout.extend_from_slice(data);
    }

    pub fn write_stderr(&mut self, data: &[u8]) {
        self.stderr_used |= !data.is_empty();
        self.stderr.extend_from_slice(data);
    }

    /// Append a string to STDOUT.
    pub fn print(&mut self, text: &str) {
        self.write_stdout(text.as_bytes());
    }

    /// Bytes waiting for the next flush.
    pub fn buffered_len(&self) -> usize {
        self.stdout.len() + self.stderr.len()
    }

    /// Stream bytes already written to the connection.
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub async fn flush(&mut self, is_final: bool) -> Result<(), TransportError> {
        if self.finished {
            return Ok(());
        }

        if !self.stdout.is_empty() {
            self.transceiver
                .send_stream(RecordType::Stdout, self.request_id, &self.stdout)
                .await?;
            self.bytes_sent += self.stdout.len();
            self.stdout.clear();
        }
        if !self.stderr.is_empty() {
            self.transceiver
                .send_stream(RecordType::Stderr, self.request_id, &self.stderr)
                .await?;
            self.bytes_sent += self.stderr.len();
            self.stderr.clear();
        }

        if is_final {
            self.transceiver
                .end_stream(RecordType::Stdout, self.request_id)
                .await?;
            if self.stderr_used {
                self.transceiver
                    .end_stream(RecordType::Stderr, self.request_id)
                    .await?;
            }
            self.finished = true;
        }
        Ok(())
    }
}
