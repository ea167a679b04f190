//! Record framing: the 8-byte header, content, and alignment padding.
//!
//! Layout (all multi-byte integers big-endian):
//!
//! ```text
//! version:u8  type:u8  requestId:u16  contentLength:u16  paddingLength:u8  reserved:u8
//! content[contentLength]  padding[paddingLength]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// The only protocol version defined by FastCGI.
pub const VERSION_1: u8 = 1;

/// Size of the fixed record header.
pub const HEADER_LEN: usize = 8;

/// Largest content a single record can carry.
pub const MAX_CONTENT_LEN: usize = u16::MAX as usize;

/// Request id reserved for management records.
pub const MANAGEMENT_REQUEST_ID: u16 = 0;

/// Record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    BeginRequest,
    AbortRequest,
    EndRequest,
    Params,
    Stdin,
    Stdout,
    Stderr,
    Data,
    GetValues,
    GetValuesResult,
    UnknownType,

    /// A type byte this implementation does not know.
    Other(u8),
}

impl RecordType {
    pub fn code(&self) -> u8 {
        match self {
            Self::BeginRequest => 1,
            Self::AbortRequest => 2,
            Self::EndRequest => 3,
            Self::Params => 4,
            Self::Stdin => 5,
            Self::Stdout => 6,
            Self::Stderr => 7,
            Self::Data => 8,
            Self::GetValues => 9,
            Self::GetValuesResult => 10,
            Self::UnknownType => 11,
            Self::Other(c) => *c,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::BeginRequest,
            2 => Self::AbortRequest,
            3 => Self::EndRequest,
            4 => Self::Params,
            5 => Self::Stdin,
            6 => Self::Stdout,
            7 => Self::Stderr,
            8 => Self::Data,
            9 => Self::GetValues,
            10 => Self::GetValuesResult,
            11 => Self::UnknownType,
            c => Self::Other(c),
        }
    }
}

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub version: u8,
    pub record_type: RecordType,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl RecordHeader {
    /// Parse and validate a header.
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        let version = bytes[0];
        if version != VERSION_1 {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        Ok(Self {
            version,
            record_type: RecordType::from_code(bytes[1]),
            request_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            content_length: u16::from_be_bytes([bytes[4], bytes[5]]),
            padding_length: bytes[6],
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let id = self.request_id.to_be_bytes();
        let len = self.content_length.to_be_bytes();
        [
            self.version,
            self.record_type.code(),
            id[0],
            id[1],
            len[0],
            len[1],
            self.padding_length,
            0,
        ]
    }

    /// Header plus content plus padding.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + usize::from(self.content_length) + usize::from(self.padding_length)
    }
}

/// One FastCGI record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub version: u8,
    pub record_type: RecordType,
    pub request_id: u16,
    pub content: Bytes,
    pub padding_length: u8,
}

impl Record {
    /// Build an outgoing record with minimal padding.
    pub fn new(
        record_type: RecordType,
        request_id: u16,
        content: impl Into<Bytes>,
    ) -> Result<Self, ProtocolError> {
        let content = content.into();
        if content.len() > MAX_CONTENT_LEN {
            return Err(ProtocolError::ContentTooLong(content.len()));
        }
        Ok(Self {
            version: VERSION_1,
            record_type,
            request_id,
            padding_length: padding_for(content.len()),
            content,
        })
    }

    /// Zero-length record, used to terminate a stream.
    pub fn end_of_stream(record_type: RecordType, request_id: u16) -> Self {
        Self {
            version: VERSION_1,
            record_type,
            request_id,
            content: Bytes::new(),
            padding_length: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn is_management(&self) -> bool {
        self.request_id == MANAGEMENT_REQUEST_ID
    }

    pub fn header(&self) -> RecordHeader {
        RecordHeader {
            version: self.version,
            record_type: self.record_type,
            request_id: self.request_id,
            // Record::new bounds the content length.
            content_length: self.content.len() as u16,
            padding_length: self.padding_length,
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.header().frame_len()
    }

    /// Append the wire form of this record to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_slice(&self.header().to_bytes());
        dst.put_slice(&self.content);
        dst.put_bytes(0, usize::from(self.padding_length));
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode one record from the front of `src`.
    ///
    /// Returns `Ok(None)` when `src` does not yet hold a full frame; nothing
    /// is consumed in that case. A bad header is reported as soon as its
    /// eight bytes are available.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        let Some(head) = src.get(..HEADER_LEN) else {
            return Ok(None);
        };
        let mut raw = [0u8; HEADER_LEN];
        raw.copy_from_slice(head);
        let header = RecordHeader::parse(&raw)?;

        let frame_len = header.frame_len();
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(frame_len).freeze();
        frame.advance(HEADER_LEN);
        let content = frame.split_to(usize::from(header.content_length));

        Ok(Some(Self {
            version: header.version,
            record_type: header.record_type,
            request_id: header.request_id,
            content,
            padding_length: header.padding_length,
        }))
    }
}

/// Padding that brings `content_len` up to a multiple of eight.
pub fn padding_for(content_len: usize) -> u8 {
    ((8 - content_len % 8) % 8) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_aligns_to_eight() {
        assert_eq!(padding_for(0), 0);
        assert_eq!(padding_for(1), 7);
        assert_eq!(padding_for(8), 0);
        assert_eq!(padding_for(13), 3);
        assert_eq!(padding_for(MAX_CONTENT_LEN), 1);
    }

    #[test]
    fn header_layout_is_big_endian() {
        let record = Record::new(RecordType::Stdout, 0x0102, &b"hello"[..]).unwrap();
        let bytes = record.to_bytes();
        assert_eq!(&bytes[..8], &[1, 6, 0x01, 0x02, 0x00, 0x05, 3, 0]);
        assert_eq!(&bytes[8..13], b"hello");
        assert_eq!(&bytes[13..], &[0, 0, 0]);
    }

    #[test]
    fn decode_waits_for_full_frame() {
        let record = Record::new(RecordType::Params, 1, &b"abcdefghij"[..]).unwrap();
        let bytes = record.to_bytes();

        let mut buf = BytesMut::from(&bytes[..12]);
        assert_eq!(Record::decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 12);

        buf.extend_from_slice(&bytes[12..]);
        assert_eq!(Record::decode(&mut buf).unwrap(), Some(record));
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let mut buf = BytesMut::from(&[2u8, 1, 0, 1, 0, 0, 0, 0][..]);
        assert_eq!(
            Record::decode(&mut buf),
            Err(ProtocolError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn oversized_content_is_rejected() {
        let content = vec![0u8; MAX_CONTENT_LEN + 1];
        assert_eq!(
            Record::new(RecordType::Stdout, 1, content),
            Err(ProtocolError::ContentTooLong(MAX_CONTENT_LEN + 1))
        );
    }

    #[test]
    fn unknown_type_codes_survive() {
        assert_eq!(RecordType::from_code(42), RecordType::Other(42));
        assert_eq!(RecordType::Other(42).code(), 42);
        for code in 1..=11 {
            assert_eq!(RecordType::from_code(code).code(), code);
        }
    }
}
