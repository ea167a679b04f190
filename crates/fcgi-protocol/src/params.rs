//! Name/value pair encoding used by PARAMS, GET_VALUES and GET_VALUES_RESULT.
//!
//! Each length is one byte when below 128, otherwise four bytes big-endian
//! with the top bit set. A pair is `nameLen valueLen name value`.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;

fn encode_length(len: usize, dst: &mut BytesMut) {
    if len < 0x80 {
        dst.put_u8(len as u8);
    } else {
        dst.put_u32((len as u32) | 0x8000_0000);
    }
}

/// Append one pair to `dst`.
pub fn encode_pair(name: &[u8], value: &[u8], dst: &mut BytesMut) {
    encode_length(name.len(), dst);
    encode_length(value.len(), dst);
    dst.put_slice(name);
    dst.put_slice(value);
}

/// Encode a sequence of string pairs.
pub fn encode_pairs<'a, I>(pairs: I) -> BytesMut
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut buf = BytesMut::new();
    for (name, value) in pairs {
        encode_pair(name.as_bytes(), value.as_bytes(), &mut buf);
    }
    buf
}

/// Read a length prefix, returning `(length, prefix_size)`.
fn read_length(buf: &[u8]) -> Option<(usize, usize)> {
    match buf {
        [b0, ..] if b0 & 0x80 == 0 => Some((usize::from(*b0), 1)),
        [b0, b1, b2, b3, ..] => {
            let len = u32::from_be_bytes([b0 & 0x7f, *b1, *b2, *b3]);
            Some((len as usize, 4))
        }
        _ => None,
    }
}

/// Incremental decoder for a name/value stream that may be split anywhere,
/// including inside a length prefix.
#[derive(Debug, Default)]
pub struct NameValueDecoder {
    pending: BytesMut,
}

impl NameValueDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk and return every pair it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<(String, String)> {
        self.pending.extend_from_slice(chunk);
        let mut pairs = Vec::new();

        loop {
            let Some((name_len, n)) = read_length(&self.pending) else {
                break;
            };
            let Some((value_len, v)) = self.pending.get(n..).and_then(read_length) else {
                break;
            };
            let total = n + v + name_len + value_len;
            if self.pending.len() < total {
                break;
            }

            self.pending.advance(n + v);
            let name = self.pending.split_to(name_len);
            let value = self.pending.split_to(value_len);
            pairs.push((
                String::from_utf8_lossy(&name).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            ));
        }

        pairs
    }

    /// Finish the stream. Leftover bytes mean the last pair was cut short.
    pub fn finish(self) -> Result<(), ProtocolError> {
        match self.pending.len() {
            0 => Ok(()),
            n => Err(ProtocolError::TruncatedNameValue(n)),
        }
    }
}

/// Decode a complete, self-contained name/value body.
pub fn decode_pairs(content: &[u8]) -> Result<Vec<(String, String)>, ProtocolError> {
    let mut decoder = NameValueDecoder::new();
    let pairs = decoder.feed(content);
    decoder.finish()?;
    Ok(pairs)
}
