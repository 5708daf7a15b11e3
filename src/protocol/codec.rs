//! Incremental MessagePack stream decoding.

use bytes::{Buf, BytesMut};
use rmpv::Value;
use std::io::{Cursor, ErrorKind};
use thiserror::Error;

/// Errors produced while encoding or decoding wire objects.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The byte stream is not valid MessagePack.
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// An outgoing value could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// A decoded object did not have the expected structure.
    #[error("unexpected payload: {0}")]
    Payload(String),

    /// Too many bytes buffered without completing an object.
    #[error("incomplete object exceeds {limit} bytes ({buffered} buffered)")]
    Oversized { buffered: usize, limit: usize },
}

/// Default cap on bytes held for one incomplete object.
pub const DEFAULT_MAX_BUFFERED: usize = 64 * 1024 * 1024;

/// Decodes a continuous stream of MessagePack objects.
///
/// Bytes are appended to an internal buffer; each call to [`decode`](Self::decode)
/// yields one complete object or `None` if more bytes are needed. An
/// incomplete object is re-parsed from its start on every call, so the
/// buffer is capped and a stream that grows past the cap is an error.
#[derive(Debug)]
pub struct PacketDecoder {
    buffer: BytesMut,
    max_buffered: usize,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::with_max_buffered(DEFAULT_MAX_BUFFERED)
    }

    pub fn with_max_buffered(max_buffered: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_buffered,
        }
    }

    /// Buffer to read socket data into.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Number of buffered, not yet decoded bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Try to decode the next complete object.
    pub fn decode(&mut self) -> Result<Option<Value>, ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&self.buffer[..]);
        match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => {
                let consumed = cursor.position() as usize;
                self.buffer.advance(consumed);
                Ok(Some(value))
            }
            Err(rmpv::decode::Error::InvalidMarkerRead(e))
            | Err(rmpv::decode::Error::InvalidDataRead(e))
                if e.kind() == ErrorKind::UnexpectedEof =>
            {
                if self.buffer.len() > self.max_buffered {
                    return Err(ProtocolError::Oversized {
                        buffered: self.buffer.len(),
                        limit: self.max_buffered,
                    });
                }
                Ok(None)
            }
            Err(e) => Err(ProtocolError::Malformed(e.to_string())),
        }
    }
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a dynamic value into a typed structure.
pub fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ProtocolError> {
    rmpv::ext::from_value(value).map_err(|e| ProtocolError::Payload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_for_complete_object() {
        let bytes = rmp_serde::to_vec(&("tag", 1, "payload")).unwrap();
        let mut decoder = PacketDecoder::new();

        decoder.buffer_mut().extend_from_slice(&bytes[..bytes.len() - 2]);
        assert!(decoder.decode().unwrap().is_none());

        decoder.buffer_mut().extend_from_slice(&bytes[bytes.len() - 2..]);
        let value = decoder.decode().unwrap().unwrap();
        assert_eq!(value.as_array().unwrap().len(), 3);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn incomplete_object_over_limit_is_rejected() {
        let bytes = rmp_serde::to_vec(&"y".repeat(200)).unwrap();
        let mut decoder = PacketDecoder::with_max_buffered(64);

        decoder.buffer_mut().extend_from_slice(&bytes[..32]);
        assert!(decoder.decode().unwrap().is_none());

        decoder.buffer_mut().extend_from_slice(&bytes[32..100]);
        assert!(matches!(
            decoder.decode(),
            Err(ProtocolError::Oversized { buffered: 100, limit: 64 })
        ));
    }

    #[test]
    fn complete_object_over_limit_still_decodes() {
        let bytes = rmp_serde::to_vec(&"y".repeat(200)).unwrap();
        let mut decoder = PacketDecoder::with_max_buffered(64);
        decoder.buffer_mut().extend_from_slice(&bytes);
        assert_eq!(decoder.decode().unwrap(), Some(Value::from("y".repeat(200))));
    }

    #[test]
    fn decodes_back_to_back_objects() {
        let mut decoder = PacketDecoder::new();
        decoder.buffer_mut().extend_from_slice(&rmp_serde::to_vec(&1u8).unwrap());
        decoder.buffer_mut().extend_from_slice(&rmp_serde::to_vec(&"two").unwrap());

        assert_eq!(decoder.decode().unwrap(), Some(Value::from(1)));
        assert_eq!(decoder.decode().unwrap(), Some(Value::from("two")));
        assert_eq!(decoder.decode().unwrap(), None);
    }
}
