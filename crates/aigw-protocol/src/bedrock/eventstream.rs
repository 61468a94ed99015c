//! Decoder for the `application/vnd.amazon.eventstream` framing used by
//! Bedrock's ConverseStream responses.
//!
//! A frame is: total length (u32 BE), headers length (u32 BE), prelude CRC
//! (u32), headers, payload, message CRC (u32). Headers are
//! `len(u8) name type(u8) value` tuples. This decoder only reads; CRCs are
//! skipped.

use bytes::{Buf, Bytes, BytesMut};

const PRELUDE_LEN: usize = 12;
const TRAILING_CRC_LEN: usize = 4;
/// Upper bound on a single frame, far above anything Bedrock emits.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length {0} is out of range")]
    InvalidLength(u32),
    #[error("frame header block is malformed")]
    MalformedHeaders,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    ByteArray(Bytes),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

impl Frame {
    /// String header lookup; `:event-type` names the payload shape.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|(key, value)| {
            if key == name {
                match value {
                    HeaderValue::String(text) => Some(text.as_str()),
                    _ => None,
                }
            } else {
                None
            }
        })
    }

    pub fn event_type(&self) -> Option<&str> {
        self.header_str(":event-type")
    }
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pops the next complete frame, or `None` until more bytes arrive.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }
        let total_len = u32::from_be_bytes(self.buffer[0..4].try_into().unwrap());
        let headers_len = u32::from_be_bytes(self.buffer[4..8].try_into().unwrap());
        let total = total_len as usize;
        let headers_size = headers_len as usize;
        if total > MAX_FRAME_LEN
            || total < PRELUDE_LEN + TRAILING_CRC_LEN
            || headers_size > total - PRELUDE_LEN - TRAILING_CRC_LEN
        {
            return Err(FrameError::InvalidLength(total_len));
        }
        if self.buffer.len() < total {
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(total).freeze();
        frame.advance(PRELUDE_LEN);
        let header_block = frame.split_to(headers_size);
        let payload_len = total - PRELUDE_LEN - headers_size - TRAILING_CRC_LEN;
        let payload = frame.split_to(payload_len);

        Ok(Some(Frame {
            headers: decode_headers(header_block)?,
            payload,
        }))
    }
}

fn decode_headers(mut block: Bytes) -> Result<Vec<(String, HeaderValue)>, FrameError> {
    let mut headers = Vec::new();
    while block.has_remaining() {
        let name_len = block.get_u8() as usize;
        if block.remaining() < name_len + 1 {
            return Err(FrameError::MalformedHeaders);
        }
        let name = String::from_utf8_lossy(&block.split_to(name_len)).into_owned();
        let value = match block.get_u8() {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => {
                ensure(&block, 1)?;
                HeaderValue::Byte(block.get_i8())
            }
            3 => {
                ensure(&block, 2)?;
                HeaderValue::Int16(block.get_i16())
            }
            4 => {
                ensure(&block, 4)?;
                HeaderValue::Int32(block.get_i32())
            }
            5 => {
                ensure(&block, 8)?;
                HeaderValue::Int64(block.get_i64())
            }
            6 => {
                ensure(&block, 2)?;
                let len = block.get_u16() as usize;
                ensure(&block, len)?;
                HeaderValue::ByteArray(block.split_to(len))
            }
            7 => {
                ensure(&block, 2)?;
                let len = block.get_u16() as usize;
                ensure(&block, len)?;
                HeaderValue::String(String::from_utf8_lossy(&block.split_to(len)).into_owned())
            }
            8 => {
                ensure(&block, 8)?;
                HeaderValue::Timestamp(block.get_i64())
            }
            9 => {
                ensure(&block, 16)?;
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(&block.split_to(16));
                HeaderValue::Uuid(uuid)
            }
            _ => return Err(FrameError::MalformedHeaders),
        };
        headers.push((name, value));
    }
    Ok(headers)
}

fn ensure(block: &Bytes, needed: usize) -> Result<(), FrameError> {
    if block.remaining() < needed {
        return Err(FrameError::MalformedHeaders);
    }
    Ok(())
}

/// Encodes one frame with string headers. The gateway itself only decodes;
/// this exists for tests and local tooling, and writes zeroed CRCs.
pub fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_block = Vec::new();
    for (name, value) in headers {
        header_block.push(name.len() as u8);
        header_block.extend_from_slice(name.as_bytes());
        header_block.push(7);
        header_block.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_block.extend_from_slice(value.as_bytes());
    }
    let total = PRELUDE_LEN + header_block.len() + payload.len() + TRAILING_CRC_LEN;
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(total as u32).to_be_bytes());
    out.extend_from_slice(&(header_block.len() as u32).to_be_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&header_block);
    out.extend_from_slice(payload);
    out.extend_from_slice(&[0u8; 4]);
    out
}
