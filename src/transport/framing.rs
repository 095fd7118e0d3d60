//! Wire codec for the local IPC socket.
//!
//! Every frame carries an opcode and a length-prefixed payload:
//!
//! ```text
//! [u32 LE opcode] [u32 LE length] [payload: length bytes]
//! ```
//!
//! Opcodes:
//! - `0`: HANDSHAKE (client hello, JSON)
//! - `1`: FRAME (RPC packet)
//! - `2`: CLOSE (`{"code": n, "message": "..."}`)
//! - `3`: PING (payload echoed back in a PONG)
//! - `4`: PONG

use anyhow::{bail, Result};
use serde_json::json;

use crate::constants::MAX_FRAME_SIZE;

/// Length of the opcode + length header.
const HEADER_LEN: usize = 8;

/// IPC frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    /// Client hello carrying `{"v": 1, "client_id": "..."}`.
    Handshake = 0,
    /// RPC packet.
    Frame = 1,
    /// Connection close with status.
    Close = 2,
    /// Keep-alive request.
    Ping = 3,
    /// Keep-alive reply.
    Pong = 4,
}

impl Opcode {
    /// Parse a wire opcode.
    pub fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Opcode::Handshake),
            1 => Some(Opcode::Frame),
            2 => Some(Opcode::Close),
            3 => Some(Opcode::Ping),
            4 => Some(Opcode::Pong),
            _ => None,
        }
    }
}

/// A decoded IPC frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame opcode.
    pub opcode: Opcode,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame.
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// CLOSE frame carrying a status code and reason.
    pub fn close(code: u16, reason: &str) -> Self {
        let payload = json!({ "code": code, "message": reason }).to_string();
        Self::new(Opcode::Close, payload)
    }

    /// Encode this frame into wire format.
    ///
    /// Payloads longer than `u32::MAX` cannot be produced by this crate;
    /// outbound packets are small JSON documents.
    pub fn encode(&self) -> Vec<u8> {
        let length = u32::try_from(self.payload.len()).unwrap_or(u32::MAX);
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&(self.opcode as u32).to_le_bytes());
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Incremental frame decoder that handles partial reads.
///
/// Feed bytes via [`FrameDecoder::feed`] and extract complete frames.
/// Handles stream reassembly: a frame split across reads is buffered, and
/// several frames in one read are all returned.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the decoder and extract all complete frames.
    ///
    /// # Errors
    ///
    /// Returns an error on an unknown opcode or a payload above
    /// [`MAX_FRAME_SIZE`]. The decoder must not be reused after an error.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while self.buf.len() >= HEADER_LEN {
            let raw_opcode = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
            let length = u32::from_le_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]);

            let Some(opcode) = Opcode::from_wire(raw_opcode) else {
                bail!("Unknown opcode: {raw_opcode}");
            };
            if length > MAX_FRAME_SIZE {
                bail!("Frame too large: {length} bytes (max {MAX_FRAME_SIZE})");
            }

            let total = HEADER_LEN + length as usize;
            if self.buf.len() < total {
                break;
            }

            frames.push(Frame::new(opcode, &self.buf[HEADER_LEN..total]));
            self.buf.drain(..total);
        }

        Ok(frames)
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(opcode: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&opcode.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_encode_layout() {
        let encoded = Frame::new(Opcode::Frame, b"{}".to_vec()).encode();
        assert_eq!(encoded, vec![1, 0, 0, 0, 2, 0, 0, 0, b'{', b'}']);
    }

    #[test]
    fn test_multiple_frames_in_single_feed() {
        let mut buf = raw(0, br#"{"v":1,"client_id":"1"}"#);
        buf.extend(raw(1, br#"{"cmd":"AUTHORIZE"}"#));
        buf.extend(raw(3, b""));

        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&buf).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].opcode, Opcode::Handshake);
        assert_eq!(frames[1], Frame::new(Opcode::Frame, br#"{"cmd":"AUTHORIZE"}"#.to_vec()));
        assert_eq!(frames[2], Frame::new(Opcode::Ping, Vec::new()));
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_partial_frame_reassembly() {
        let encoded = raw(1, b"hello world");
        let mut decoder = FrameDecoder::new();

        // Split inside the header
        assert!(decoder.feed(&encoded[..5]).unwrap().is_empty());
        assert!(decoder.has_partial());

        // Split inside the payload
        assert!(decoder.feed(&encoded[5..12]).unwrap().is_empty());

        let frames = decoder.feed(&encoded[12..]).unwrap();
        assert_eq!(frames, vec![Frame::new(Opcode::Frame, b"hello world".to_vec())]);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_byte_at_a_time() {
        let encoded = raw(3, b"abc");
        let mut decoder = FrameDecoder::new();
        for (i, byte) in encoded.iter().enumerate() {
            let frames = decoder.feed(&[*byte]).unwrap();
            if i < encoded.len() - 1 {
                assert!(frames.is_empty());
            } else {
                assert_eq!(frames, vec![Frame::new(Opcode::Ping, b"abc".to_vec())]);
            }
        }
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = 1u32.to_le_bytes().to_vec();
        buf.extend_from_slice(&(MAX_FRAME_SIZE + 1).to_le_bytes());
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&buf).is_err());
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let mut decoder = FrameDecoder::new();
        let err = decoder.feed(&raw(9, b"x")).unwrap_err();
        assert!(err.to_string().contains("Unknown opcode"));
    }

    #[test]
    fn test_close_frame_payload() {
        let frame = Frame::close(4003, "Denied");
        assert_eq!(frame.opcode, Opcode::Close);
        let value: serde_json::Value = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(value, json!({"code": 4003, "message": "Denied"}));
    }
}
