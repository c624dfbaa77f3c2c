//! WebSocket frame parsing and serialization (RFC 6455 Section 5).

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask_fast;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Decoded frame header, available before the payload has arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub(crate) fin: bool,
    pub(crate) rsv1: bool,
    pub(crate) rsv2: bool,
    pub(crate) rsv3: bool,
    pub(crate) opcode: OpCode,
    pub(crate) mask: Option<[u8; 4]>,
    pub(crate) payload_len: usize,
    pub(crate) header_len: usize,
}

/// Parse a frame header from the start of `buf`.
///
/// # Errors
///
/// - `Error::IncompleteFrame` if not enough data is available
/// - `Error::ReservedOpcode` if a reserved opcode is used
/// - `Error::InvalidFrame` if the 64-bit length has its most significant bit set
/// - `Error::PayloadTooLargeForPlatform` if the length does not fit in `usize`
#[inline]
pub(crate) fn parse_header(buf: &[u8]) -> Result<FrameHeader> {
    if buf.len() < 2 {
        return Err(Error::IncompleteFrame {
            needed: 2 - buf.len(),
        });
    }

    let byte0 = buf[0];
    let byte1 = buf[1];

    let fin = (byte0 & 0x80) != 0;
    let rsv1 = (byte0 & 0x40) != 0;
    let rsv2 = (byte0 & 0x20) != 0;
    let rsv3 = (byte0 & 0x10) != 0;
    let opcode = OpCode::from_u8(byte0 & 0x0F)?;

    let masked = (byte1 & 0x80) != 0;
    let len7 = byte1 & 0x7F;

    let (payload_len, len_end) = match len7 {
        0..=125 => (usize::from(len7), 2),
        126 => {
            if buf.len() < 4 {
                return Err(Error::IncompleteFrame {
                    needed: 4 - buf.len(),
                });
            }
            (usize::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
        }
        _ => {
            if buf.len() < 10 {
                return Err(Error::IncompleteFrame {
                    needed: 10 - buf.len(),
                });
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            let len_u64 = u64::from_be_bytes(raw);
            if len_u64 & (1 << 63) != 0 {
                return Err(Error::InvalidFrame(
                    "64-bit payload length must have its most significant bit clear".into(),
                ));
            }
            let len = usize::try_from(len_u64).map_err(|_| Error::PayloadTooLargeForPlatform {
                size: len_u64,
                max: usize::MAX as u64,
            })?;
            (len, 10)
        }
    };

    let header_len = if masked { len_end + 4 } else { len_end };
    if buf.len() < header_len {
        return Err(Error::IncompleteFrame {
            needed: header_len - buf.len(),
        });
    }

    let mask = masked.then(|| [buf[len_end], buf[len_end + 1], buf[len_end + 2], buf[len_end + 3]]);

    Ok(FrameHeader {
        fin,
        rsv1,
        rsv2,
        rsv3,
        opcode,
        mask,
        payload_len,
        header_len,
    })
}

/// A WebSocket frame as defined in RFC 6455.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                Masking key (if MASK set)                      |
/// +---------------------------------------------------------------+
/// |                     Payload data                              |
/// +---------------------------------------------------------------+
/// ```
///
/// Parsed frames hold the unmasked payload; `masked` records whether the
/// sender masked it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bit 1. Must be 0 (no extensions are negotiated).
    pub rsv1: bool,
    /// Reserved bit 2. Must be 0.
    pub rsv2: bool,
    /// Reserved bit 3. Must be 0.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Whether the frame arrived masked.
    pub masked: bool,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a new unmasked frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masked: false,
            payload,
        }
    }

    /// Create a final text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Create a final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Create a close frame with optional status code and reason.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = match code {
            Some(code) => {
                let mut data = code.to_be_bytes().to_vec();
                data.extend_from_slice(reason.as_bytes());
                data
            }
            None => Vec::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Get the (unmasked) payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Parse a frame from a buffer.
    ///
    /// Returns the parsed frame and the number of bytes consumed. A masked
    /// payload is unmasked in the returned frame.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if not enough data is available
    /// - `Error::ReservedOpcode` if a reserved opcode is used
    /// - `Error::InvalidFrame` for an invalid 64-bit length
    #[inline]
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = parse_header(buf)?;

        let total_size = header.header_len.checked_add(header.payload_len).ok_or(
            Error::PayloadTooLargeForPlatform {
                size: header.payload_len as u64,
                max: usize::MAX as u64,
            },
        )?;

        if buf.len() < total_size {
            return Err(Error::IncompleteFrame {
                needed: total_size - buf.len(),
            });
        }

        let mut payload = buf[header.header_len..total_size].to_vec();
        if let Some(mask) = header.mask {
            apply_mask_fast(&mut payload, mask);
        }

        let frame = Frame {
            fin: header.fin,
            rsv1: header.rsv1,
            rsv2: header.rsv2,
            rsv3: header.rsv3,
            opcode: header.opcode,
            masked: header.mask.is_some(),
            payload,
        };

        Ok((frame, total_size))
    }

    /// Validate the frame according to RFC 6455.
    ///
    /// # Errors
    ///
    /// - `Error::ReservedBitsSet` if RSV bits are set
    /// - `Error::FragmentedControlFrame` if a control frame has FIN=0
    /// - `Error::ControlFrameTooLarge` if a control frame payload > 125 bytes
    pub fn validate(&self) -> Result<()> {
        if self.rsv1 || self.rsv2 || self.rsv3 {
            return Err(Error::ReservedBitsSet);
        }

        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload.len()));
            }
        }

        Ok(())
    }

    /// Encode the frame into `buf` as the server sends it: never masked.
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidFrame` if `buf` is shorter than [`Frame::wire_size`].
    pub fn write(&self, buf: &mut [u8]) -> Result<usize> {
        let len = self.payload.len();
        let total = self.wire_size();
        if buf.len() < total {
            return Err(Error::InvalidFrame(format!(
                "Buffer too small: need {total} bytes, have {}",
                buf.len()
            )));
        }

        buf[0] = u8::from(self.fin) << 7
            | u8::from(self.rsv1) << 6
            | u8::from(self.rsv2) << 5
            | u8::from(self.rsv3) << 4
            | self.opcode.as_u8();
        let header_len = match len {
            0..=125 => {
                buf[1] = len as u8;
                2
            }
            126..=0xFFFF => {
                buf[1] = 126;
                buf[2..4].copy_from_slice(&(len as u16).to_be_bytes());
                4
            }
            _ => {
                buf[1] = 127;
                buf[2..10].copy_from_slice(&(len as u64).to_be_bytes());
                10
            }
        };
        buf[header_len..total].copy_from_slice(&self.payload);
        Ok(total)
    }

    /// Encode the frame into a freshly allocated buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.wire_size()];
        // Sized by wire_size, so write cannot run short.
        let written = self.write(&mut buf).unwrap_or(0);
        buf.truncate(written);
        buf
    }

    /// Encoded size of the (unmasked) frame.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        let len = self.payload.len();
        let extended = match len {
            0..=125 => 0,
            126..=0xFFFF => 2,
            _ => 8,
        };
        2 + extended + len
    }

    /// Client-side encoding, for feeding the server masked frames in tests.
    #[cfg(test)]
    pub(crate) fn to_masked_bytes(&self, key: [u8; 4]) -> Vec<u8> {
        let unmasked = self.to_bytes();
        let header_len = unmasked.len() - self.payload.len();
        let mut bytes = Vec::with_capacity(unmasked.len() + 4);
        bytes.extend_from_slice(&unmasked[..header_len]);
        bytes[1] |= 0x80;
        bytes.extend_from_slice(&key);
        bytes.extend_from_slice(&self.payload);
        crate::protocol::mask::apply_mask(&mut bytes[header_len + 4..], key);
        bytes
    }
}
