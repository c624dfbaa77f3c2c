//! Header-level validation of incoming client frames.
//!
//! Runs as soon as a frame header is decoded, so an oversized or malformed
//! frame is refused before its payload is buffered:
//! - masking rules per RFC 6455 Section 5.1
//! - RSV bits (no extensions are negotiated)
//! - control frame constraints per Section 5.5
//! - the configured payload limit

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::frame::{FrameHeader, MAX_CONTROL_FRAME_PAYLOAD};

/// Validator for frames a server receives from its clients.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    limits: Limits,
}

impl FrameValidator {
    /// Create a validator enforcing `limits`.
    #[must_use]
    pub const fn new(limits: Limits) -> Self {
        Self { limits }
    }

    /// Validate a decoded frame header.
    ///
    /// # Errors
    ///
    /// - `Error::UnmaskedClientFrame` - the client did not mask the frame
    /// - `Error::ReservedBitsSet` - an RSV bit is set
    /// - `Error::FragmentedControlFrame` / `Error::ControlFrameTooLarge` - control frame rules
    /// - `Error::FrameTooLarge` - payload exceeds `limits.max_frame_size`
    pub(crate) fn validate_header(&self, header: &FrameHeader) -> Result<()> {
        self.validate_incoming(
            header.mask.is_some(),
            header.rsv1 || header.rsv2 || header.rsv3,
            header.opcode.is_control(),
            header.fin,
            header.payload_len,
        )
    }

    /// Validate the properties of an incoming frame.
    ///
    /// # Errors
    ///
    /// See [`FrameValidator::validate_header`].
    pub fn validate_incoming(
        &self,
        masked: bool,
        rsv: bool,
        control: bool,
        fin: bool,
        payload_len: usize,
    ) -> Result<()> {
        if !masked {
            return Err(Error::UnmaskedClientFrame);
        }
        if rsv {
            return Err(Error::ReservedBitsSet);
        }
        if control {
            if !fin {
                return Err(Error::FragmentedControlFrame);
            }
            if payload_len > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(payload_len));
            }
        }
        self.limits.check_frame_size(payload_len)
    }
}
