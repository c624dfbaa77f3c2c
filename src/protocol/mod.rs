//! WebSocket protocol core (RFC 6455): handshake, frames, masking and
//! incoming-frame validation. Runtime independent.

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod validation;

pub use frame::Frame;
pub use handshake::{
    HandshakePolicy, HandshakeResponse, UpgradeRequest, WS_GUID, compute_accept_key,
    validate_request,
};
pub use mask::{apply_mask, apply_mask_fast};
pub use opcode::OpCode;
pub use validation::FrameValidator;
