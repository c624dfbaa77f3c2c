//! WebSocket codec for async I/O.
//!
//! This module reads the upgrade request and frames from an async stream and
//! writes server frames back.

#[cfg(feature = "async-tokio")]
mod framed;

#[cfg(feature = "async-tokio")]
pub use framed::WebSocketCodec;
