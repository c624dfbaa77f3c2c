//! Test harness utilities for end-to-end server testing.
//!
//! This module provides a server running on an ephemeral localhost port with
//! a recording handler, and a raw WebSocket client that masks its frames.

#![allow(dead_code)]

mod client;
mod server;

pub use client::TestClient;
pub use server::TestServer;

use wsgate::protocol::{Frame, apply_mask};

/// RFC 6455 sample key and its accept value.
pub const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
pub const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

/// Encode `frame` the way a client must send it: masked with `key`.
pub fn masked(frame: &Frame, key: [u8; 4]) -> Vec<u8> {
    let unmasked = frame.to_bytes();
    let header_len = unmasked.len() - frame.payload().len();
    let mut bytes = unmasked[..header_len].to_vec();
    bytes[1] |= 0x80;
    bytes.extend_from_slice(&key);
    bytes.extend_from_slice(frame.payload());
    apply_mask(&mut bytes[header_len + 4..], key);
    bytes
}

/// An upgrade request for `/chat` with `extra` header lines inserted.
pub fn upgrade_request(extra: &[&str]) -> String {
    let mut request = String::from("GET /chat HTTP/1.1\r\nHost: x\r\n");
    for line in extra {
        request.push_str(line);
        request.push_str("\r\n");
    }
    request.push_str("Upgrade: websocket\r\nConnection: Upgrade\r\n");
    request.push_str(&format!("Sec-WebSocket-Key: {SAMPLE_KEY}\r\n"));
    request.push_str("Sec-WebSocket-Version: 13\r\n\r\n");
    request
}
