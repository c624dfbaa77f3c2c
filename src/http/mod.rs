//! HTTP/1.1 pieces shared by the upgrade handshake and the HTTP client.

pub mod client;
pub mod headers;
mod status;

pub use client::{HttpClient, HttpResponse};
pub use headers::Headers;
pub use status::StatusCode;

/// Offset just past the `\r\n\r\n` that ends a header block.
#[must_use]
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}
