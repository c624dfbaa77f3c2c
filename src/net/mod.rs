//! OS-independent TCP socket facade.
//!
//! [`Socket`] wraps a `socket2` socket with the small blocking/non-blocking
//! surface the server and the HTTP client need. Failures are reported as
//! [`SocketError`] values carrying a closed [`SocketErrorKind`] and the raw
//! OS error code, so callers can tell `WouldBlock` apart from real failures.

mod socket;

pub use socket::{AddressFamily, Socket, SocketError, SocketErrorKind};

use std::net::{Ipv4Addr, Ipv6Addr};

/// Whether `address` is a textual IPv4 address.
#[must_use]
pub fn is_ipv4(address: &str) -> bool {
    address.parse::<Ipv4Addr>().is_ok()
}

/// Whether `address` is a textual IPv6 address.
#[must_use]
pub fn is_ipv6(address: &str) -> bool {
    address.parse::<Ipv6Addr>().is_ok()
}
