//! Client identification behind reverse proxies.

use std::net::IpAddr;

use crate::http::Headers;

fn usable(candidate: &str) -> Option<&str> {
    let candidate = candidate.trim();
    (!candidate.is_empty() && !candidate.eq_ignore_ascii_case("unknown")).then_some(candidate)
}

/// The identifier a connection is accounted under.
///
/// The first hop of `X-Forwarded-For` wins, then `X-Real-IP`, then the
/// socket peer address. Empty and `unknown` values are skipped.
#[must_use]
pub fn identify(peer: IpAddr, headers: &Headers) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .and_then(usable)
        .or_else(|| headers.get("x-real-ip").and_then(usable))
        .map_or_else(|| peer.to_string(), str::to_string)
}
