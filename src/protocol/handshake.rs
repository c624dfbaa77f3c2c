//! WebSocket opening handshake (RFC 6455 Section 4), server side.
//!
//! [`validate_request`] checks a buffered upgrade request against the
//! protocol rules and the server's [`HandshakePolicy`];
//! [`HandshakeResponse`] produces the `101 Switching Protocols` reply.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::http::{Headers, find_header_end};

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this server speaks.
pub const WEBSOCKET_VERSION: &str = "13";

/// User-agent substrings refused by default when security is enabled.
pub const DEFAULT_BLOCKED_AGENTS: &[&str] = &["sqlmap", "nikto", "nmap", "masscan"];

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsgate::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    BASE64.encode(hash)
}

/// Validate the Origin header against a list of allowed origins.
///
/// A missing Origin never matches a configured list.
///
/// # Errors
/// Returns `Error::OriginNotAllowed` if `origin` is absent or not listed.
pub fn validate_origin(origin: Option<&str>, allowed: &[String]) -> Result<()> {
    match origin {
        Some(o) if allowed.iter().any(|a| a.eq_ignore_ascii_case(o)) => Ok(()),
        Some(o) => Err(Error::OriginNotAllowed {
            origin: o.to_string(),
        }),
        None => Err(Error::OriginNotAllowed {
            origin: "(none)".to_string(),
        }),
    }
}

/// Server-side rules applied on top of RFC 6455 validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakePolicy {
    /// Maximum size of the header block, terminator included.
    pub max_request_size: usize,
    /// Enables the user-agent block list.
    pub security_enabled: bool,
    /// Case-insensitive substrings refused in `User-Agent`.
    pub blocked_user_agents: Vec<String>,
    /// When set, `Origin` must match one entry.
    pub allowed_origins: Option<Vec<String>>,
}

impl Default for HandshakePolicy {
    fn default() -> Self {
        Self {
            max_request_size: 65_536,
            security_enabled: false,
            blocked_user_agents: DEFAULT_BLOCKED_AGENTS.iter().map(|s| s.to_string()).collect(),
            allowed_origins: None,
        }
    }
}

impl HandshakePolicy {
    fn check_user_agent(&self, user_agent: Option<&str>) -> Result<()> {
        if !self.security_enabled {
            return Ok(());
        }
        let Some(agent) = user_agent else {
            return Ok(());
        };
        let lowered = agent.to_ascii_lowercase();
        match self
            .blocked_user_agents
            .iter()
            .find(|blocked| lowered.contains(&blocked.to_ascii_lowercase()))
        {
            Some(blocked) => Err(Error::BlockedClient(format!(
                "user agent matches blocked token {blocked:?}"
            ))),
            None => Ok(()),
        }
    }
}

/// A parsed and validated upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Always `GET`.
    pub method: String,
    /// Request target, e.g. `/chat`.
    pub target: String,
    /// Protocol version as sent, e.g. `HTTP/1.1`.
    pub version: String,
    pub headers: Headers,
    /// Raw `Sec-WebSocket-Key` value.
    pub key: String,
}

impl UpgradeRequest {
    /// Parse a complete header block and check the RFC 6455 requirements.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The data is not valid UTF-8 or the request line is malformed.
    /// - The method is not `GET` or the version is older than `HTTP/1.1`.
    /// - `Host` is missing or empty.
    /// - `Upgrade` lacks the `websocket` token or `Connection` the `upgrade` token.
    /// - `Sec-WebSocket-Key` is not 16 base64-encoded bytes.
    /// - `Sec-WebSocket-Version` is not 13.
    ///
    /// Malformed header lines yield [`Error::InvalidHeaderValue`].
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;

        let mut lines = text.split("\r\n");

        // Request line: "GET /path HTTP/1.1"
        let request_line = lines.next().unwrap_or_default();
        if !request_line.starts_with("GET ") {
            return Err(Error::InvalidHandshake(format!(
                "Expected GET request, got: {request_line}"
            )));
        }
        let parts: Vec<&str> = request_line.split(' ').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(Error::InvalidHandshake("Invalid request line".into()));
        }
        let (method, target, version) = (parts[0], parts[1], parts[2]);
        check_http_version(version)?;

        let headers = Headers::parse_lines(lines)?;

        let host = headers.get("host").unwrap_or_default();
        if host.is_empty() {
            return Err(Error::InvalidHandshake("Missing or empty Host header".into()));
        }

        if !headers.contains_token("upgrade", "websocket") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Upgrade header: {}",
                headers.get("upgrade").unwrap_or("(missing)")
            )));
        }

        if !headers.contains_token("connection", "upgrade") {
            return Err(Error::InvalidHandshake(format!(
                "Invalid Connection header: {}",
                headers.get("connection").unwrap_or("(missing)")
            )));
        }

        let key = headers
            .get("sec-websocket-key")
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Key header".into()))?;
        check_key(key)?;

        match headers.get("sec-websocket-version") {
            Some(WEBSOCKET_VERSION) => {}
            Some(other) => {
                return Err(Error::InvalidHandshake(format!(
                    "Unsupported WebSocket version: {other} (expected 13)"
                )));
            }
            None => {
                return Err(Error::InvalidHandshake(
                    "Missing Sec-WebSocket-Version header".into(),
                ));
            }
        }

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            key: key.to_string(),
            headers,
        })
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get("user-agent")
    }

    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.headers.get("origin")
    }
}

fn check_http_version(version: &str) -> Result<()> {
    let numbers = version
        .strip_prefix("HTTP/")
        .and_then(|v| v.split_once('.'))
        .and_then(|(major, minor)| Some((major.parse::<u32>().ok()?, minor.parse::<u32>().ok()?)));
    match numbers {
        Some(v) if v >= (1, 1) => Ok(()),
        _ => Err(Error::InvalidHandshake(format!(
            "Expected HTTP/1.1 or later, got {version}"
        ))),
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.len() != 24 {
        return Err(Error::InvalidHandshake(format!(
            "Sec-WebSocket-Key must be 24 characters, got {}",
            key.len()
        )));
    }
    match BASE64.decode(key) {
        Ok(decoded) if decoded.len() == 16 => Ok(()),
        Ok(decoded) => Err(Error::InvalidHandshake(format!(
            "Sec-WebSocket-Key must be 16 bytes, got {}",
            decoded.len()
        ))),
        Err(_) => Err(Error::InvalidHandshake(
            "Invalid Sec-WebSocket-Key: not valid Base64".into(),
        )),
    }
}

/// Validate a buffered upgrade request.
///
/// `buf` may hold bytes past the header block (pipelined frames); only the
/// header block is inspected.
///
/// # Errors
///
/// - `Error::InvalidHandshake` if the header block is incomplete or malformed
/// - `Error::RequestTooLarge` if the header block exceeds `policy.max_request_size`
/// - `Error::BlockedClient` for a blocked user agent (security enabled)
/// - `Error::OriginNotAllowed` if an allowed-origins list rejects `Origin`
pub fn validate_request(buf: &[u8], policy: &HandshakePolicy) -> Result<UpgradeRequest> {
    let end = match find_header_end(buf) {
        Some(end) => end,
        None if buf.len() > policy.max_request_size => {
            return Err(Error::RequestTooLarge {
                size: buf.len(),
                max: policy.max_request_size,
            });
        }
        None => return Err(Error::InvalidHandshake("Incomplete request headers".into())),
    };
    if end > policy.max_request_size {
        return Err(Error::RequestTooLarge {
            size: end,
            max: policy.max_request_size,
        });
    }

    let request = UpgradeRequest::parse(&buf[..end])?;
    policy.check_user_agent(request.user_agent())?;
    if let Some(allowed) = &policy.allowed_origins {
        validate_origin(request.origin(), allowed)?;
    }
    Ok(request)
}

/// WebSocket handshake response from server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
}

impl HandshakeResponse {
    /// Create a handshake response from a validated request.
    #[must_use]
    pub fn from_request(req: &UpgradeRequest) -> Self {
        Self {
            accept: compute_accept_key(&req.key),
        }
    }

    /// Write the `101 Switching Protocols` response to a buffer.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Accept: {}\r\n", self.accept).as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        self.write(&mut buf);
        buf
    }
}
