use std::fmt;

/// Status codes the server writes on the upgrade path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    SwitchingProtocols,
    BadRequest,
    Forbidden,
    PayloadTooLarge,
    TooManyRequests,
}

impl StatusCode {
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            StatusCode::SwitchingProtocols => 101,
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::TooManyRequests => 429,
        }
    }

    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            StatusCode::SwitchingProtocols => "Switching Protocols",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::TooManyRequests => "Too Many Requests",
        }
    }

    /// A complete `Connection: close` response whose body is the reason phrase.
    #[must_use]
    pub fn error_response(self) -> Vec<u8> {
        let reason = self.reason();
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.as_u16(),
            reason,
            reason.len(),
            reason
        )
        .into_bytes()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}
