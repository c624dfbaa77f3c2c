//! Configuration and limits for the WebSocket server.
//!
//! [`ServerConfig`] is the immutable record the server is started with. It is
//! built with `with_*` methods (or the server's setters before `start`) and
//! checked by [`ServerConfig::validate`].

use std::time::Duration;

use crate::error::{Error, Result};
use crate::net;
use crate::protocol::handshake::{DEFAULT_BLOCKED_AGENTS, HandshakePolicy};

/// Size limits applied to each connection.
///
/// These bound the memory a single client can make the server buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload of a single frame in bytes.
    ///
    /// Default: 1 MiB (1024 * 1024)
    pub max_frame_size: usize,

    /// Maximum size of the HTTP upgrade request (request line, headers and
    /// the terminating blank line).
    ///
    /// Default: 64 KiB (65,536)
    pub max_request_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 1024 * 1024,
            max_request_size: 65_536,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(max_frame_size: usize, max_request_size: usize) -> Self {
        Self {
            max_frame_size,
            max_request_size,
        }
    }

    /// Validate that a frame payload is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that an upgrade request is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_request_size(&self, size: usize) -> Result<()> {
        if size > self.max_request_size {
            Err(Error::RequestTooLarge {
                size,
                max: self.max_request_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Per-connection timeouts, enforced by the connection driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Time allowed for the complete upgrade request to arrive.
    ///
    /// Default: 30 seconds
    pub handshake: Option<Duration>,

    /// Close an open connection (code 1001) after this long without a frame.
    ///
    /// Default: None
    pub idle: Option<Duration>,

    /// Time to wait for the peer's Close frame after the server sent its own.
    ///
    /// Default: 2 seconds
    pub close: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Some(Duration::from_secs(30)),
            idle: None,
            close: Duration::from_secs(2),
        }
    }
}

/// WebSocket server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Textual IPv4 or IPv6 address to bind.
    ///
    /// Default: "0.0.0.0"
    pub bind_address: String,

    /// TCP port; 0 lets the OS pick one.
    ///
    /// Default: 8080
    pub port: u16,

    /// Enables admission control and the user-agent block list.
    ///
    /// Default: false
    pub security_enabled: bool,

    /// Maximum concurrent connections across all clients.
    ///
    /// Default: 50
    pub max_connections: usize,

    /// Maximum concurrent connections from one client IP.
    ///
    /// Default: 5
    pub max_connections_per_ip: usize,

    /// Maximum new connections from one client IP per rolling minute.
    ///
    /// Default: 10
    pub max_connections_per_minute: usize,

    /// Listen backlog.
    ///
    /// Default: 128
    pub backlog: i32,

    /// Size limits.
    pub limits: Limits,

    /// Timeouts.
    pub timeouts: Timeouts,

    /// Allowed origins. `None` disables origin checks.
    ///
    /// Default: None
    pub allowed_origins: Option<Vec<String>>,

    /// User-agent substrings refused when security is enabled.
    ///
    /// Default: sqlmap, nikto, nmap, masscan
    pub blocked_user_agents: Vec<String>,

    /// Answer refused clients with `429 Too Many Requests` before closing.
    ///
    /// Default: true
    pub reject_with_status: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            security_enabled: false,
            max_connections: 50,
            max_connections_per_ip: 5,
            max_connections_per_minute: 10,
            backlog: 128,
            limits: Limits::default(),
            timeouts: Timeouts::default(),
            allowed_origins: None,
            blocked_user_agents: DEFAULT_BLOCKED_AGENTS.iter().map(|s| s.to_string()).collect(),
            reject_with_status: true,
        }
    }
}

impl ServerConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    #[must_use]
    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    /// Set the port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable or disable admission control and client screening.
    #[must_use]
    pub const fn with_security(mut self, enabled: bool) -> Self {
        self.security_enabled = enabled;
        self
    }

    /// Set the global connection cap.
    #[must_use]
    pub const fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-IP concurrent connection cap.
    #[must_use]
    pub const fn with_max_connections_per_ip(mut self, max: usize) -> Self {
        self.max_connections_per_ip = max;
        self
    }

    /// Set the per-IP new connection rate (per rolling minute).
    #[must_use]
    pub const fn with_max_connections_per_minute(mut self, max: usize) -> Self {
        self.max_connections_per_minute = max;
        self
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set timeout configuration.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Restrict accepted `Origin` headers.
    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = Some(origins);
        self
    }

    /// Choose whether refused clients receive a 429 before the close.
    #[must_use]
    pub const fn with_reject_status(mut self, send: bool) -> Self {
        self.reject_with_status = send;
        self
    }

    /// Handshake rules derived from this configuration.
    #[must_use]
    pub fn handshake_policy(&self) -> HandshakePolicy {
        HandshakePolicy {
            max_request_size: self.limits.max_request_size,
            security_enabled: self.security_enabled,
            blocked_user_agents: self.blocked_user_agents.clone(),
            allowed_origins: self.allowed_origins.clone(),
        }
    }

    /// Check the configuration before the server starts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if !net::is_ipv4(&self.bind_address) && !net::is_ipv6(&self.bind_address) {
            return Err(Error::InvalidArgument(format!(
                "bind address is not an IPv4 or IPv6 literal: {}",
                self.bind_address
            )));
        }
        let positive = [
            ("max_connections", self.max_connections),
            ("max_connections_per_ip", self.max_connections_per_ip),
            ("max_connections_per_minute", self.max_connections_per_minute),
            ("max_frame_size", self.limits.max_frame_size),
            ("max_request_size", self.limits.max_request_size),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::InvalidArgument(format!("{name} must be greater than zero")));
        }
        if self.backlog <= 0 {
            return Err(Error::InvalidArgument("backlog must be greater than zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_default() {
        let limits = Limits::default();
        assert_eq!(limits.max_frame_size, 1024 * 1024);
        assert_eq!(limits.max_request_size, 65_536);
    }

    #[test]
    fn test_limits_copied_out_of_shared_config() {
        let shared = std::sync::Arc::new(ServerConfig::new().with_limits(Limits::new(16, 512)));
        let limits: Limits = shared.limits;
        assert_eq!(limits, Limits::new(16, 512));
        assert_eq!(shared.limits.max_frame_size, 16);
    }

    #[test]
    fn test_limits_check_request_size() {
        let limits = Limits::default();
        assert!(limits.check_request_size(65_536).is_ok());
        assert_eq!(
            limits.check_request_size(65_537),
            Err(Error::RequestTooLarge {
                size: 65_537,
                max: 65_536
            })
        );
    }

    #[test]
    fn test_limits_check_frame_size() {
        let limits = Limits::new(16, 1024);
        assert!(limits.check_frame_size(16).is_ok());
        assert!(limits.check_frame_size(17).is_err());
    }

    #[test]
    fn test_timeouts_default() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.handshake, Some(Duration::from_secs(30)));
        assert_eq!(timeouts.idle, None);
        assert_eq!(timeouts.close, Duration::from_secs(2));
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert!(!config.security_enabled);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.max_connections_per_ip, 5);
        assert_eq!(config.max_connections_per_minute, 10);
        assert_eq!(config.backlog, 128);
        assert_eq!(
            config.blocked_user_agents,
            vec!["sqlmap", "nikto", "nmap", "masscan"]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_config_builder() {
        let config = ServerConfig::new()
            .with_bind_address("::1")
            .with_port(0)
            .with_security(true)
            .with_max_connections_per_ip(1)
            .with_allowed_origins(vec!["https://example.com".into()]);

        assert_eq!(config.bind_address, "::1");
        assert_eq!(config.port, 0);
        assert_eq!(config.max_connections_per_ip, 1);
        assert!(config.validate().is_ok());

        let policy = config.handshake_policy();
        assert!(policy.security_enabled);
        assert_eq!(
            policy.allowed_origins,
            Some(vec!["https://example.com".to_string()])
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ServerConfig::new().with_bind_address("example.com");
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));

        let config = ServerConfig::new().with_max_connections(0);
        assert!(
            matches!(config.validate(), Err(Error::InvalidArgument(msg)) if msg.contains("max_connections"))
        );

        let config = ServerConfig::new().with_limits(Limits::new(0, 1));
        assert!(config.validate().is_err());
    }
}
