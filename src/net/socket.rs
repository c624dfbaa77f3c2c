use std::fmt;
use std::io::{self, Read};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Type};

/// Closed set of socket failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketErrorKind {
    CreateFailed,
    BindFailed,
    ListenFailed,
    AcceptFailed,
    ConnectFailed,
    SendFailed,
    RecvFailed,
    /// The peer closed the connection (orderly EOF or reset).
    ConnectionClosed,
    /// A non-blocking operation could not complete yet.
    WouldBlock,
    InvalidArgument,
}

impl fmt::Display for SocketErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A socket failure: kind, message and the OS error code when there is one.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct SocketError {
    kind: SocketErrorKind,
    message: String,
    os_code: Option<i32>,
}

impl SocketError {
    pub fn new(kind: SocketErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            os_code: None,
        }
    }

    /// Classify an I/O error raised while performing `kind`.
    ///
    /// `WouldBlock`/`TimedOut` and peer resets are reported with their own
    /// kinds regardless of the operation.
    pub(crate) fn from_io(kind: SocketErrorKind, err: &io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => SocketErrorKind::WouldBlock,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
                if matches!(kind, SocketErrorKind::SendFailed | SocketErrorKind::RecvFailed) =>
            {
                SocketErrorKind::ConnectionClosed
            }
            _ => kind,
        };
        Self {
            kind,
            message: err.to_string(),
            os_code: err.raw_os_error(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> SocketErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub const fn os_code(&self) -> Option<i32> {
        self.os_code
    }

    #[must_use]
    pub const fn is_would_block(&self) -> bool {
        matches!(self.kind, SocketErrorKind::WouldBlock)
    }
}

type SocketResult<T> = std::result::Result<T, SocketError>;

/// IP address family of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    #[must_use]
    pub const fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    const fn domain(self) -> Domain {
        match self {
            AddressFamily::Ipv4 => Domain::IPV4,
            AddressFamily::Ipv6 => Domain::IPV6,
        }
    }
}

/// A TCP socket.
///
/// Sockets start out blocking. After [`Socket::close`] every operation fails
/// with [`SocketErrorKind::InvalidArgument`].
#[derive(Debug)]
pub struct Socket {
    inner: Option<socket2::Socket>,
    family: AddressFamily,
}

impl Socket {
    /// Create an unbound TCP socket.
    ///
    /// # Errors
    ///
    /// `CreateFailed` if the OS refuses the socket.
    pub fn create(family: AddressFamily) -> SocketResult<Self> {
        let inner = socket2::Socket::new(family.domain(), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| SocketError::from_io(SocketErrorKind::CreateFailed, &e))?;
        Ok(Self {
            inner: Some(inner),
            family,
        })
    }

    fn from_accepted(inner: socket2::Socket, peer: &SocketAddr) -> Self {
        Self {
            inner: Some(inner),
            family: AddressFamily::of(&peer.ip()),
        }
    }

    fn inner(&self) -> SocketResult<&socket2::Socket> {
        self.inner
            .as_ref()
            .ok_or_else(|| SocketError::new(SocketErrorKind::InvalidArgument, "socket is closed"))
    }

    fn resolve(&self, address: &str, port: u16, kind: SocketErrorKind) -> SocketResult<SockAddr> {
        let ip: IpAddr = address.parse().map_err(|_| {
            SocketError::new(
                SocketErrorKind::InvalidArgument,
                format!("not an IP address: {address}"),
            )
        })?;
        if AddressFamily::of(&ip) != self.family {
            return Err(SocketError::new(
                kind,
                format!("{address} does not match socket family {:?}", self.family),
            ));
        }
        Ok(SockAddr::from(SocketAddr::new(ip, port)))
    }

    #[must_use]
    pub const fn family(&self) -> AddressFamily {
        self.family
    }

    /// Bind to `address:port`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a non-IP address, `BindFailed` otherwise.
    pub fn bind(&self, address: &str, port: u16) -> SocketResult<()> {
        let addr = self.resolve(address, port, SocketErrorKind::BindFailed)?;
        self.inner()?
            .bind(&addr)
            .map_err(|e| SocketError::from_io(SocketErrorKind::BindFailed, &e))
    }

    /// Start listening.
    ///
    /// # Errors
    ///
    /// `ListenFailed` if the socket cannot listen.
    pub fn listen(&self, backlog: i32) -> SocketResult<()> {
        self.inner()?
            .listen(backlog)
            .map_err(|e| SocketError::from_io(SocketErrorKind::ListenFailed, &e))
    }

    /// Accept one pending connection.
    ///
    /// # Errors
    ///
    /// `WouldBlock` on a non-blocking socket with nothing pending,
    /// `AcceptFailed` otherwise.
    pub fn accept(&self) -> SocketResult<(Socket, SocketAddr)> {
        let (inner, addr) = self
            .inner()?
            .accept()
            .map_err(|e| SocketError::from_io(SocketErrorKind::AcceptFailed, &e))?;
        let peer = addr.as_socket().ok_or_else(|| {
            SocketError::new(SocketErrorKind::AcceptFailed, "peer is not an IP address")
        })?;
        Ok((Socket::from_accepted(inner, &peer), peer))
    }

    /// Connect to `address:port`, blocking until established.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a non-IP address, `ConnectFailed` otherwise.
    pub fn connect(&self, address: &str, port: u16) -> SocketResult<()> {
        let addr = self.resolve(address, port, SocketErrorKind::ConnectFailed)?;
        self.inner()?
            .connect(&addr)
            .map_err(|e| SocketError::from_io(SocketErrorKind::ConnectFailed, &e))
    }

    /// Send some of `bytes`, returning how many were written.
    ///
    /// # Errors
    ///
    /// `WouldBlock`, `ConnectionClosed` or `SendFailed`.
    pub fn send(&self, bytes: &[u8]) -> SocketResult<usize> {
        let inner = self.inner()?;
        loop {
            match inner.send(bytes) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SocketError::from_io(SocketErrorKind::SendFailed, &e)),
            }
        }
    }

    /// Send all of `bytes`.
    ///
    /// # Errors
    ///
    /// As [`Socket::send`]; a zero-length write is `SendFailed`.
    pub fn send_all(&self, mut bytes: &[u8]) -> SocketResult<()> {
        while !bytes.is_empty() {
            let n = self.send(bytes)?;
            if n == 0 {
                return Err(SocketError::new(SocketErrorKind::SendFailed, "wrote zero bytes"));
            }
            bytes = &bytes[n..];
        }
        Ok(())
    }

    /// Receive up to `max` bytes.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` on EOF, `WouldBlock` when nothing is available on a
    /// non-blocking socket (or the read timeout elapsed), `RecvFailed` otherwise.
    pub fn recv(&self, max: usize) -> SocketResult<Vec<u8>> {
        let mut inner = self.inner()?;
        let mut buf = vec![0u8; max];
        loop {
            match Read::read(&mut inner, &mut buf) {
                Ok(0) if max > 0 => {
                    return Err(SocketError::new(
                        SocketErrorKind::ConnectionClosed,
                        "connection closed by peer",
                    ));
                }
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(buf);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SocketError::from_io(SocketErrorKind::RecvFailed, &e)),
            }
        }
    }

    /// Switch between blocking and non-blocking mode.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the OS rejects the option.
    pub fn set_blocking(&self, blocking: bool) -> SocketResult<()> {
        self.inner()?
            .set_nonblocking(!blocking)
            .map_err(|e| SocketError::from_io(SocketErrorKind::InvalidArgument, &e))
    }

    /// Toggle `SO_REUSEADDR`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the OS rejects the option.
    pub fn set_reuse_address(&self, reuse: bool) -> SocketResult<()> {
        self.inner()?
            .set_reuse_address(reuse)
            .map_err(|e| SocketError::from_io(SocketErrorKind::InvalidArgument, &e))
    }

    /// Bound blocking reads; `None` waits forever.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero duration or if the OS rejects the option.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> SocketResult<()> {
        self.inner()?
            .set_read_timeout(timeout)
            .map_err(|e| SocketError::from_io(SocketErrorKind::InvalidArgument, &e))
    }

    /// IP address of the connected peer.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the socket is not connected.
    pub fn remote_address(&self) -> SocketResult<String> {
        self.peer_addr().map(|addr| addr.ip().to_string())
    }

    /// Full address of the connected peer.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the socket is not connected.
    pub fn peer_addr(&self) -> SocketResult<SocketAddr> {
        let addr = self
            .inner()?
            .peer_addr()
            .map_err(|e| SocketError::from_io(SocketErrorKind::InvalidArgument, &e))?;
        addr.as_socket()
            .ok_or_else(|| SocketError::new(SocketErrorKind::InvalidArgument, "peer is not an IP address"))
    }

    /// Address this socket is bound to.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the socket is not bound.
    pub fn local_address(&self) -> SocketResult<SocketAddr> {
        let addr = self
            .inner()?
            .local_addr()
            .map_err(|e| SocketError::from_io(SocketErrorKind::InvalidArgument, &e))?;
        addr.as_socket()
            .ok_or_else(|| SocketError::new(SocketErrorKind::InvalidArgument, "not bound to an IP address"))
    }

    /// Shut down and release the socket. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(inner) = self.inner.take() {
            // Listening and never-connected sockets report NotConnected here.
            let _ = inner.shutdown(Shutdown::Both);
        }
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Hand the connected socket over as a standard library stream.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the socket was closed.
    pub fn into_std(mut self) -> SocketResult<TcpStream> {
        let inner = self
            .inner
            .take()
            .ok_or_else(|| SocketError::new(SocketErrorKind::InvalidArgument, "socket is closed"))?;
        Ok(inner.into())
    }

    /// Whether `address:port` can currently be bound.
    #[must_use]
    pub fn is_port_available(port: u16, address: &str) -> bool {
        let Ok(ip) = address.parse::<IpAddr>() else {
            return false;
        };
        match Socket::create(AddressFamily::of(&ip)) {
            Ok(mut probe) => {
                let available = probe.bind(address, port).is_ok();
                probe.close();
                available
            }
            Err(_) => false,
        }
    }

    #[must_use]
    pub fn is_ipv4(address: &str) -> bool {
        super::is_ipv4(address)
    }

    #[must_use]
    pub fn is_ipv6(address: &str) -> bool {
        super::is_ipv6(address)
    }
}
