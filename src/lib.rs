//! # wsgate - RFC 6455 WebSocket server with admission control
//!
//! `wsgate` accepts WebSocket clients on a TCP port, vets every connection
//! through a per-IP admission controller, and hands messages to application
//! callbacks. It also ships a small synchronous HTTP/1.1 client built on the
//! same socket layer.
//!
//! ## Features
//!
//! - **Strict RFC 6455 handshake and framing**: masked client frames, control
//!   frame rules, close codes, UTF-8 checks
//! - **Admission control**: global, per-IP and per-minute connection limits,
//!   with client identification behind reverse proxies
//! - **Tokio-based supervisor** with one task per connection and a clean
//!   shutdown path
//! - **HTTP/1.1 client** for `http://` URLs, including chunked responses
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wsgate::Server;
//!
//! #[tokio::main]
//! async fn main() -> wsgate::Result<()> {
//!     let mut server = Server::new();
//!     server.set_port(8080)?;
//!     server.enable_security(true)?;
//!     server.on_message(|_ip, text| Some(format!("Echo: {text}")))?;
//!     server.run().await
//! }
//! ```

pub mod admission;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod message;
pub mod net;
pub mod protocol;
pub mod server;

#[cfg(feature = "async-tokio")]
pub mod codec;

pub use admission::{Admission, AdmissionController, AdmissionLimits, AdmissionPermit};
pub use config::{Limits, ServerConfig, Timeouts};
pub use connection::ConnectionState;
pub use error::{Error, ErrorKind, Result};
pub use http::{Headers, HttpClient, HttpResponse, StatusCode};
pub use message::{CloseCode, CloseFrame, Message};
pub use net::{AddressFamily, Socket, SocketError, SocketErrorKind};
pub use protocol::{
    Frame, HandshakePolicy, HandshakeResponse, OpCode, UpgradeRequest, WS_GUID,
    compute_accept_key, validate_request,
};
pub use server::{Callbacks, Handler};

#[cfg(feature = "async-tokio")]
pub use codec::WebSocketCodec;
#[cfg(feature = "async-tokio")]
pub use connection::ConnectionDriver;
#[cfg(feature = "async-tokio")]
pub use server::{Server, ServerState, ShutdownHandle};
