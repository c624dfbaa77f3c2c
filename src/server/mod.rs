//! The server supervisor.
//!
//! [`Server`] owns the listening socket, runs admission on every accepted
//! connection and hands admitted ones to a [`ConnectionDriver`] task.
//!
//! ```rust,no_run
//! use wsgate::Server;
//!
//! # async fn serve() -> wsgate::Result<()> {
//! let mut server = Server::new();
//! server.set_port(9001)?;
//! server.on_message(|_ip, text| Some(format!("Echo: {text}")))?;
//! server.run().await
//! # }
//! ```
//!
//! [`ConnectionDriver`]: crate::ConnectionDriver

pub mod client_ip;
mod handler;

pub use handler::{Callbacks, Handler};

#[cfg(feature = "async-tokio")]
mod supervisor;

#[cfg(feature = "async-tokio")]
pub use supervisor::{Server, ServerState, ShutdownHandle};
