//! Server-side connection lifecycle.
//!
//! Every accepted connection is run by a [`ConnectionDriver`], which reads
//! the upgrade request, answers it, and exchanges frames until the close
//! handshake finishes.
//!
//! ## Connection Lifecycle
//!
//! 1. **AwaitingRequest** - Admitted, reading the HTTP upgrade request
//! 2. **Handshaking** - Validating the request and answering it
//! 3. **Open** - Upgrade complete, frames flow both ways
//! 4. **Closing** - Close frame sent or received
//! 5. **Closed** - Admission released, `on_disconnect` delivered
//!
//! ## Example
//!
//! ```rust,ignore
//! use wsgate::{Callbacks, ConnectionDriver, ServerConfig};
//!
//! let (stream, peer) = listener.accept().await?;
//! let handler = Arc::new(Callbacks::new().on_message(|_, text| Some(text.to_string())));
//! let driver = ConnectionDriver::new(stream, peer, Arc::new(ServerConfig::default()), handler, shutdown_rx);
//! tokio::spawn(driver.run());
//! ```

mod state;

pub use state::ConnectionState;

#[cfg(feature = "async-tokio")]
mod driver;

#[cfg(feature = "async-tokio")]
pub use driver::ConnectionDriver;
