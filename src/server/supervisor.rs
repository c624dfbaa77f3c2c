use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{Callbacks, Handler};
use crate::admission::{AdmissionController, AdmissionPermit};
use crate::config::ServerConfig;
use crate::connection::ConnectionDriver;
use crate::error::{Error, Result};
use crate::http::StatusCode;
use crate::net::{AddressFamily, Socket};

/// Pause between accept attempts while the listener has nothing pending.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServerState {
    #[default]
    Stopped,
    Running,
}

/// Requests that a [`Server::run`] loop stop.
///
/// The flag is cleared each time the server starts.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Decrements the live connection count when a driver task ends.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(count))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Everything that exists only between `start` and `stop`.
struct Running {
    listener: Socket,
    local_addr: SocketAddr,
    config: Arc<ServerConfig>,
    handler: Arc<dyn Handler>,
    admission: Arc<AdmissionController>,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

/// WebSocket server supervisor.
///
/// Configuration and handler registration are only accepted while the server
/// is stopped. Connections run as Tokio tasks; dropping a running server
/// aborts them without a close handshake, so call [`Server::stop`] first.
pub struct Server {
    config: ServerConfig,
    callbacks: Callbacks,
    handler: Option<Arc<dyn Handler>>,
    running: Option<Running>,
    active: Arc<AtomicUsize>,
    stop_requested: Arc<watch::Sender<bool>>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("connections", &self.current_connection_count())
            .finish_non_exhaustive()
    }
}

impl Server {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    #[must_use]
    pub fn with_config(config: ServerConfig) -> Self {
        let (stop_requested, _) = watch::channel(false);
        Self {
            config,
            callbacks: Callbacks::new(),
            handler: None,
            running: None,
            active: Arc::new(AtomicUsize::new(0)),
            stop_requested: Arc::new(stop_requested),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        if self.running.is_some() {
            ServerState::Running
        } else {
            ServerState::Stopped
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Live connection tasks, whether or not admission control is enabled.
    #[must_use]
    pub fn current_connection_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// The bound listening address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// The admission controller of the current run.
    #[must_use]
    pub fn admission(&self) -> Option<&Arc<AdmissionController>> {
        self.running.as_ref().map(|running| &running.admission)
    }

    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.stop_requested),
        }
    }

    fn configure(&mut self, apply: impl FnOnce(&mut Self)) -> Result<()> {
        if self.is_running() {
            return Err(Error::InvalidArgument(
                "cannot reconfigure a running server".into(),
            ));
        }
        apply(self);
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<()> {
        self.configure(|s| s.config.port = port)
    }

    pub fn set_bind_address(&mut self, address: impl Into<String>) -> Result<()> {
        let address = address.into();
        self.configure(|s| s.config.bind_address = address)
    }

    pub fn enable_security(&mut self, enabled: bool) -> Result<()> {
        self.configure(|s| s.config.security_enabled = enabled)
    }

    pub fn set_max_connections(&mut self, max: usize) -> Result<()> {
        self.configure(|s| s.config.max_connections = max)
    }

    pub fn set_max_connections_per_ip(&mut self, max: usize) -> Result<()> {
        self.configure(|s| s.config.max_connections_per_ip = max)
    }

    pub fn set_max_connections_per_minute(&mut self, max: usize) -> Result<()> {
        self.configure(|s| s.config.max_connections_per_minute = max)
    }

    /// Replace the whole configuration.
    pub fn set_config(&mut self, config: ServerConfig) -> Result<()> {
        self.configure(|s| s.config = config)
    }

    /// Use `handler` instead of the registered closures.
    pub fn set_handler(&mut self, handler: impl Handler) -> Result<()> {
        let handler: Arc<dyn Handler> = Arc::new(handler);
        self.configure(|s| s.handler = Some(handler))
    }

    fn register(&mut self, update: impl FnOnce(Callbacks) -> Callbacks) -> Result<()> {
        self.configure(|s| s.callbacks = update(std::mem::take(&mut s.callbacks)))
    }

    pub fn on_connect(&mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Result<()> {
        self.register(|c| c.on_connect(f))
    }

    pub fn on_message(
        &mut self,
        f: impl Fn(&str, &str) -> Option<String> + Send + Sync + 'static,
    ) -> Result<()> {
        self.register(|c| c.on_message(f))
    }

    pub fn on_binary(
        &mut self,
        f: impl Fn(&str, &[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) -> Result<()> {
        self.register(|c| c.on_binary(f))
    }

    pub fn on_disconnect(&mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Result<()> {
        self.register(|c| c.on_disconnect(f))
    }

    pub fn on_error(&mut self, f: impl Fn(&str, &Error) + Send + Sync + 'static) -> Result<()> {
        self.register(|c| c.on_error(f))
    }

    /// Bind and listen, moving to `Running`.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidArgument` if already running or the configuration is invalid
    /// - `Error::Socket` if the socket cannot be created, bound or put into listening mode
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(Error::InvalidArgument("server is already running".into()));
        }
        self.config.validate()?;

        let family = if Socket::is_ipv6(&self.config.bind_address) {
            AddressFamily::Ipv6
        } else {
            AddressFamily::Ipv4
        };
        let listener = Socket::create(family)?;
        listener.set_reuse_address(true)?;
        listener.bind(&self.config.bind_address, self.config.port)?;
        listener.listen(self.config.backlog)?;
        listener.set_blocking(false)?;
        let local_addr = listener.local_address()?;

        let handler = self
            .handler
            .clone()
            .unwrap_or_else(|| Arc::new(self.callbacks.clone()));
        let (shutdown, _) = watch::channel(false);
        self.stop_requested.send_replace(false);
        self.running = Some(Running {
            listener,
            local_addr,
            config: Arc::new(self.config.clone()),
            handler,
            admission: Arc::new(AdmissionController::from_config(&self.config)),
            shutdown,
            tasks: JoinSet::new(),
        });
        info!(
            address = %local_addr,
            security = self.config.security_enabled,
            "server listening"
        );
        Ok(())
    }

    /// Accept at most one pending connection without blocking.
    ///
    /// Returns `Ok(true)` if a connection was accepted (admitted or refused)
    /// and `Ok(false)` if none was pending.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidArgument` if the server is stopped or no Tokio runtime is current
    /// - `Error::Socket` with `AcceptFailed` if accepting failed; the server keeps running
    pub fn process_events(&mut self) -> Result<bool> {
        let Some(running) = self.running.as_mut() else {
            return Err(Error::InvalidArgument("server is not running".into()));
        };
        let runtime = Handle::try_current().map_err(|_| {
            Error::InvalidArgument("process_events requires a Tokio runtime".into())
        })?;

        while let Some(finished) = running.tasks.try_join_next() {
            if let Err(e) = finished {
                warn!(error = %e, "connection task failed");
            }
        }

        let (socket, peer) = match running.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.is_would_block() => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let permit = match running.admission.admit(&peer.ip().to_string()) {
            Ok(permit) => permit,
            Err(e) => {
                refuse(socket, running.config.reject_with_status, &e);
                return Ok(true);
            }
        };
        spawn_driver(running, &self.active, &runtime, socket, peer, permit)?;
        Ok(true)
    }

    /// Stop accepting, close every connection with 1001 and wait for them to finish.
    pub async fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.listener.close();
        running.shutdown.send_replace(true);
        while let Some(finished) = running.tasks.join_next().await {
            if let Err(e) = finished {
                warn!(error = %e, "connection task failed");
            }
        }
        info!(address = %running.local_addr, "server stopped");
    }

    /// Start if needed, then accept connections until the [`ShutdownHandle`] fires.
    ///
    /// # Errors
    ///
    /// Returns the error from [`Server::start`].
    pub async fn run(&mut self) -> Result<()> {
        if !self.is_running() {
            self.start()?;
        }
        let mut stop = self.stop_requested.subscribe();
        while !*stop.borrow_and_update() {
            match self.process_events() {
                Ok(true) => {
                    tokio::task::yield_now().await;
                    continue;
                }
                Ok(false) => {}
                Err(e) => warn!(error = %e, "accept failed"),
            }
            tokio::select! {
                _ = stop.changed() => {}
                () = tokio::time::sleep(ACCEPT_POLL_INTERVAL) => {}
            }
        }
        self.stop().await;
        Ok(())
    }
}

fn refuse(mut socket: Socket, reply: bool, reason: &Error) {
    debug!(peer = ?socket.peer_addr().ok(), error = %reason, "connection refused");
    if reply {
        let _ = socket.send_all(&StatusCode::TooManyRequests.error_response());
    }
    socket.close();
}

fn spawn_driver(
    running: &mut Running,
    active: &Arc<AtomicUsize>,
    runtime: &Handle,
    socket: Socket,
    peer: SocketAddr,
    permit: AdmissionPermit,
) -> Result<()> {
    socket.set_blocking(false)?;
    let stream = {
        let _entered = runtime.enter();
        tokio::net::TcpStream::from_std(socket.into_std()?)?
    };
    let driver = ConnectionDriver::new(
        stream,
        peer,
        Arc::clone(&running.config),
        Arc::clone(&running.handler),
        running.shutdown.subscribe(),
    )
    .with_permit(permit);

    let guard = ActiveGuard::new(active);
    running.tasks.spawn_on(
        async move {
            let _guard = guard;
            driver.run().await;
        },
        runtime,
    );
    debug!(%peer, "connection accepted");
    Ok(())
}
