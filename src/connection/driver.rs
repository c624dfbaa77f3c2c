use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, trace};

use super::ConnectionState;
use crate::admission::AdmissionPermit;
use crate::codec::WebSocketCodec;
use crate::config::ServerConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::message::{CloseCode, Message};
use crate::protocol::{Frame, HandshakeResponse, OpCode, UpgradeRequest, validate_request};
use crate::server::{Handler, client_ip};

/// Runs `fut`, failing with `Error::Timeout` once `limit` elapses.
async fn within<T>(
    limit: Option<Duration>,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(format!("{what} timed out after {limit:?}")))?,
        None => fut.await,
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Drives one accepted connection from the upgrade request to `Closed`.
///
/// The driver owns the stream and the connection's admission permit; the
/// permit is released when the driver reaches `Closed`, before
/// `on_disconnect` fires.
pub struct ConnectionDriver<T> {
    codec: WebSocketCodec<T>,
    state: ConnectionState,
    peer: SocketAddr,
    client_ip: String,
    permit: Option<AdmissionPermit>,
    handler: Arc<dyn Handler>,
    config: Arc<ServerConfig>,
    shutdown: watch::Receiver<bool>,
    connected: bool,
}

impl<T> ConnectionDriver<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    #[must_use]
    pub fn new(
        io: T,
        peer: SocketAddr,
        config: Arc<ServerConfig>,
        handler: Arc<dyn Handler>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            codec: WebSocketCodec::new(io, config.limits),
            state: ConnectionState::default(),
            peer,
            client_ip: peer.ip().to_string(),
            permit: None,
            handler,
            config,
            shutdown,
            connected: false,
        }
    }

    /// Attach the admission taken for this connection when it was accepted.
    #[must_use]
    pub fn with_permit(mut self, permit: AdmissionPermit) -> Self {
        self.client_ip = permit.ip().to_string();
        self.permit = Some(permit);
        self
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The identifier callbacks see for this connection.
    #[must_use]
    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    /// Serve the connection to completion.
    pub async fn run(mut self) {
        match self.serve().await {
            Ok(()) => debug!(client_ip = %self.client_ip, peer = %self.peer, "connection closed"),
            Err(e) if e.kind() == ErrorKind::PeerClosed => {
                debug!(client_ip = %self.client_ip, peer = %self.peer, "peer went away");
            }
            Err(e) => {
                debug!(client_ip = %self.client_ip, peer = %self.peer, error = %e, "connection failed");
                self.handler.on_error(&self.client_ip, &e);
            }
        }
        self.finish().await;
    }

    fn transition(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {next}",
            self.state
        );
        trace!(client_ip = %self.client_ip, from = %self.state, to = %next, "state change");
        self.state = next;
    }

    async fn finish(&mut self) {
        self.transition(ConnectionState::Closed);
        let _ = self.codec.shutdown().await;
        drop(self.permit.take());
        if self.connected {
            self.handler.on_disconnect(&self.client_ip);
        }
    }

    async fn serve(&mut self) -> Result<()> {
        let policy = self.config.handshake_policy();
        let limit = self.config.timeouts.handshake;

        let read = tokio::select! {
            biased;
            () = stopped(&mut self.shutdown) => return Ok(()),
            read = within(limit, "handshake", self.codec.read_request()) => read,
        };
        let head = match read {
            Ok(head) => head,
            Err(e) => return self.reject(e).await,
        };

        self.transition(ConnectionState::Handshaking);
        let request = match validate_request(&head, &policy) {
            Ok(request) => request,
            Err(e) => return self.reject(e).await,
        };
        if let Err(e) = self.reidentify(&request) {
            return self.reject(e).await;
        }

        let response = HandshakeResponse::from_request(&request);
        self.codec.write_raw(&response.to_bytes()).await?;
        self.codec.flush().await?;

        self.transition(ConnectionState::Open);
        self.connected = true;
        debug!(client_ip = %self.client_ip, target = %request.target, "upgrade complete");
        self.handler.on_connect(&self.client_ip);

        self.message_loop().await
    }

    /// Re-account the connection under its proxied client address.
    fn reidentify(&mut self, request: &UpgradeRequest) -> Result<()> {
        let identified = client_ip::identify(self.peer.ip(), &request.headers);
        if identified == self.client_ip {
            return Ok(());
        }
        if let Some(permit) = self.permit.as_mut() {
            let decision = permit.transfer(&identified);
            if !decision.is_admitted() {
                return Err(Error::AdmissionRefused(decision));
            }
        }
        debug!(peer = %self.peer, client_ip = %identified, "client identified via proxy headers");
        self.client_ip = identified;
        Ok(())
    }

    /// Answer a failed handshake with its HTTP status, if it has one.
    async fn reject(&mut self, err: Error) -> Result<()> {
        let answer = match &err {
            Error::AdmissionRefused(_) => self.config.reject_with_status,
            _ => true,
        };
        if let Some(status) = err.http_status().filter(|_| answer) {
            debug!(client_ip = %self.client_ip, %status, error = %err, "handshake rejected");
            if self.codec.write_raw(&status.error_response()).await.is_ok() {
                let _ = self.codec.flush().await;
            }
        }
        Err(err)
    }

    async fn message_loop(&mut self) -> Result<()> {
        let idle = self.config.timeouts.idle;
        while self.state == ConnectionState::Open {
            let next = tokio::select! {
                biased;
                () = stopped(&mut self.shutdown) => {
                    return self.close_with(CloseCode::GoingAway, "Server shutting down").await;
                }
                next = within(idle, "idle", self.codec.read_frame()) => next,
            };
            match next {
                Ok(frame) => self.dispatch(frame).await?,
                Err(e @ Error::Timeout(_)) => {
                    self.close_with(CloseCode::GoingAway, "Idle timeout").await?;
                    return Err(e);
                }
                Err(e) => return self.fail(e).await,
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<()> {
        let opcode = frame.opcode;
        let message = match Message::from_frame(frame) {
            Ok(message) => message,
            Err(e) if opcode == OpCode::Close => {
                // The peer is already closing, so there is nothing to drain.
                let code = e.close_code().unwrap_or(CloseCode::ProtocolError);
                self.transition(ConnectionState::Closing);
                let _ = self.send(&Frame::close(Some(code.as_u16()), "")).await;
                self.transition(ConnectionState::Closed);
                return Err(e);
            }
            Err(e) => return self.fail(e).await,
        };

        match message {
            Message::Text(text) => {
                if let Some(reply) = self.handler.on_message(&self.client_ip, &text) {
                    self.send(&Frame::text(reply)).await?;
                }
            }
            Message::Binary(data) => {
                if let Some(reply) = self.handler.on_binary(&self.client_ip, &data) {
                    self.send(&Frame::binary(reply)).await?;
                }
            }
            Message::Ping(data) => self.send(&Frame::pong(data)).await?,
            Message::Pong(_) => {}
            Message::Close(close) => {
                debug!(
                    client_ip = %self.client_ip,
                    code = close.as_ref().map(|c| c.code.as_u16()),
                    "peer closed"
                );
                self.transition(ConnectionState::Closing);
                let _ = self.send(&Frame::from(Message::Close(close))).await;
                self.transition(ConnectionState::Closed);
            }
        }
        Ok(())
    }

    /// Close with the code matching `err`, then report it.
    async fn fail(&mut self, err: Error) -> Result<()> {
        if let Some(code) = err.close_code() {
            debug!(client_ip = %self.client_ip, code = code.as_u16(), error = %err, "closing on protocol error");
            if let Err(close_err) = self.close_with(code, "").await {
                trace!(client_ip = %self.client_ip, error = %close_err, "close handshake failed");
            }
        }
        Err(err)
    }

    /// Send a Close frame and drain the peer's until it answers or the close timeout expires.
    async fn close_with(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        if !self.state.can_send() {
            return Ok(());
        }
        self.transition(ConnectionState::Closing);
        self.send(&Frame::from(Message::close(code, reason))).await?;

        let limit = self.config.timeouts.close;
        let drain = async {
            loop {
                match self.codec.read_frame().await {
                    Ok(frame) if frame.opcode == OpCode::Close => return,
                    Ok(_) => {}
                    Err(_) => return,
                }
            }
        };
        if tokio::time::timeout(limit, drain).await.is_err() {
            debug!(client_ip = %self.client_ip, "peer did not answer close");
        }
        self.transition(ConnectionState::Closed);
        Ok(())
    }

    async fn send(&mut self, frame: &Frame) -> Result<()> {
        self.codec.write_frame(frame).await?;
        self.codec.flush().await
    }
}
