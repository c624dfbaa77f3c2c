//! Raw WebSocket client for driving the server over real sockets.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use wsgate::{Error, Frame, OpCode, Result};

use super::{SAMPLE_ACCEPT, masked, upgrade_request};

const MASK: [u8; 4] = [0x12, 0x34, 0x56, 0x78];
const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestClient {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
            buf: Vec::new(),
        })
    }

    /// Connect and send an upgrade request, returning the response head.
    pub async fn handshake(addr: SocketAddr, extra_headers: &[&str]) -> Result<(Self, String)> {
        let mut client = Self::connect(addr).await?;
        client
            .send_raw(upgrade_request(extra_headers).as_bytes())
            .await?;
        let head = client.read_head().await?;
        Ok((client, head))
    }

    /// Connect and complete the upgrade, failing unless the server answers 101.
    pub async fn open(addr: SocketAddr, extra_headers: &[&str]) -> Result<Self> {
        let (client, head) = Self::handshake(addr, extra_headers).await?;
        if !head.starts_with("HTTP/1.1 101 Switching Protocols\r\n")
            || !head.contains(&format!("Sec-WebSocket-Accept: {SAMPLE_ACCEPT}\r\n"))
        {
            return Err(Error::InvalidHandshake(head));
        }
        Ok(client)
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    pub async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        self.send_raw(&masked(&frame, MASK)).await
    }

    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send_frame(Frame::text(text)).await
    }

    async fn fill(&mut self) -> Result<usize> {
        let mut chunk = [0u8; 4096];
        let n = tokio::time::timeout(READ_TIMEOUT, self.stream.read(&mut chunk))
            .await
            .map_err(|_| Error::Timeout("test client read".into()))??;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Read an HTTP response head, through the blank line.
    pub async fn read_head(&mut self) -> Result<String> {
        loop {
            if let Some(end) = wsgate::http::find_header_end(&self.buf) {
                let head: Vec<u8> = self.buf.drain(..end).collect();
                return String::from_utf8(head).map_err(|_| Error::InvalidUtf8);
            }
            if self.fill().await? == 0 {
                return Err(Error::ConnectionClosed(None));
            }
        }
    }

    /// Read the next server frame; `None` once the server has closed the stream.
    pub async fn recv_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match Frame::parse(&self.buf) {
                Ok((frame, used)) => {
                    self.buf.drain(..used);
                    return Ok(Some(frame));
                }
                Err(Error::IncompleteFrame { .. }) => {
                    if self.fill().await? == 0 {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn recv_text(&mut self) -> Result<Option<String>> {
        match self.recv_frame().await? {
            Some(frame) if frame.opcode == OpCode::Text => {
                String::from_utf8(frame.into_payload())
                    .map(Some)
                    .map_err(|_| Error::InvalidUtf8)
            }
            Some(frame) => Err(Error::ProtocolViolation(format!(
                "expected text, got {:?}",
                frame.opcode
            ))),
            None => Ok(None),
        }
    }

    /// Wait for the server's Close frame and return its status code.
    pub async fn recv_close(&mut self) -> Result<Option<u16>> {
        loop {
            match self.recv_frame().await? {
                Some(frame) if frame.opcode == OpCode::Close => {
                    let payload = frame.payload();
                    return Ok((payload.len() >= 2)
                        .then(|| u16::from_be_bytes([payload[0], payload[1]])));
                }
                Some(_) => {}
                None => return Err(Error::ConnectionClosed(None)),
            }
        }
    }

    /// Start the close handshake and return the code the server echoes.
    pub async fn close(&mut self, code: u16) -> Result<Option<u16>> {
        self.send_frame(Frame::close(Some(code), "")).await?;
        self.recv_close().await
    }

    /// Answer a server-initiated close.
    pub async fn acknowledge_close(&mut self) -> Result<Option<u16>> {
        let code = self.recv_close().await?;
        self.send_frame(Frame::close(code, "")).await?;
        Ok(code)
    }

    /// Everything the server sends until it closes the stream.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        while self.fill().await? > 0 {}
        Ok(std::mem::take(&mut self.buf))
    }
}
