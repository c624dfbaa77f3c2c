use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::http::find_header_end;
use crate::protocol::Frame;
use crate::protocol::frame::parse_header;
use crate::protocol::validation::FrameValidator;

const READ_CHUNK: usize = 4096;

/// Server-side byte stream coder: the upgrade request first, frames after.
///
/// Bytes read past the end of the request stay buffered and feed the frame
/// decoder. Reads go through `read_buf`, so a read future dropped by
/// `select!` loses no data.
pub struct WebSocketCodec<T> {
    io: T,
    read_buf: BytesMut,
    write_buf: BytesMut,
    limits: Limits,
    validator: FrameValidator,
}

impl<T> WebSocketCodec<T> {
    #[must_use]
    pub fn new(io: T, limits: Limits) -> Self {
        Self {
            io,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::with_capacity(READ_CHUNK),
            limits,
            validator: FrameValidator::new(limits),
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.io
    }

    #[must_use]
    pub fn into_inner(self) -> T {
        self.io
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> WebSocketCodec<T> {
    async fn fill(&mut self, additional: usize) -> Result<()> {
        self.read_buf.reserve(additional.max(READ_CHUNK));
        let n = self.io.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed(None));
        }
        Ok(())
    }

    /// Read the HTTP request head, through the blank line.
    ///
    /// # Errors
    ///
    /// - `Error::RequestTooLarge` once the head is known to exceed
    ///   `limits.max_request_size`
    /// - `Error::ConnectionClosed` if the peer closes first
    pub async fn read_request(&mut self) -> Result<Bytes> {
        loop {
            if let Some(end) = find_header_end(&self.read_buf) {
                self.limits.check_request_size(end)?;
                return Ok(self.read_buf.split_to(end).freeze());
            }
            self.limits.check_request_size(self.read_buf.len())?;
            self.fill(READ_CHUNK).await?;
        }
    }

    /// Read the next complete frame.
    ///
    /// The header is validated as soon as it is decodable, so a frame that is
    /// unmasked, oversized or otherwise invalid is rejected before its payload
    /// is buffered.
    ///
    /// # Errors
    ///
    /// - Validation errors from [`FrameValidator`]
    /// - Decoding errors from [`Frame::parse`]
    /// - `Error::ConnectionClosed` on EOF, including mid-frame
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            let mut needed = READ_CHUNK;
            match parse_header(&self.read_buf) {
                Ok(header) => {
                    self.validator.validate_header(&header)?;
                    match Frame::parse(&self.read_buf) {
                        Ok((frame, consumed)) => {
                            self.read_buf.advance(consumed);
                            return Ok(frame);
                        }
                        Err(Error::IncompleteFrame { needed: missing }) => needed = missing,
                        Err(e) => return Err(e),
                    }
                }
                Err(Error::IncompleteFrame { .. }) => {}
                Err(e) => return Err(e),
            }
            self.fill(needed).await?;
        }
    }

    /// Write one unmasked frame.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let wire_size = frame.wire_size();
        self.write_buf.clear();
        self.write_buf.resize(wire_size, 0);

        let written = frame.write(&mut self.write_buf)?;
        self.io.write_all(&self.write_buf[..written]).await?;
        Ok(())
    }

    /// Write pre-encoded bytes such as an HTTP response.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.io.write_all(bytes).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.io.flush().await?;
        Ok(())
    }

    /// Shut down the write half.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}
