//! Minimal synchronous HTTP/1.1 client over the socket facade.
//!
//! Every request opens a fresh connection and sends `Connection: close`; the
//! response is read until the peer closes or the declared body length has
//! arrived. Only `http://` URLs are supported.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;
use url::{Host, Url};

use crate::error::{Error, Result};
use crate::http::find_header_end;
use crate::http::headers::{Headers, validate_header_value};
use crate::net::{AddressFamily, Socket, SocketError, SocketErrorKind};

const READ_CHUNK: usize = 8192;

/// A decoded HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// 2xx status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// The body as UTF-8 text.
    ///
    /// # Errors
    ///
    /// `Error::InvalidUtf8` if the body is not UTF-8.
    pub fn text(&self) -> Result<&str> {
        Ok(std::str::from_utf8(&self.body)?)
    }

    /// Decode a complete response.
    ///
    /// # Errors
    ///
    /// `Error::Http` for a malformed status line, headers or body framing.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header_end = find_header_end(data)
            .ok_or_else(|| Error::Http("response ended before the header block".into()))?;
        let head = std::str::from_utf8(&data[..header_end])
            .map_err(|_| Error::Http("response head is not UTF-8".into()))?;

        let mut lines = head.split("\r\n");
        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.") {
            return Err(Error::Http(format!("unexpected status line: {status_line}")));
        }
        let status: u16 = parts
            .next()
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| Error::Http(format!("invalid status code in: {status_line}")))?;
        let reason = parts.next().unwrap_or_default().to_string();

        let headers =
            Headers::parse_lines(lines).map_err(|e| Error::Http(format!("bad response header: {e}")))?;

        let raw_body = &data[header_end..];
        let body = if headers.contains_token("transfer-encoding", "chunked") {
            decode_chunked(raw_body)?
        } else if let Some(length) = content_length(&headers)? {
            if raw_body.len() < length {
                return Err(Error::Http(format!(
                    "body truncated: {} of {length} bytes",
                    raw_body.len()
                )));
            }
            raw_body[..length].to_vec()
        } else {
            raw_body.to_vec()
        };

        Ok(Self {
            status,
            reason,
            headers,
            body,
        })
    }
}

fn content_length(headers: &Headers) -> Result<Option<usize>> {
    headers
        .get("content-length")
        .map(|value| {
            value
                .parse()
                .map_err(|_| Error::Http(format!("invalid Content-Length: {value}")))
        })
        .transpose()
}

/// Decode a `Transfer-Encoding: chunked` body. Trailers are ignored.
fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line_end = data
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| Error::Http("chunk size line not terminated".into()))?;
        let size_line = std::str::from_utf8(&data[..line_end])
            .map_err(|_| Error::Http("chunk size is not ASCII".into()))?;
        let size_text = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_text, 16)
            .map_err(|_| Error::Http(format!("invalid chunk size: {size_text}")))?;
        data = &data[line_end + 2..];

        if size == 0 {
            return Ok(body);
        }
        let end = size
            .checked_add(2)
            .ok_or_else(|| Error::Http("chunk size too large".into()))?;
        if data.len() < end {
            return Err(Error::Http("chunk truncated".into()));
        }
        if &data[size..end] != b"\r\n" {
            return Err(Error::Http("chunk not followed by CRLF".into()));
        }
        body.extend_from_slice(&data[..size]);
        data = &data[end..];
    }
}

/// Whether `data` already holds a whole response, so reading can stop
/// before the peer closes.
fn response_complete(data: &[u8]) -> bool {
    let Some(header_end) = find_header_end(data) else {
        return false;
    };
    let Ok(head) = std::str::from_utf8(&data[..header_end]) else {
        return false;
    };
    let Ok(headers) = Headers::parse_lines(head.split("\r\n").skip(1)) else {
        return false;
    };
    let body = &data[header_end..];
    if headers.contains_token("transfer-encoding", "chunked") {
        decode_chunked(body).is_ok()
    } else {
        matches!(content_length(&headers), Ok(Some(length)) if body.len() >= length)
    }
}

/// Synchronous HTTP/1.1 client.
#[derive(Debug, Clone)]
pub struct HttpClient {
    user_agent: String,
    timeout: Option<Duration>,
    max_response_size: usize,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self {
            user_agent: concat!("wsgate/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Some(Duration::from_secs(30)),
            max_response_size: 16 * 1024 * 1024,
        }
    }
}

impl HttpClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `User-Agent` sent with every request.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Bound each blocking read; `None` waits forever.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Refuse responses larger than `max` bytes.
    #[must_use]
    pub const fn with_max_response_size(mut self, max: usize) -> Self {
        self.max_response_size = max;
        self
    }

    /// `GET url`.
    ///
    /// # Errors
    ///
    /// See [`HttpClient::request`].
    pub fn get(&self, url: &str) -> Result<HttpResponse> {
        self.request("GET", url, &Headers::new(), &[])
    }

    /// `POST url` with `body` of type `content_type`.
    ///
    /// # Errors
    ///
    /// See [`HttpClient::request`].
    pub fn post(&self, url: &str, body: &[u8], content_type: &str) -> Result<HttpResponse> {
        let mut headers = Headers::new();
        headers.insert("Content-Type", content_type);
        self.request("POST", url, &headers, body)
    }

    /// Send one request and read the whole response.
    ///
    /// `Host`, `User-Agent`, `Connection` and `Content-Length` are always set
    /// by the client; caller headers with those names are ignored.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidArgument` for an unparsable or non-`http` URL
    /// - `Error::InvalidHeaderValue` if a header value contains CR/LF
    /// - `Error::Socket` if the host cannot be resolved or reached
    /// - `Error::Timeout` if a read exceeds the configured timeout
    /// - `Error::Http` for a malformed or oversized response
    pub fn request(
        &self,
        method: &str,
        url: &str,
        headers: &Headers,
        body: &[u8],
    ) -> Result<HttpResponse> {
        let url = Url::parse(url).map_err(|e| Error::InvalidArgument(format!("invalid URL {url}: {e}")))?;
        match url.scheme() {
            "http" => {}
            "https" => return Err(Error::InvalidArgument("https is not supported".into())),
            other => return Err(Error::InvalidArgument(format!("unsupported scheme: {other}"))),
        }
        if method.is_empty() || method.contains(|c: char| !c.is_ascii_uppercase()) {
            return Err(Error::InvalidArgument(format!("invalid method: {method}")));
        }

        let request = self.encode_request(method, &url, headers, body)?;
        let socket = self.connect(&url)?;
        debug!(method, url = %url, bytes = request.len(), "sending HTTP request");
        socket.send_all(&request)?;

        let raw = self.read_response(&socket)?;
        let response = HttpResponse::parse(&raw)?;
        debug!(status = response.status, bytes = response.body.len(), "received HTTP response");
        Ok(response)
    }

    fn encode_request(&self, method: &str, url: &Url, headers: &Headers, body: &[u8]) -> Result<Vec<u8>> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidArgument(format!("URL has no host: {url}")))?;
        let host_header = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let target = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        };

        validate_header_value("User-Agent", &self.user_agent)?;
        let mut head = format!(
            "{method} {target} HTTP/1.1\r\nHost: {host_header}\r\nUser-Agent: {}\r\nConnection: close\r\n",
            self.user_agent
        );
        for (name, value) in headers.iter() {
            if ["host", "user-agent", "connection", "content-length"]
                .iter()
                .any(|reserved| reserved.eq_ignore_ascii_case(name))
            {
                continue;
            }
            validate_header_value(name, value)?;
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        if !body.is_empty() || matches!(method, "POST" | "PUT" | "PATCH") {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        head.push_str("\r\n");

        let mut request = head.into_bytes();
        request.extend_from_slice(body);
        Ok(request)
    }

    fn connect(&self, url: &Url) -> Result<Socket> {
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidArgument(format!("URL has no port: {url}")))?;
        let addrs: Vec<SocketAddr> = match url.host() {
            Some(Host::Ipv4(ip)) => vec![SocketAddr::new(IpAddr::V4(ip), port)],
            Some(Host::Ipv6(ip)) => vec![SocketAddr::new(IpAddr::V6(ip), port)],
            Some(Host::Domain(domain)) => (domain, port)
                .to_socket_addrs()
                .map_err(|e| SocketError::new(SocketErrorKind::ConnectFailed, format!("cannot resolve {domain}: {e}")))?
                .collect(),
            None => return Err(Error::InvalidArgument(format!("URL has no host: {url}"))),
        };

        let mut last_err = None;
        for addr in addrs {
            let socket = Socket::create(AddressFamily::of(&addr.ip()))?;
            match socket.connect(&addr.ip().to_string(), addr.port()) {
                Ok(()) => {
                    socket.set_read_timeout(self.timeout)?;
                    return Ok(socket);
                }
                Err(e) => {
                    debug!(%addr, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| SocketError::new(SocketErrorKind::ConnectFailed, "host resolved to no addresses"))
            .into())
    }

    fn read_response(&self, socket: &Socket) -> Result<Vec<u8>> {
        let mut raw = Vec::new();
        loop {
            match socket.recv(READ_CHUNK) {
                Ok(chunk) => {
                    raw.extend_from_slice(&chunk);
                    if raw.len() > self.max_response_size {
                        return Err(Error::Http(format!(
                            "response exceeds {} bytes",
                            self.max_response_size
                        )));
                    }
                    if response_complete(&raw) {
                        return Ok(raw);
                    }
                }
                Err(e) if e.kind() == SocketErrorKind::ConnectionClosed => return Ok(raw),
                Err(e) if e.is_would_block() => {
                    return Err(Error::Timeout("timed out reading HTTP response".into()));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    /// Serve one canned response and hand back the request that was received.
    fn serve_once(response: &'static [u8]) -> (u16, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while find_header_end(&request).is_none() {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let header_end = find_header_end(&request).unwrap_or(request.len());
            let head = String::from_utf8_lossy(&request[..header_end]).to_string();
            if let Some(length) = head
                .lines()
                .find_map(|l| l.strip_prefix("Content-Length: "))
                .and_then(|v| v.trim().parse::<usize>().ok())
            {
                while request.len() < header_end + length {
                    let n = stream.read(&mut buf).unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
            }
            stream.write_all(response).unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (port, handle)
    }

    #[test]
    fn test_get_with_content_length() {
        let (port, server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello",
        );
        let client = HttpClient::new().with_user_agent("test-agent");
        let response = client.get(&format!("http://127.0.0.1:{port}/path?q=1")).unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.reason, "OK");
        assert!(response.is_success());
        assert_eq!(response.text().unwrap(), "hello");
        assert_eq!(response.headers.get("content-type"), Some("text/plain"));

        let request = server.join().unwrap();
        assert!(request.starts_with("GET /path?q=1 HTTP/1.1\r\n"));
        assert!(request.contains(&format!("Host: 127.0.0.1:{port}\r\n")));
        assert!(request.contains("User-Agent: test-agent\r\n"));
        assert!(request.contains("Connection: close\r\n"));
    }

    #[test]
    fn test_post_sends_body() {
        let (port, server) = serve_once(b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n");
        let response = HttpClient::new()
            .post(&format!("http://127.0.0.1:{port}/items"), b"{\"a\":1}", "application/json")
            .unwrap();
        assert_eq!(response.status, 201);
        assert!(response.body.is_empty());

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /items HTTP/1.1\r\n"));
        assert!(request.contains("Content-Type: application/json\r\n"));
        assert!(request.contains("Content-Length: 7\r\n"));
        assert!(request.ends_with("\r\n\r\n{\"a\":1}"));
    }

    #[test]
    fn test_chunked_response() {
        let (port, server) = serve_once(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\n\r\n",
        );
        let response = HttpClient::new().get(&format!("http://127.0.0.1:{port}/")).unwrap();
        assert_eq!(response.text().unwrap(), "Wikipedia");
        server.join().unwrap();
    }

    #[test]
    fn test_body_until_close() {
        let (port, server) = serve_once(b"HTTP/1.0 404 Not Found\r\n\r\nmissing");
        let response = HttpClient::new().get(&format!("http://127.0.0.1:{port}/x")).unwrap();
        assert_eq!(response.status, 404);
        assert!(!response.is_success());
        assert_eq!(response.body, b"missing");
        server.join().unwrap();
    }

    #[test]
    fn test_rejects_unsupported_urls() {
        let client = HttpClient::new();
        assert!(matches!(
            client.get("https://example.com/"),
            Err(Error::InvalidArgument(msg)) if msg.contains("https")
        ));
        assert!(matches!(client.get("ftp://example.com/"), Err(Error::InvalidArgument(_))));
        assert!(matches!(client.get("not a url"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_header_injection() {
        let mut headers = Headers::new();
        headers.insert("X-Test", "a\r\nInjected: yes");
        let result = HttpClient::new().request("GET", "http://127.0.0.1:9/", &headers, &[]);
        assert!(matches!(result, Err(Error::InvalidHeaderValue { .. })));
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = HttpClient::new()
            .get(&format!("http://127.0.0.1:{port}/"))
            .unwrap_err();
        assert!(matches!(&err, Error::Socket(e) if e.kind() == SocketErrorKind::ConnectFailed));
    }

    #[test]
    fn test_parse_rejects_bad_responses() {
        assert!(HttpResponse::parse(b"garbage\r\n\r\n").is_err());
        assert!(HttpResponse::parse(b"HTTP/1.1 abc OK\r\n\r\n").is_err());
        assert!(HttpResponse::parse(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort").is_err());
        assert!(HttpResponse::parse(b"HTTP/1.1 200 OK\r\n").is_err());
    }

    #[test]
    fn test_decode_chunked_errors() {
        assert!(decode_chunked(b"zz\r\n").is_err());
        assert!(decode_chunked(b"5\r\nab").is_err());
        assert_eq!(decode_chunked(b"0\r\n\r\n").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_chunk_size_overflow_is_an_error() {
        let response = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
            ffffffffffffffff\r\nabc\r\n0\r\n\r\n";
        assert_eq!(
            HttpResponse::parse(response),
            Err(Error::Http("chunk size too large".into()))
        );
        assert!(!response_complete(response));
    }
}
