use crate::protocol::{self, BodyFraming, RawResponse, SessionError};
use log::{debug, info, trace};
use std::fmt;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use url::{Host, Url};

/// Where captured audio is uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };

        Self {
            host: host.into(),
            port,
            path,
        }
    }

    /// Parse an `http://host[:port]/path` URL
    pub fn from_url(raw: &str) -> Result<Self, String> {
        let url = Url::parse(raw).map_err(|e| format!("invalid server URL '{}': {}", raw, e))?;

        if url.scheme() != "http" {
            return Err(format!(
                "unsupported scheme '{}' in '{}' (only plain http is spoken)",
                url.scheme(),
                raw
            ));
        }

        // IPv6 literals are stored without brackets so they resolve
        let host = match url.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(host) => host.to_string(),
            None => return Err(format!("server URL '{}' has no host", raw)),
        };
        let port = url.port_or_known_default().unwrap_or(80);

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self::new(host, port, path))
    }

    /// Resolve a locator returned by the server against this endpoint.
    /// Absolute locators are returned unchanged.
    pub fn resolve(&self, locator: &str) -> Result<String, String> {
        if let Ok(absolute) = Url::parse(locator) {
            return Ok(absolute.to_string());
        }

        let base = Url::parse(&self.to_string())
            .map_err(|e| format!("endpoint is not a valid base URL: {}", e))?;
        base.join(locator)
            .map(|resolved| resolved.to_string())
            .map_err(|e| format!("cannot resolve locator '{}': {}", locator, e))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "http://{}{}",
            protocol::authority(&self.host, self.port),
            self.path
        )
    }
}

/// A byte stream an upload can run over
pub trait Transport: Read + Write {
    /// Adjust how long a read may wait before giving up
    fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

/// Opens transports to an endpoint
pub trait Connector {
    type Stream: Transport;

    fn connect(&mut self, endpoint: &Endpoint) -> Result<Self::Stream, SessionError>;
}

/// Timeouts applied to every upload connection
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    /// How long to wait for the server to produce its response
    pub response_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(30),
        }
    }
}

/// Plain TCP connector
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: ConnectorConfig,
}

impl TcpConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self { config }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&mut self, endpoint: &Endpoint) -> Result<TcpStream, SessionError> {
        info!("📡 Connecting to upload server at {}", endpoint);

        let addrs = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| {
                SessionError::Connect(format!("cannot resolve {}: {}", endpoint.host, e))
            })?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(self.config.response_timeout))
                        .map_err(|e| SessionError::Connect(e.to_string()))?;
                    stream
                        .set_write_timeout(Some(self.config.write_timeout))
                        .map_err(|e| SessionError::Connect(e.to_string()))?;
                    // Frames are small and latency matters more than packet count
                    stream
                        .set_nodelay(true)
                        .map_err(|e| SessionError::Connect(e.to_string()))?;

                    info!("✅ Connected to upload server ({})", addr);
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("❌ Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(SessionError::Connect(match last_error {
            Some(e) => format!("{}: {}", endpoint, e),
            None => format!("{}: no addresses resolved", endpoint),
        }))
    }
}

/// A single streaming upload: chunked request body out, response back
pub struct UploadSession<S: Transport> {
    writer: BufWriter<S>,
    endpoint: Endpoint,
    headers_sent: bool,
    bytes_sent: u64,
    chunks_sent: u64,
    drain_timeout: Option<Duration>,
}

impl<S: Transport> UploadSession<S> {
    /// Connect and send the request head declaring a chunked body
    pub fn open<C>(connector: &mut C, endpoint: &Endpoint) -> Result<Self, SessionError>
    where
        C: Connector<Stream = S>,
    {
        let stream = connector.connect(endpoint)?;
        let mut session = Self {
            writer: BufWriter::new(stream),
            endpoint: endpoint.clone(),
            headers_sent: false,
            bytes_sent: 0,
            chunks_sent: 0,
            drain_timeout: None,
        };

        let head = protocol::request_head(&endpoint.host, endpoint.port, &endpoint.path);
        session
            .writer
            .write_all(head.as_bytes())
            .and_then(|_| session.writer.flush())
            .map_err(|e| SessionError::Connect(format!("failed to send request head: {}", e)))?;
        session.headers_sent = true;
        session.bytes_sent = head.len() as u64;

        debug!("📤 Sent request head for {}", endpoint);
        Ok(session)
    }

    /// Bound the wait for an unframed response body once headers are in
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    /// Send one frame as a chunk. Empty frames are skipped.
    pub fn write_chunk(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        if payload.is_empty() {
            trace!("⏭️ Skipping empty frame");
            return Ok(());
        }

        let written =
            protocol::write_chunk(&mut self.writer, payload).map_err(SessionError::Write)?;
        self.writer.flush().map_err(SessionError::Write)?;

        self.bytes_sent += written as u64;
        self.chunks_sent += 1;
        trace!(
            "📤 Chunk {}: {} bytes ({} total on the wire)",
            self.chunks_sent,
            payload.len(),
            self.bytes_sent
        );
        Ok(())
    }

    /// Terminate the body and read the server's response
    pub fn finish(mut self) -> Result<RawResponse, SessionError> {
        let written = protocol::write_terminator(&mut self.writer).map_err(SessionError::Write)?;
        self.writer.flush().map_err(SessionError::Write)?;
        self.bytes_sent += written as u64;

        info!(
            "📤 Upload complete: {} chunks, {} bytes; awaiting response",
            self.chunks_sent, self.bytes_sent
        );

        let stream = self
            .writer
            .into_inner()
            .map_err(|e| SessionError::Write(e.into_error()))?;
        let mut reader = BufReader::new(stream);

        // Headers and framed bodies wait on the response timeout
        let head = protocol::read_head(&mut reader)?;
        let framing = head.framing()?;
        debug!("📥 Response {} {} ({:?})", head.status, head.reason, framing);

        if let (BodyFraming::Drain, Some(timeout)) = (framing, self.drain_timeout) {
            reader
                .get_ref()
                .set_read_timeout(Some(timeout))
                .map_err(SessionError::Read)?;
        }
        let body = protocol::read_body(&mut reader, framing)?;
        let response = head.with_body(body);

        info!(
            "📥 Response {} from {}: {} body bytes",
            response.status,
            self.endpoint,
            response.body.len()
        );
        Ok(response)
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Bytes written so far, framing included
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_from_url() {
        let endpoint = Endpoint::from_url("http://192.168.1.100:5000/upload").unwrap();
        assert_eq!(endpoint.host, "192.168.1.100");
        assert_eq!(endpoint.port, 5000);
        assert_eq!(endpoint.path, "/upload");
        assert_eq!(endpoint.to_string(), "http://192.168.1.100:5000/upload");

        let endpoint = Endpoint::from_url("http://assistant.local/v1/upload?lang=en").unwrap();
        assert_eq!(endpoint.port, 80);
        assert_eq!(endpoint.path, "/v1/upload?lang=en");
    }

    #[test]
    fn test_endpoint_ipv6_host_has_no_brackets() {
        let endpoint = Endpoint::from_url("http://[::1]:5000/upload").unwrap();
        assert_eq!(endpoint.host, "::1");
        assert_eq!(endpoint.port, 5000);
        assert_eq!(endpoint.to_string(), "http://[::1]:5000/upload");
        assert!((endpoint.host.as_str(), endpoint.port).to_socket_addrs().is_ok());
        assert_eq!(
            endpoint.resolve("/audio/a.mp3").unwrap(),
            "http://[::1]:5000/audio/a.mp3"
        );
    }

    #[test]
    fn test_endpoint_rejects_non_http() {
        assert!(Endpoint::from_url("https://example.com/upload").is_err());
        assert!(Endpoint::from_url("not a url").is_err());
    }

    #[test]
    fn test_endpoint_normalizes_path() {
        let endpoint = Endpoint::new("host", 8080, "upload");
        assert_eq!(endpoint.path, "/upload");
    }

    #[test]
    fn test_resolve_locator() {
        let endpoint = Endpoint::new("10.0.0.2", 5000, "/upload");

        assert_eq!(
            endpoint.resolve("http://x/y.mp3").unwrap(),
            "http://x/y.mp3"
        );
        assert_eq!(
            endpoint.resolve("/audio/response.mp3").unwrap(),
            "http://10.0.0.2:5000/audio/response.mp3"
        );
    }
}
