use std::io::{self, BufRead, Read, Write};
use thiserror::Error;

/// Upper bound for a response body, whatever framing the server uses
pub const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Upper bound for a single status or header line
const MAX_LINE_BYTES: usize = 8 * 1024;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Write error: {0}")]
    Write(#[source] io::Error),

    #[error("Read error: {0}")]
    Read(#[source] io::Error),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Response body exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },
}

/// How the body of a response is delimited on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    ContentLength(usize),
    Chunked,
    /// No declared length: read until the peer closes or goes quiet
    Drain,
}

/// A fully read response from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Build the request line and headers that open a chunked upload
pub fn request_head(host: &str, port: u16, path: &str) -> String {
    let authority = authority(host, port);
    format!(
        "POST {path} HTTP/1.1\r\n\
         Host: {authority}\r\n\
         Content-Type: application/octet-stream\r\n\
         Transfer-Encoding: chunked\r\n\
         Connection: keep-alive\r\n\
         \r\n"
    )
}

/// `host:port`, with IPv6 literals in brackets
pub fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Write one chunk: hex length, CRLF, payload, CRLF.
///
/// Returns the number of bytes put on the wire. An empty payload is skipped
/// because a zero-length chunk terminates the body.
pub fn write_chunk<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<usize> {
    if payload.is_empty() {
        return Ok(0);
    }

    let size_line = format!("{:x}\r\n", payload.len());
    writer.write_all(size_line.as_bytes())?;
    writer.write_all(payload)?;
    writer.write_all(b"\r\n")?;

    Ok(size_line.len() + payload.len() + 2)
}

/// Write the zero-length terminating chunk and the empty trailer section
pub fn write_terminator<W: Write>(writer: &mut W) -> io::Result<usize> {
    const TERMINATOR: &[u8] = b"0\r\n\r\n";
    writer.write_all(TERMINATOR)?;
    Ok(TERMINATOR.len())
}

/// Decode a chunked body up to and including its terminator and trailers
pub fn decode_chunked<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, SessionError> {
    let mut body = Vec::new();

    loop {
        let line = read_line(reader)?
            .ok_or_else(|| malformed("connection closed inside chunked body"))?;

        // Chunk extensions after ';' carry nothing we use
        let size_field = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| malformed(format!("invalid chunk size line: {:?}", line)))?;

        if size == 0 {
            // Trailer section runs until an empty line
            loop {
                match read_line(reader)? {
                    Some(trailer) if !trailer.is_empty() => continue,
                    _ => return Ok(body),
                }
            }
        }

        if body.len() + size > MAX_RESPONSE_BYTES {
            return Err(SessionError::ResponseTooLarge {
                limit: MAX_RESPONSE_BYTES,
            });
        }

        let start = body.len();
        body.resize(start + size, 0);
        reader
            .read_exact(&mut body[start..])
            .map_err(SessionError::Read)?;

        match read_line(reader)? {
            Some(rest) if rest.is_empty() => {}
            _ => return Err(malformed("chunk payload not followed by CRLF")),
        }
    }
}

/// Status line and headers of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn framing(&self) -> Result<BodyFraming, SessionError> {
        body_framing(&self.headers)
    }

    pub fn with_body(self, body: Vec<u8>) -> RawResponse {
        RawResponse {
            status: self.status,
            reason: self.reason,
            headers: self.headers,
            body,
        }
    }
}

/// Read the status line and headers, stopping at the blank line
pub fn read_head<R: BufRead>(reader: &mut R) -> Result<ResponseHead, SessionError> {
    let status_line = read_line(reader)?
        .ok_or_else(|| malformed("connection closed before status line"))?;
    let (status, reason) = parse_status_line(&status_line)?;

    let mut headers = Vec::new();
    loop {
        let line = read_line(reader)?
            .ok_or_else(|| malformed("connection closed inside header section"))?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed(format!("invalid header line: {:?}", line)))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(ResponseHead {
        status,
        reason,
        headers,
    })
}

/// Read a body delimited by `framing`.
///
/// A `Drain` body is whatever arrives until the peer closes or the
/// transport's read timeout fires.
pub fn read_body<R: BufRead>(
    reader: &mut R,
    framing: BodyFraming,
) -> Result<Vec<u8>, SessionError> {
    match framing {
        BodyFraming::ContentLength(len) => {
            if len > MAX_RESPONSE_BYTES {
                return Err(SessionError::ResponseTooLarge {
                    limit: MAX_RESPONSE_BYTES,
                });
            }
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).map_err(SessionError::Read)?;
            Ok(body)
        }
        BodyFraming::Chunked => decode_chunked(reader),
        BodyFraming::Drain => drain_body(reader),
    }
}

/// Read a complete response: status line, headers, then the body.
/// Header lines never end up in the body.
pub fn read_response<R: BufRead>(reader: &mut R) -> Result<RawResponse, SessionError> {
    let head = read_head(reader)?;
    let framing = head.framing()?;
    log::debug!("📥 Response {} {} ({:?})", head.status, head.reason, framing);

    let body = read_body(reader, framing)?;
    Ok(head.with_body(body))
}

/// Pick the body framing declared by the headers
pub fn body_framing(headers: &[(String, String)]) -> Result<BodyFraming, SessionError> {
    if let Some(encoding) = find_header(headers, "transfer-encoding") {
        if encoding
            .split(',')
            .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
        {
            return Ok(BodyFraming::Chunked);
        }
    }

    if let Some(length) = find_header(headers, "content-length") {
        let len = length
            .parse::<usize>()
            .map_err(|_| malformed(format!("invalid Content-Length: {:?}", length)))?;
        return Ok(BodyFraming::ContentLength(len));
    }

    Ok(BodyFraming::Drain)
}

fn drain_body<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, SessionError> {
    let mut body = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if body.len() + n > MAX_RESPONSE_BYTES {
                    return Err(SessionError::ResponseTooLarge {
                        limit: MAX_RESPONSE_BYTES,
                    });
                }
                body.extend_from_slice(&buf[..n]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                log::debug!("⏱️ Response went quiet after {} body bytes", body.len());
                break;
            }
            Err(e) => return Err(SessionError::Read(e)),
        }
    }

    Ok(body)
}

fn parse_status_line(line: &str) -> Result<(u16, String), SessionError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/") {
        return Err(malformed(format!("invalid status line: {:?}", line)));
    }

    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| malformed(format!("invalid status code in: {:?}", line)))?;
    let reason = parts.next().unwrap_or("").to_string();

    Ok((status, reason))
}

/// Read one CRLF- or LF-terminated line without its terminator.
/// `None` means the stream ended before any byte of the line.
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>, SessionError> {
    let mut raw = Vec::new();
    let read = reader
        .by_ref()
        .take(MAX_LINE_BYTES as u64)
        .read_until(b'\n', &mut raw)
        .map_err(SessionError::Read)?;

    if read == 0 {
        return Ok(None);
    }
    if raw.last() != Some(&b'\n') {
        if raw.len() >= MAX_LINE_BYTES {
            return Err(malformed("line too long"));
        }
        return Err(malformed("connection closed mid-line"));
    }

    raw.pop();
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }

    String::from_utf8(raw)
        .map(Some)
        .map_err(|_| malformed("line is not valid UTF-8"))
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn malformed(message: impl Into<String>) -> SessionError {
    SessionError::MalformedResponse(message.into())
}
