//! In-memory transport for exercising upload sessions without a network.
//!
//! Everything the client writes is captured in a shared wire buffer so tests
//! can inspect exactly what a server would have received.

use crate::client::{Connector, Endpoint, Transport};
use crate::protocol::SessionError;
use std::cell::{Cell, RefCell};
use std::io::{self, Cursor, Read, Write};
use std::rc::Rc;

/// Shared view of the bytes a client put on the wire
#[derive(Debug, Clone, Default)]
pub struct Wire(Rc<RefCell<Vec<u8>>>);

impl Wire {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    /// Everything after the request head
    pub fn body(&self) -> Vec<u8> {
        let bytes = self.0.borrow();
        match bytes.windows(4).position(|w| w == b"\r\n\r\n") {
            Some(end) => bytes[end + 4..].to_vec(),
            None => Vec::new(),
        }
    }

    /// The request head, up to and excluding the blank line
    pub fn head(&self) -> String {
        let bytes = self.0.borrow();
        let end = bytes
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

/// Transport backed by a canned response
pub struct MemoryTransport {
    wire: Wire,
    response: Cursor<Vec<u8>>,
    write_budget: Option<usize>,
}

impl Read for MemoryTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.response.read(buf)
    }
}

impl Write for MemoryTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(budget) = self.write_budget.as_mut() {
            if *budget < buf.len() {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "peer closed the connection",
                ));
            }
            *budget -= buf.len();
        }
        self.wire.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MemoryTransport {}

/// Connector handing out [`MemoryTransport`]s
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    response: Vec<u8>,
    refuse: bool,
    write_budget: Option<usize>,
    wire: Wire,
    connects: Rc<Cell<usize>>,
}

impl MemoryConnector {
    /// Every connection answers with `response` (raw HTTP bytes)
    pub fn new(response: impl Into<Vec<u8>>) -> Self {
        Self {
            response: response.into(),
            ..Self::default()
        }
    }

    /// Answer with a `200 OK` JSON response framed by Content-Length
    pub fn with_json(body: &str) -> Self {
        Self::new(json_response(body))
    }

    /// Every connection attempt is refused
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    /// Writes fail once `bytes` have been accepted
    pub fn failing_after(mut self, bytes: usize) -> Self {
        self.write_budget = Some(bytes);
        self
    }

    pub fn wire(&self) -> Wire {
        self.wire.clone()
    }

    /// Number of connection attempts so far
    pub fn connects(&self) -> usize {
        self.connects.get()
    }

    /// Shared counter of connection attempts, usable after the connector moves
    pub fn connect_counter(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.connects)
    }
}

impl Connector for MemoryConnector {
    type Stream = MemoryTransport;

    fn connect(&mut self, endpoint: &Endpoint) -> Result<MemoryTransport, SessionError> {
        self.connects.set(self.connects.get() + 1);

        if self.refuse {
            return Err(SessionError::Connect(format!(
                "{}: connection refused",
                endpoint
            )));
        }

        self.wire.clear();
        Ok(MemoryTransport {
            wire: self.wire.clone(),
            response: Cursor::new(self.response.clone()),
            write_budget: self.write_budget,
        })
    }
}

/// A complete `200 OK` response carrying `body` as JSON
pub fn json_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}
