//! # Upload Protocol
//!
//! Streaming HTTP/1.1 upload of captured audio to the assistant server.
//!
//! This crate provides:
//! - Wire-level framing (request head, chunked body, response parsing)
//! - [`UploadSession`], which owns one connection for one exchange
//! - An in-memory transport for tests
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use upload_protocol::{Endpoint, TcpConnector, UploadSession};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = Endpoint::from_url("http://192.168.1.100:5000/upload")?;
//! let mut connector = TcpConnector::default();
//!
//! let mut session = UploadSession::open(&mut connector, &endpoint)?;
//! session.write_chunk(&[0u8; 1024])?;
//! let response = session.finish()?;
//!
//! println!("Server said: {}", response.body_text());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod mock;
pub mod protocol;

// Re-export commonly used types
pub use client::{Connector, ConnectorConfig, Endpoint, TcpConnector, Transport, UploadSession};
pub use protocol::{BodyFraming, RawResponse, ResponseHead, SessionError};
