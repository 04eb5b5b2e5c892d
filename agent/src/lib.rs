//! The main library for the push-to-talk voice client.
//!
//! While a button is held, microphone audio streams to the assistant server
//! as a chunked HTTP upload; the server's reply text is shown and its audio,
//! if any, is played back over the same audio peripheral.

pub mod config;
pub mod connectivity;
pub mod controller;
pub mod error;
pub mod response;
pub mod status;
pub mod trigger;

// Re-export common types
pub use config::{load_config, AgentConfig, Args, ConfigError};
pub use controller::{Controller, ControllerConfig, ControllerState, ExchangeStats};
pub use error::AgentError;
pub use response::{decode, DecodeError, ResponsePayload};
