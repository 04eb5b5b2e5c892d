pub mod audio_sink;
pub mod audio_source;
pub mod bus;
pub mod error;
pub mod mock_device;
pub mod peripheral;
pub mod resampler;
pub mod types;

// Re-export common types
pub use audio_sink::{CpalPlayback, PlaybackSink, PlaybackStatus};
pub use audio_source::{CaptureMessage, CaptureSource, ChannelCapture, CpalCapture};
pub use bus::{BusArbiter, BusHandle, Peripheral};
pub use error::{BusError, CaptureError, PlaybackError};
pub use peripheral::CpalPeripheral;
pub use types::*;
