use crate::audio_sink::CpalPlayback;
use crate::audio_source::CpalCapture;
use crate::bus::Peripheral;
use crate::error::BusError;
use crate::types::{CaptureConfig, PlaybackConfig};

/// The host's sound card, driven through cpal.
///
/// Each configure call opens a fresh stream; dropping the endpoint closes it,
/// so the device is never open in both directions.
#[derive(Debug, Clone, Default)]
pub struct CpalPeripheral {
    capture: CaptureConfig,
    playback: PlaybackConfig,
}

impl CpalPeripheral {
    pub fn new(capture: CaptureConfig, playback: PlaybackConfig) -> Self {
        Self { capture, playback }
    }

    pub fn capture_config(&self) -> &CaptureConfig {
        &self.capture
    }

    pub fn playback_config(&self) -> &PlaybackConfig {
        &self.playback
    }
}

impl Peripheral for CpalPeripheral {
    type Capture = CpalCapture;
    type Playback = CpalPlayback;

    fn configure_input(&mut self) -> Result<CpalCapture, BusError> {
        CpalCapture::open(&self.capture)
    }

    fn configure_output(&mut self) -> Result<CpalPlayback, BusError> {
        CpalPlayback::open(&self.playback)
    }
}
