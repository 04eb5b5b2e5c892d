use crate::types::Direction;
use cpal::{
    BuildStreamError, DefaultStreamConfigError, DeviceNameError, DevicesError, PlayStreamError,
    SupportedStreamConfigsError,
};
use std::time::Duration;
use thiserror::Error;

/// Errors from the bus arbiter while handing out ownership
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Audio bus busy: already owned for {held:?}, requested {requested:?}")]
    Busy {
        held: Direction,
        requested: Direction,
    },

    #[error("Audio device error: {0}")]
    Device(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("No audio captured within {0:?}")]
    Timeout(Duration),

    #[error("Capture hardware fault: {0}")]
    HardwareFault(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("Playback already in progress")]
    Busy,

    #[error("Failed to fetch audio: {0}")]
    Fetch(String),

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Playback device error: {0}")]
    Device(String),
}

impl From<DevicesError> for BusError {
    fn from(err: DevicesError) -> Self {
        BusError::Device(err.to_string())
    }
}

impl From<DeviceNameError> for BusError {
    fn from(err: DeviceNameError) -> Self {
        BusError::Device(err.to_string())
    }
}

impl From<DefaultStreamConfigError> for BusError {
    fn from(err: DefaultStreamConfigError) -> Self {
        BusError::Device(err.to_string())
    }
}

impl From<SupportedStreamConfigsError> for BusError {
    fn from(err: SupportedStreamConfigsError) -> Self {
        BusError::Device(err.to_string())
    }
}

impl From<BuildStreamError> for BusError {
    fn from(err: BuildStreamError) -> Self {
        BusError::Device(err.to_string())
    }
}

impl From<PlayStreamError> for BusError {
    fn from(err: PlayStreamError) -> Self {
        BusError::Device(err.to_string())
    }
}

impl From<BuildStreamError> for PlaybackError {
    fn from(err: BuildStreamError) -> Self {
        PlaybackError::Device(err.to_string())
    }
}

impl From<PlayStreamError> for PlaybackError {
    fn from(err: PlayStreamError) -> Self {
        PlaybackError::Device(err.to_string())
    }
}

impl From<DefaultStreamConfigError> for PlaybackError {
    fn from(err: DefaultStreamConfigError) -> Self {
        PlaybackError::Device(err.to_string())
    }
}

impl From<DevicesError> for PlaybackError {
    fn from(err: DevicesError) -> Self {
        PlaybackError::Device(err.to_string())
    }
}

impl From<DeviceNameError> for PlaybackError {
    fn from(err: DeviceNameError) -> Self {
        PlaybackError::Device(err.to_string())
    }
}
