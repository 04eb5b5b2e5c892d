use crate::response::DecodeError;
use crate::status;
use audio::{BusError, CaptureError, PlaybackError};
use thiserror::Error;
use upload_protocol::SessionError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Audio bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Upload error: {0}")]
    Session(#[from] SessionError),

    #[error("Response error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Network is not connected")]
    Offline,
}

impl AgentError {
    /// Short line for the status display
    pub fn status_text(&self) -> &'static str {
        match self {
            AgentError::Bus(BusError::Busy { .. }) => status::BUS_BUSY,
            AgentError::Bus(BusError::Device(_)) => status::AUDIO_ERROR,
            AgentError::Capture(CaptureError::Timeout(_)) => status::MIC_TIMEOUT,
            AgentError::Capture(CaptureError::HardwareFault(_)) => status::MIC_ERROR,
            AgentError::Session(SessionError::Connect(_)) => status::CONN_FAILED,
            AgentError::Session(SessionError::Write(_)) => status::UPLOAD_FAILED,
            AgentError::Session(_) => status::NO_RESPONSE,
            AgentError::Playback(_) => status::AUDIO_ERROR,
            AgentError::Offline => status::NO_NETWORK,
            AgentError::Decode(_) => status::NO_TEXT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio::Direction;
    use std::io;
    use std::time::Duration;

    #[test]
    fn test_status_text_mapping() {
        let cases: Vec<(AgentError, &str)> = vec![
            (
                SessionError::Connect("refused".into()).into(),
                status::CONN_FAILED,
            ),
            (
                SessionError::Write(io::Error::from(io::ErrorKind::BrokenPipe)).into(),
                status::UPLOAD_FAILED,
            ),
            (
                SessionError::Read(io::Error::from(io::ErrorKind::TimedOut)).into(),
                status::NO_RESPONSE,
            ),
            (
                SessionError::MalformedResponse("garbage".into()).into(),
                status::NO_RESPONSE,
            ),
            (
                CaptureError::Timeout(Duration::from_millis(500)).into(),
                status::MIC_TIMEOUT,
            ),
            (
                CaptureError::HardwareFault("i2s".into()).into(),
                status::MIC_ERROR,
            ),
            (
                BusError::Busy {
                    held: Direction::Output,
                    requested: Direction::Input,
                }
                .into(),
                status::BUS_BUSY,
            ),
            (PlaybackError::Fetch("404".into()).into(), status::AUDIO_ERROR),
            (AgentError::Offline, status::NO_NETWORK),
            (
                crate::response::decode(br#"{"text":"Hel"#).unwrap_err().into(),
                status::NO_TEXT,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status_text(), expected, "for {}", error);
        }
    }
}
