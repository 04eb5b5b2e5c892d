use std::fmt;
use std::time::Instant;

/// Sample rate the server expects for uploaded audio
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Default capture quantum: 512 s16le samples, 32ms at 16kHz
pub const DEFAULT_FRAME_BYTES: usize = 1024;

/// Which way the shared audio peripheral is configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Current owner of the peripheral, `None` when unconfigured
pub type BusOwnership = Option<Direction>;

/// One capture quantum of raw s16le mono audio.
///
/// `len()` may be below `max_len()` on the last read of a session; such a
/// frame is still valid audio and not an end-of-stream marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Vec<u8>,
    max_len: usize,
    captured_at: Instant,
}

impl AudioFrame {
    /// Build a frame, truncating `data` to `max_len`
    pub fn new(mut data: Vec<u8>, max_len: usize) -> Self {
        data.truncate(max_len);
        Self {
            data,
            max_len,
            captured_at: Instant::now(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Actual length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn is_short(&self) -> bool {
        self.data.len() < self.max_len
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Number of s16le samples
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Input device settings
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Device name to capture from (None = default device)
    pub device_name: Option<String>,
    /// Channel to capture (0-based index)
    pub channel: u16,
    /// Bytes per frame handed to the uploader
    pub frame_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            channel: 0,
            frame_bytes: DEFAULT_FRAME_BYTES,
        }
    }
}

/// Output device settings
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Device name to play on (None = default device)
    pub device_name: Option<String>,
    /// Linear gain in 0.0..=1.0
    pub volume: f32,
    /// Bound on fetching the locator
    pub fetch_timeout: std::time::Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            volume: 0.7,
            fetch_timeout: std::time::Duration::from_secs(15),
        }
    }
}
