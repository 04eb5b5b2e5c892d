use crate::controller::ControllerConfig;
use crate::trigger::{TriggerConfig, TriggerKind};
use audio::{CaptureConfig, PlaybackConfig};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use upload_protocol::{ConnectorConfig, Endpoint};

pub const DEFAULT_SERVER_URL: &str = "http://192.168.1.100:5000/upload";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid server URL: {0}")]
    InvalidServerUrl(String),
    #[error("Frame size must be a positive, even number of bytes (got {0})")]
    InvalidFrameSize(usize),
    #[error("Volume must be between 0.0 and 1.0 (got {0})")]
    InvalidVolume(f32),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Push-to-talk voice client", long_about = None)]
pub struct Args {
    /// Upload endpoint of the assistant server
    #[arg(long, env = "PTT_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
    pub server_url: String,

    /// Where the push-to-talk signal comes from
    #[arg(long, env = "PTT_TRIGGER", value_enum, default_value_t = TriggerKind::Stdin)]
    pub trigger: TriggerKind,

    /// sysfs value file for the GPIO button
    #[arg(long, env = "PTT_GPIO_PATH", default_value = "/sys/class/gpio/gpio17/value")]
    pub gpio_path: PathBuf,

    /// Button reads 1 while pressed (default is a pulled-up, active-low button)
    #[arg(long, env = "PTT_ACTIVE_HIGH")]
    pub active_high: bool,

    /// Level must be stable this long before it counts
    #[arg(long, env = "PTT_DEBOUNCE_MS", default_value_t = 30)]
    pub debounce_ms: u64,

    /// Input device name (default device if unset)
    #[arg(long, env = "PTT_INPUT_DEVICE")]
    pub input_device: Option<String>,

    /// Input channel to record (0-based)
    #[arg(long, env = "PTT_INPUT_CHANNEL", default_value_t = 0)]
    pub input_channel: u16,

    /// Output device name (default device if unset)
    #[arg(long, env = "PTT_OUTPUT_DEVICE")]
    pub output_device: Option<String>,

    /// Bytes of s16le audio per uploaded chunk
    #[arg(long, env = "PTT_FRAME_BYTES", default_value_t = audio::DEFAULT_FRAME_BYTES)]
    pub frame_bytes: usize,

    /// Longest wait for one frame of audio
    #[arg(long, env = "PTT_FRAME_TIMEOUT_MS", default_value_t = 500)]
    pub frame_timeout_ms: u64,

    #[arg(long, env = "PTT_CONNECT_TIMEOUT_MS", default_value_t = 5000)]
    pub connect_timeout_ms: u64,

    #[arg(long, env = "PTT_WRITE_TIMEOUT_MS", default_value_t = 10000)]
    pub write_timeout_ms: u64,

    /// How long the server may think before answering
    #[arg(long, env = "PTT_RESPONSE_TIMEOUT_MS", default_value_t = 30000)]
    pub response_timeout_ms: u64,

    /// Idle time that ends a response with no length or chunked framing
    #[arg(long, env = "PTT_DRAIN_TIMEOUT_MS", default_value_t = 1000)]
    pub drain_timeout_ms: u64,

    /// Recording stops on its own after this long
    #[arg(long, env = "PTT_MAX_RECORDING_SECS", default_value_t = 30)]
    pub max_recording_secs: u64,

    /// Playback gain, 0.0 to 1.0
    #[arg(long, env = "PTT_VOLUME", default_value_t = 0.7)]
    pub volume: f32,

    /// How often the trigger is polled while idle
    #[arg(long, env = "PTT_POLL_INTERVAL_MS", default_value_t = 10)]
    pub poll_interval_ms: u64,

    /// Pressing the trigger during playback stops it and starts recording
    #[arg(long, env = "PTT_INTERRUPT_PLAYBACK")]
    pub interrupt_playback: bool,
}

/// Validated settings for every part of the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub endpoint: Endpoint,
    pub trigger: TriggerConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub connector: ConnectorConfig,
    pub controller: ControllerConfig,
}

fn non_zero(ms: u64, name: &'static str) -> Result<Duration, ConfigError> {
    if ms == 0 {
        return Err(ConfigError::ZeroDuration(name));
    }
    Ok(Duration::from_millis(ms))
}

impl AgentConfig {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let endpoint = Endpoint::from_url(&args.server_url).map_err(ConfigError::InvalidServerUrl)?;

        if args.frame_bytes == 0 || args.frame_bytes % 2 != 0 {
            return Err(ConfigError::InvalidFrameSize(args.frame_bytes));
        }
        if !(0.0..=1.0).contains(&args.volume) {
            return Err(ConfigError::InvalidVolume(args.volume));
        }

        let connector = ConnectorConfig {
            connect_timeout: non_zero(args.connect_timeout_ms, "connect timeout")?,
            write_timeout: non_zero(args.write_timeout_ms, "write timeout")?,
            response_timeout: non_zero(args.response_timeout_ms, "response timeout")?,
        };

        let controller = ControllerConfig {
            frame_timeout: non_zero(args.frame_timeout_ms, "frame timeout")?,
            drain_timeout: non_zero(args.drain_timeout_ms, "drain timeout")?,
            max_recording: Duration::from_secs(args.max_recording_secs),
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            interrupt_playback: args.interrupt_playback,
            ..ControllerConfig::default()
        };
        if controller.max_recording.is_zero() {
            return Err(ConfigError::ZeroDuration("max recording length"));
        }

        Ok(Self {
            endpoint,
            trigger: TriggerConfig {
                kind: args.trigger,
                gpio_path: args.gpio_path.clone(),
                active_low: !args.active_high,
                debounce: Duration::from_millis(args.debounce_ms),
            },
            capture: CaptureConfig {
                device_name: args.input_device.clone(),
                channel: args.input_channel,
                frame_bytes: args.frame_bytes,
            },
            playback: PlaybackConfig {
                device_name: args.output_device.clone(),
                volume: args.volume,
                ..PlaybackConfig::default()
            },
            connector,
            controller,
        })
    }
}

/// Load `.env`, parse the command line and validate, with helpful log messages
pub fn load_config() -> Result<AgentConfig, ConfigError> {
    // Load .env file if it exists (for development)
    if let Ok(path) = dotenvy::dotenv() {
        log::debug!("Loaded environment from {}", path.display());
    }

    let args = Args::parse();
    match AgentConfig::from_args(&args) {
        Ok(config) => {
            log::info!("Successfully loaded configuration");
            log::debug!("{:#?}", config);
            Ok(config)
        }
        Err(ConfigError::InvalidServerUrl(reason)) => {
            log::error!("Invalid server URL: {}", reason);
            log::error!("Set PTT_SERVER_URL in .env or pass --server-url, e.g.");
            log::error!("PTT_SERVER_URL={}", DEFAULT_SERVER_URL);
            Err(ConfigError::InvalidServerUrl(reason))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}
