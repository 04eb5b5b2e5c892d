use crate::error::{BusError, CaptureError};
use crate::resampler::{f32_to_s16le, StreamResampler};
use crate::types::{AudioFrame, CaptureConfig, CAPTURE_SAMPLE_RATE};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, FromSample, Sample, SampleFormat, SizedSample, Stream as CpalStream,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How long to wait for the capture thread to bring the stream up
const STREAM_START_TIMEOUT: Duration = Duration::from_secs(5);

/// A configured microphone endpoint producing s16le mono frames at 16kHz
pub trait CaptureSource {
    /// Block until at least one byte of audio is available or `timeout` passes.
    ///
    /// Returns up to one frame of audio; a short frame is valid data.
    fn read_frame(&mut self, timeout: Duration) -> Result<AudioFrame, CaptureError>;

    /// Maximum bytes per frame
    fn frame_bytes(&self) -> usize;
}

/// Messages from a capture producer (audio callback or test script)
#[derive(Debug, Clone)]
pub enum CaptureMessage {
    /// s16le mono bytes at 16kHz
    Samples(Vec<u8>),
    /// The producer hit an unrecoverable error
    Fault(String),
}

/// Create a connected producer/capture pair
pub fn capture_channel(frame_bytes: usize) -> (Sender<CaptureMessage>, ChannelCapture) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (tx, ChannelCapture::new(rx, frame_bytes))
}

/// Reframes whatever the producer sends into frames of at most `frame_bytes`
#[derive(Debug)]
pub struct ChannelCapture {
    rx: Receiver<CaptureMessage>,
    pending: Vec<u8>,
    frame_bytes: usize,
}

impl ChannelCapture {
    pub fn new(rx: Receiver<CaptureMessage>, frame_bytes: usize) -> Self {
        Self {
            rx,
            pending: Vec::with_capacity(frame_bytes * 2),
            frame_bytes,
        }
    }

    /// Bytes received but not yet handed out
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    fn absorb(&mut self, message: CaptureMessage) -> Result<(), CaptureError> {
        match message {
            CaptureMessage::Samples(bytes) => {
                self.pending.extend_from_slice(&bytes);
                Ok(())
            }
            CaptureMessage::Fault(reason) => {
                log::error!("❌ Capture fault: {}", reason);
                Err(CaptureError::HardwareFault(reason))
            }
        }
    }
}

impl CaptureSource for ChannelCapture {
    fn read_frame(&mut self, timeout: Duration) -> Result<AudioFrame, CaptureError> {
        let deadline = Instant::now() + timeout;

        while self.pending.is_empty() {
            match self.rx.recv_deadline(deadline) {
                Ok(message) => self.absorb(message)?,
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("⏰ No audio within {:?}", timeout);
                    return Err(CaptureError::Timeout(timeout));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CaptureError::HardwareFault(
                        "capture stream closed".to_string(),
                    ));
                }
            }
        }

        // Top up without blocking so frames stay full when audio is queued
        while self.pending.len() < self.frame_bytes {
            match self.rx.try_recv() {
                Ok(message) => self.absorb(message)?,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        let take = self.pending.len().min(self.frame_bytes);
        let data: Vec<u8> = self.pending.drain(..take).collect();
        Ok(AudioFrame::new(data, self.frame_bytes))
    }

    fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }
}

/// Microphone capture through cpal.
///
/// The stream lives on its own thread; dropping the capture stops and joins
/// it, which releases the device.
pub struct CpalCapture {
    inner: ChannelCapture,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CpalCapture {
    pub fn open(config: &CaptureConfig) -> Result<Self, BusError> {
        let (tx, inner) = capture_channel(config.frame_bytes);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let stop = Arc::new(AtomicBool::new(false));

        let thread_config = config.clone();
        let thread_stop = Arc::clone(&stop);
        let worker = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || run_capture_thread(thread_config, tx, ready_tx, thread_stop))
            .map_err(|e| BusError::Device(format!("Failed to spawn capture thread: {}", e)))?;

        let mut capture = Self {
            inner,
            stop,
            worker: Some(worker),
        };

        match ready_rx.recv_timeout(STREAM_START_TIMEOUT) {
            Ok(Ok(())) => Ok(capture),
            Ok(Err(e)) => {
                capture.shutdown();
                Err(e)
            }
            Err(_) => {
                capture.shutdown();
                Err(BusError::Device(
                    "Capture stream did not start in time".to_string(),
                ))
            }
        }
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Capture thread panicked");
            }
        }
    }
}

impl CaptureSource for CpalCapture {
    fn read_frame(&mut self, timeout: Duration) -> Result<AudioFrame, CaptureError> {
        self.inner.read_frame(timeout)
    }

    fn frame_bytes(&self) -> usize {
        self.inner.frame_bytes()
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.shutdown();
        log::debug!("🎤 Capture stream torn down");
    }
}

fn run_capture_thread(
    config: CaptureConfig,
    tx: Sender<CaptureMessage>,
    ready: Sender<Result<(), BusError>>,
    stop: Arc<AtomicBool>,
) {
    let (raw_tx, raw_rx) = crossbeam_channel::unbounded::<Vec<f32>>();
    let (stream, mut resampler) = match build_capture_stream(&config, raw_tx, tx.clone()) {
        Ok(started) => started,
        Err(e) => {
            log::error!("❌ Failed to start capture: {}", e);
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    // Buffers from the callback are resampled here, in arrival order
    while !stop.load(Ordering::SeqCst) {
        let mono = match raw_rx.recv_timeout(Duration::from_millis(20)) {
            Ok(mono) => mono,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match resampler.process(&mono) {
            Ok(samples) => {
                let _ = tx.send(CaptureMessage::Samples(f32_to_s16le(&samples)));
            }
            Err(e) => {
                let _ = tx.send(CaptureMessage::Fault(format!("resampling failed: {}", e)));
            }
        }
    }

    if let Err(e) = stream.pause() {
        log::warn!("Failed to pause capture stream: {}", e);
    }
    drop(stream);
}

fn find_input_device(host: &cpal::Host, name: Option<&str>) -> Result<Device, BusError> {
    match name {
        Some(name) => {
            for device in host.input_devices()? {
                if device.name()? == name {
                    return Ok(device);
                }
            }
            Err(BusError::Device(format!("Input device '{}' not found", name)))
        }
        None => host
            .default_input_device()
            .ok_or_else(|| BusError::Device("No default input device found".to_string())),
    }
}

/// Prefer a native 16kHz config; otherwise take the default and resample
fn choose_input_config(
    device: &Device,
    channel: u16,
) -> Result<cpal::SupportedStreamConfig, BusError> {
    let target = cpal::SampleRate(CAPTURE_SAMPLE_RATE);
    let native = device.supported_input_configs()?.find(|range| {
        range.channels() > channel
            && range.min_sample_rate() <= target
            && range.max_sample_rate() >= target
            && matches!(
                range.sample_format(),
                SampleFormat::I16 | SampleFormat::F32
            )
    });

    match native {
        Some(range) => Ok(range.with_sample_rate(target)),
        None => {
            let fallback = device.default_input_config()?;
            if fallback.channels() <= channel {
                return Err(BusError::Device(format!(
                    "Selected channel {} is not available (device has {} channels)",
                    channel,
                    fallback.channels()
                )));
            }
            Ok(fallback)
        }
    }
}

fn build_capture_stream(
    config: &CaptureConfig,
    raw_tx: Sender<Vec<f32>>,
    fault_tx: Sender<CaptureMessage>,
) -> Result<(CpalStream, StreamResampler), BusError> {
    let host = cpal::default_host();
    log::info!("🎤 Initializing audio capture with host: {:?}", host.id());

    let device = find_input_device(&host, config.device_name.as_deref())?;
    log::info!("🎤 Using input device: {:?}", device.name());

    let supported = choose_input_config(&device, config.channel)?;
    let stream_config = supported.config();
    let resampler = StreamResampler::new(stream_config.sample_rate.0, CAPTURE_SAMPLE_RATE)
        .map_err(|e| BusError::Device(format!("Cannot resample capture audio: {}", e)))?;

    log::info!(
        "🎤 Audio capture configured: {} channels @ {}Hz (format: {:?}){}",
        stream_config.channels,
        stream_config.sample_rate.0,
        supported.sample_format(),
        if resampler.is_passthrough() {
            ""
        } else {
            ", resampling to 16kHz"
        }
    );

    let channel = config.channel as usize;
    let channels = stream_config.channels as usize;

    let stream = match supported.sample_format() {
        SampleFormat::I16 => {
            create_input_stream::<i16>(&device, &stream_config, channel, channels, raw_tx, fault_tx)?
        }
        SampleFormat::U16 => {
            create_input_stream::<u16>(&device, &stream_config, channel, channels, raw_tx, fault_tx)?
        }
        SampleFormat::F32 => {
            create_input_stream::<f32>(&device, &stream_config, channel, channels, raw_tx, fault_tx)?
        }
        other => {
            return Err(BusError::Device(format!(
                "Unsupported sample format {:?}",
                other
            )))
        }
    };

    stream.play()?;
    Ok((stream, resampler))
}

fn create_input_stream<T>(
    device: &Device,
    config: &cpal::StreamConfig,
    channel: usize,
    channels: usize,
    raw_tx: Sender<Vec<f32>>,
    fault_tx: Sender<CaptureMessage>,
) -> Result<CpalStream, BusError>
where
    T: Sample + SizedSample + Send + Sync + 'static,
    f32: FromSample<T>,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono: Vec<f32> = data
                .chunks(channels)
                .filter_map(|frame| frame.get(channel))
                .map(|s| f32::from_sample(*s))
                .collect();
            let _ = raw_tx.send(mono);
        },
        move |err| {
            log::error!("Audio stream error: {}", err);
            let _ = fault_tx.send(CaptureMessage::Fault(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}
