use crate::error::{BusError, PlaybackError};
use crate::resampler::Resampler;
use crate::types::PlaybackConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream as CpalStream};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Largest audio payload we are willing to download
pub const MAX_AUDIO_BYTES: u64 = 16 * 1024 * 1024;

/// A configured speaker endpoint that plays audio referenced by a locator
pub trait PlaybackSink {
    /// Begin playing `locator`. Returns once playback has been handed off.
    fn start(&mut self, locator: &str) -> Result<(), PlaybackError>;

    /// Non-blocking progress check
    fn poll(&mut self) -> PlaybackStatus;

    /// Abort playback. Safe to call when nothing is playing.
    fn stop(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Finished,
    Failed(PlaybackError),
}

impl PlaybackStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, PlaybackStatus::Finished | PlaybackStatus::Failed(_))
    }
}

/// Mono f32 audio at its native rate
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Decode a downloaded payload: WAV when it starts with RIFF, MP3 otherwise
pub fn decode_audio(bytes: &[u8]) -> Result<DecodedAudio, PlaybackError> {
    if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)
    } else {
        decode_mp3(bytes)
    }
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, PlaybackError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| PlaybackError::Decode(format!("WAV header: {}", e)))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| PlaybackError::Decode(format!("WAV samples: {}", e)))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| PlaybackError::Decode(format!("WAV samples: {}", e)))?
        }
    };

    let samples = mix_to_mono(&interleaved, spec.channels as usize);
    if samples.is_empty() {
        return Err(PlaybackError::Decode("WAV contains no samples".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

fn decode_mp3(bytes: &[u8]) -> Result<DecodedAudio, PlaybackError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;
                let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(mix_to_mono(&pcm, frame.channels));
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => continue,
            Err(e) => return Err(PlaybackError::Decode(format!("MP3 decode error: {}", e))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(PlaybackError::Decode("no MP3 frames found".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

fn mix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Scale samples by `volume` (clamped to 0.0..=1.0)
pub fn apply_gain(samples: &mut [f32], volume: f32) {
    let gain = volume.clamp(0.0, 1.0);
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
}

/// Download the locator into memory
pub fn fetch_audio(agent: &ureq::Agent, locator: &str) -> Result<Vec<u8>, PlaybackError> {
    log::info!("📥 Fetching audio from {}", locator);

    let response = agent.get(locator).call().map_err(|e| match e {
        ureq::Error::Status(code, _) => PlaybackError::Fetch(format!("HTTP {}", code)),
        ureq::Error::Transport(t) => PlaybackError::Fetch(t.to_string()),
    })?;

    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_AUDIO_BYTES + 1)
        .read_to_end(&mut bytes)
        .map_err(|e| PlaybackError::Fetch(e.to_string()))?;

    if bytes.len() as u64 > MAX_AUDIO_BYTES {
        return Err(PlaybackError::Fetch(format!(
            "audio larger than {} bytes",
            MAX_AUDIO_BYTES
        )));
    }

    log::debug!("📥 Fetched {} bytes of audio", bytes.len());
    Ok(bytes)
}

enum PlaybackEvent {
    Finished,
    Failed(PlaybackError),
}

const LOADING: u8 = 0;
const ON_DEVICE: u8 = 1;
const ABORTED: u8 = 2;

/// How far the worker has got. Once aborted it never reaches the device.
#[derive(Clone, Default)]
struct Phase(Arc<AtomicU8>);

impl Phase {
    /// Claim the output device; fails once aborted
    fn enter_device(&self) -> bool {
        self.0
            .compare_exchange(LOADING, ON_DEVICE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Abort the worker. True if it already holds the device.
    fn abort(&self) -> bool {
        self.0.swap(ABORTED, Ordering::SeqCst) == ON_DEVICE
    }

    fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst) == ABORTED
    }
}

struct ActivePlayback {
    events: Receiver<PlaybackEvent>,
    phase: Phase,
    worker: Option<JoinHandle<()>>,
}

impl ActivePlayback {
    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Playback thread panicked");
            }
        }
    }
}

/// Speaker output through cpal.
///
/// `start` hands the locator to a worker thread that downloads, decodes,
/// resamples and plays it; `poll` reports progress from that thread.
pub struct CpalPlayback {
    config: PlaybackConfig,
    agent: ureq::Agent,
    active: Option<ActivePlayback>,
    last: PlaybackStatus,
}

impl CpalPlayback {
    /// Check the output device exists and prepare the HTTP agent
    pub fn open(config: &PlaybackConfig) -> Result<Self, BusError> {
        let host = cpal::default_host();
        let device = find_output_device(&host, config.device_name.as_deref())
            .map_err(|e| BusError::Device(e.to_string()))?;
        log::info!("🔊 Using output device: {:?}", device.name());

        Ok(Self::headless(config.clone()))
    }

    /// Build without touching the audio host. Device errors surface on `poll`.
    pub fn headless(config: PlaybackConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.fetch_timeout)
            .timeout(config.fetch_timeout)
            .build();

        Self {
            config,
            agent,
            active: None,
            last: PlaybackStatus::Idle,
        }
    }
}

impl PlaybackSink for CpalPlayback {
    fn start(&mut self, locator: &str) -> Result<(), PlaybackError> {
        if self.active.is_some() {
            return Err(PlaybackError::Busy);
        }
        if locator.trim().is_empty() {
            return Err(PlaybackError::Fetch("empty locator".to_string()));
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        let phase = Phase::default();

        let worker_locator = locator.to_string();
        let worker_agent = self.agent.clone();
        let worker_config = self.config.clone();
        let worker_phase = phase.clone();

        let worker = std::thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                run_playback(
                    worker_locator,
                    worker_agent,
                    worker_config,
                    worker_phase,
                    tx,
                )
            })
            .map_err(|e| PlaybackError::Device(format!("Failed to spawn playback thread: {}", e)))?;

        self.active = Some(ActivePlayback {
            events: rx,
            phase,
            worker: Some(worker),
        });
        self.last = PlaybackStatus::Playing;
        log::info!("▶️ Playback started: {}", locator);
        Ok(())
    }

    fn poll(&mut self) -> PlaybackStatus {
        let Some(active) = self.active.as_mut() else {
            return self.last.clone();
        };

        let status = match active.events.try_recv() {
            Err(TryRecvError::Empty) => return PlaybackStatus::Playing,
            Ok(PlaybackEvent::Finished) => PlaybackStatus::Finished,
            Ok(PlaybackEvent::Failed(e)) => PlaybackStatus::Failed(e),
            Err(TryRecvError::Disconnected) => PlaybackStatus::Failed(PlaybackError::Device(
                "playback thread exited".to_string(),
            )),
        };

        active.join();
        self.active = None;
        self.last = status.clone();
        status
    }

    fn stop(&mut self) {
        if let Some(mut active) = self.active.take() {
            if active.phase.abort() {
                // The device must be released before the bus changes hands
                active.join();
            } else {
                // Still downloading or decoding; the worker drops its result
                log::debug!("Detaching playback worker before it reached the device");
            }
            log::info!("⏹️ Playback stopped");
        }
        self.last = PlaybackStatus::Idle;
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.stop();
        log::debug!("🔊 Playback endpoint torn down");
    }
}

fn run_playback(
    locator: String,
    agent: ureq::Agent,
    config: PlaybackConfig,
    phase: Phase,
    events: Sender<PlaybackEvent>,
) {
    let result = fetch_audio(&agent, &locator)
        .and_then(|bytes| decode_audio(&bytes))
        .and_then(|audio| {
            if !phase.enter_device() {
                log::debug!("Playback aborted before reaching the device");
                return Ok(());
            }
            play_on_device(&config, audio, &phase)
        });

    let event = match result {
        Ok(()) => PlaybackEvent::Finished,
        Err(e) => {
            log::error!("❌ Playback failed: {}", e);
            PlaybackEvent::Failed(e)
        }
    };
    let _ = events.send(event);
}

fn find_output_device(host: &cpal::Host, name: Option<&str>) -> Result<Device, PlaybackError> {
    match name {
        Some(name) => {
            for device in host.output_devices()? {
                if device.name()? == name {
                    return Ok(device);
                }
            }
            Err(PlaybackError::Device(format!(
                "Output device '{}' not found",
                name
            )))
        }
        None => host
            .default_output_device()
            .ok_or_else(|| PlaybackError::Device("No output device available".to_string())),
    }
}

fn play_on_device(
    config: &PlaybackConfig,
    audio: DecodedAudio,
    phase: &Phase,
) -> Result<(), PlaybackError> {
    let host = cpal::default_host();
    let device = find_output_device(&host, config.device_name.as_deref())?;
    let supported = device.default_output_config()?;
    let stream_config = supported.config();
    let device_rate = stream_config.sample_rate.0;

    let clip_length = audio.duration();
    let mut samples = Resampler::new(audio.sample_rate, device_rate)
        .process(&audio.samples)
        .map_err(|e| PlaybackError::Decode(format!("resampling failed: {}", e)))?;
    apply_gain(&mut samples, config.volume);

    log::info!(
        "🔊 Playing {:.1}s of audio ({}Hz → {}Hz, {}ch, {:?})",
        clip_length.as_secs_f32(),
        audio.sample_rate,
        device_rate,
        stream_config.channels,
        supported.sample_format()
    );

    let samples = Arc::new(samples);
    let position = Arc::new(AtomicUsize::new(0));

    let stream = match supported.sample_format() {
        SampleFormat::I16 => {
            create_output_stream::<i16>(&device, &stream_config, &samples, &position)?
        }
        SampleFormat::U16 => {
            create_output_stream::<u16>(&device, &stream_config, &samples, &position)?
        }
        SampleFormat::F32 => {
            create_output_stream::<f32>(&device, &stream_config, &samples, &position)?
        }
        other => {
            return Err(PlaybackError::Device(format!(
                "Unsupported sample format {:?}",
                other
            )))
        }
    };
    stream.play()?;

    let deadline = Instant::now() + clip_length + Duration::from_secs(2);
    while position.load(Ordering::Relaxed) < samples.len() {
        if phase.is_aborted() {
            log::debug!("Playback aborted");
            return Ok(());
        }
        if Instant::now() > deadline {
            log::warn!("⚠️ Playback did not drain in time, stopping");
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    // Let the device flush its last buffer
    std::thread::sleep(Duration::from_millis(100));
    drop(stream);
    log::info!("✅ Playback complete");
    Ok(())
}

fn create_output_stream<T>(
    device: &Device,
    config: &cpal::StreamConfig,
    samples: &Arc<Vec<f32>>,
    position: &Arc<AtomicUsize>,
) -> Result<CpalStream, PlaybackError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = config.channels as usize;
    let samples = Arc::clone(samples);
    let position = Arc::clone(position);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let mut pos = position.load(Ordering::Relaxed);
            for frame in data.chunks_mut(channels) {
                let sample = samples.get(pos).copied().unwrap_or(0.0);
                for out in frame.iter_mut() {
                    *out = T::from_sample(sample);
                }
                if pos < samples.len() {
                    pos += 1;
                }
            }
            position.store(pos, Ordering::Relaxed);
        },
        |err| log::error!("CPAL stream error: {}", err),
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    fn wav_bytes(channels: u16, frames: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for sample in frames {
                writer.write_sample(*sample).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    /// Serve `body` once over HTTP and return its URL
    fn serve_once(body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut scratch = [0u8; 1024];
            let _ = stream.read(&mut scratch);
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: audio/mpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
        });
        format!("http://127.0.0.1:{}/reply.mp3", port)
    }

    fn wait_until_done(sink: &mut CpalPlayback) -> PlaybackStatus {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let status = sink.poll();
            if status.is_done() || Instant::now() > deadline {
                return status;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_decode_mono_wav() {
        let audio = decode_audio(&wav_bytes(1, &[0, 16384, -16384, 32767])).unwrap();

        assert_eq!(audio.sample_rate, 22050);
        assert_eq!(audio.samples.len(), 4);
        assert!((audio.samples[1] - 0.5).abs() < 0.001);
        assert!((audio.samples[2] + 0.5).abs() < 0.001);
    }

    #[test]
    fn test_decode_stereo_wav_mixes_down() {
        let audio = decode_audio(&wav_bytes(2, &[16384, 0, -16384, -16384])).unwrap();

        assert_eq!(audio.samples.len(), 2);
        assert!((audio.samples[0] - 0.25).abs() < 0.001);
        assert!((audio.samples[1] + 0.5).abs() < 0.001);
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        assert!(matches!(
            decode_audio(b"definitely not audio"),
            Err(PlaybackError::Decode(_))
        ));
        assert!(matches!(
            decode_audio(b"RIFF\x00\x00"),
            Err(PlaybackError::Decode(_))
        ));
    }

    #[test]
    fn test_gain_is_clamped() {
        let mut samples = vec![1.0, -0.5];
        apply_gain(&mut samples, 0.5);
        assert_eq!(samples, vec![0.5, -0.25]);

        apply_gain(&mut samples, 3.0);
        assert_eq!(samples, vec![0.5, -0.25]);
    }

    #[test]
    fn test_duration() {
        let audio = DecodedAudio {
            samples: vec![0.0; 8000],
            sample_rate: 16000,
        };
        assert_eq!(audio.duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_unreachable_locator_fails_through_poll() {
        let _ = env_logger::builder().is_test(true).try_init();

        // Grab a free port, then close it so nothing is listening
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut sink = CpalPlayback::headless(PlaybackConfig {
            fetch_timeout: Duration::from_secs(2),
            ..PlaybackConfig::default()
        });

        sink.start(&format!("http://127.0.0.1:{}/y.mp3", port))
            .unwrap();
        assert!(matches!(
            wait_until_done(&mut sink),
            PlaybackStatus::Failed(PlaybackError::Fetch(_))
        ));

        // Terminal status sticks until the next start
        assert!(matches!(sink.poll(), PlaybackStatus::Failed(_)));
    }

    #[test]
    fn test_undecodable_download_fails_through_poll() {
        let url = serve_once(b"<html>not found</html>".to_vec());
        let mut sink = CpalPlayback::headless(PlaybackConfig::default());

        sink.start(&url).unwrap();
        assert!(matches!(
            wait_until_done(&mut sink),
            PlaybackStatus::Failed(PlaybackError::Decode(_))
        ));
    }

    #[test]
    fn test_empty_locator_rejected() {
        let mut sink = CpalPlayback::headless(PlaybackConfig::default());
        assert!(matches!(sink.start("  "), Err(PlaybackError::Fetch(_))));
        assert_eq!(sink.poll(), PlaybackStatus::Idle);
    }

    #[test]
    fn test_stop_does_not_wait_for_a_stalled_download() {
        let _ = env_logger::builder().is_test(true).try_init();

        // Accepts the request and never answers
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            std::thread::sleep(Duration::from_secs(5));
            drop(stream);
        });

        let mut sink = CpalPlayback::headless(PlaybackConfig::default());
        sink.start(&format!("http://127.0.0.1:{}/slow.mp3", port))
            .unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(sink.poll(), PlaybackStatus::Playing);

        let started = Instant::now();
        sink.stop();

        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(sink.poll(), PlaybackStatus::Idle);
        // A new clip can start right away
        assert!(sink.start("http://127.0.0.1:9/next.mp3").is_ok());
        sink.stop();
    }

    #[test]
    fn test_aborted_phase_never_reaches_the_device() {
        let phase = Phase::default();
        assert!(!phase.abort());
        assert!(!phase.enter_device());
        assert!(phase.is_aborted());

        let phase = Phase::default();
        assert!(phase.enter_device());
        assert!(phase.abort());
    }

    #[test]
    fn test_stop_when_idle_is_harmless() {
        let mut sink = CpalPlayback::headless(PlaybackConfig::default());
        sink.stop();
        assert_eq!(sink.poll(), PlaybackStatus::Idle);
    }
}
