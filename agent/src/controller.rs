//! The push-to-talk state machine.
//!
//! One exchange runs on the calling thread from trigger edge to response:
//! the bus is taken for input, frames stream to the server while the trigger
//! is held, the response is decoded, and the bus is handed to the speaker if
//! the server sent audio back. Playback is then serviced from [`Controller::tick`]
//! so the trigger stays responsive.

use crate::connectivity::{Connectivity, StaticConnectivity};
use crate::error::AgentError;
use crate::response::{self, ResponsePayload};
use crate::status::{self, StatusDisplay};
use crate::trigger::Trigger;
use audio::{
    AudioFrame, BusArbiter, BusHandle, BusOwnership, CaptureSource, Peripheral, PlaybackSink,
    PlaybackStatus, CAPTURE_SAMPLE_RATE,
};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use upload_protocol::{Connector, Endpoint, UploadSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Capturing,
    Finalizing,
    AwaitingResponse,
    Playing,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Idle => "Idle",
            ControllerState::Capturing => "Capturing",
            ControllerState::Finalizing => "Finalizing",
            ControllerState::AwaitingResponse => "AwaitingResponse",
            ControllerState::Playing => "Playing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Longest wait for one capture frame
    pub frame_timeout: Duration,
    /// Idle time that ends an unframed response body
    pub drain_timeout: Duration,
    /// Capture ends as if the trigger were released after this long
    pub max_recording: Duration,
    /// Sleep between ticks in [`Controller::run`]
    pub poll_interval: Duration,
    /// Pause after each uploaded frame
    pub yield_interval: Duration,
    /// A trigger edge during playback stops it and starts a new capture
    pub interrupt_playback: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_millis(500),
            drain_timeout: Duration::from_secs(1),
            max_recording: Duration::from_secs(30),
            poll_interval: Duration::from_millis(10),
            yield_interval: Duration::from_millis(1),
            interrupt_playback: false,
        }
    }
}

/// Statistics for one exchange
#[derive(Debug, Default, Clone)]
pub struct ExchangeStats {
    pub frames_captured: usize,
    pub short_frames: usize,
    pub bytes_captured: usize,
    pub chunks_sent: u64,
    pub response_status: Option<u16>,
    pub playback_started: bool,
    pub exchange_start: Option<Instant>,
    pub capture_end: Option<Instant>,
    pub exchange_end: Option<Instant>,
}

impl ExchangeStats {
    fn started() -> Self {
        Self {
            exchange_start: Some(Instant::now()),
            ..Self::default()
        }
    }

    fn record_frame(&mut self, frame: &AudioFrame) {
        self.frames_captured += 1;
        self.bytes_captured += frame.len();
        if frame.is_short() {
            self.short_frames += 1;
        }
    }

    /// Seconds of audio uploaded
    pub fn audio_seconds(&self) -> f32 {
        (self.bytes_captured / 2) as f32 / CAPTURE_SAMPLE_RATE as f32
    }

    pub fn log_summary(&self) {
        if let (Some(start), Some(end)) = (self.exchange_start, self.exchange_end) {
            let capture_ms = self
                .capture_end
                .map(|c| c.duration_since(start).as_millis())
                .unwrap_or(0);
            info!(
                "📊 Exchange stats: {} frames ({} short), {} bytes ({:.2}s audio), status {}, {}ms capture, {}ms total",
                self.frames_captured,
                self.short_frames,
                self.bytes_captured,
                self.audio_seconds(),
                self.response_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                capture_ms,
                end.duration_since(start).as_millis()
            );
        }
    }
}

/// Drives trigger → capture → upload → decode → playback
pub struct Controller<P: Peripheral, C: Connector> {
    arbiter: BusArbiter<P>,
    connector: C,
    endpoint: Endpoint,
    trigger: Box<dyn Trigger>,
    display: Box<dyn StatusDisplay>,
    connectivity: Box<dyn Connectivity>,
    config: ControllerConfig,
    state: ControllerState,
    /// Set when an activation has been consumed; cleared once the trigger reads inactive
    trigger_latched: bool,
    playback: Option<BusHandle<P::Playback>>,
    history: Vec<ControllerState>,
    stats: ExchangeStats,
    shutdown: Arc<AtomicBool>,
}

impl<P: Peripheral, C: Connector> Controller<P, C> {
    pub fn new(
        peripheral: P,
        connector: C,
        endpoint: Endpoint,
        trigger: Box<dyn Trigger>,
        display: Box<dyn StatusDisplay>,
    ) -> Self {
        Self {
            arbiter: BusArbiter::new(peripheral),
            connector,
            endpoint,
            trigger,
            display,
            connectivity: Box::new(StaticConnectivity::online()),
            config: ControllerConfig::default(),
            state: ControllerState::Idle,
            trigger_latched: false,
            playback: None,
            history: vec![ControllerState::Idle],
            stats: ExchangeStats::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_connectivity(mut self, connectivity: Box<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a stop flag, e.g. with a signal handler
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// States visited by the most recent exchange, starting from `Idle`
    pub fn history(&self) -> &[ControllerState] {
        &self.history
    }

    pub fn stats(&self) -> &ExchangeStats {
        &self.stats
    }

    pub fn bus_ownership(&self) -> BusOwnership {
        self.arbiter.ownership()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Push a status line to the display
    pub fn show(&mut self, text: &str) {
        info!("📟 {}", text);
        self.display.show(text);
    }

    /// Tick until the shutdown flag is raised, then let go of the bus
    pub fn run(&mut self) {
        info!("🚀 Controller running, uploading to {}", self.endpoint);

        while !self.shutdown.load(Ordering::SeqCst) {
            self.tick();
            thread::sleep(self.config.poll_interval);
        }

        self.stop();
        info!("👋 Controller stopped");
    }

    /// Poll the trigger once and advance the state machine.
    ///
    /// A full exchange runs inside a single call when an activation is seen.
    pub fn tick(&mut self) {
        let active = self.trigger.is_active();
        if !active {
            self.trigger_latched = false;
        }
        let edge = active && !self.trigger_latched;

        match self.state {
            ControllerState::Idle => {
                if edge {
                    self.trigger_latched = true;
                    self.exchange();
                }
            }
            ControllerState::Playing => self.service_playback(edge),
            // Exchanges never leave the machine in a transient state
            other => {
                warn!("⚠️ Unexpected state {} between exchanges, resetting", other);
                self.transition(ControllerState::Idle);
            }
        }
    }

    /// Abort any playback and leave the bus unowned
    pub fn stop(&mut self) {
        if let Some(mut handle) = self.playback.take() {
            handle.stop();
            self.arbiter.release(handle);
        }
        self.transition(ControllerState::Idle);
    }

    fn transition(&mut self, next: ControllerState) {
        if self.state == next {
            return;
        }
        info!("🔄 {} → {}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Run one exchange and route any failure back to `Idle`
    fn exchange(&mut self) {
        self.history = vec![self.state];
        self.stats = ExchangeStats::started();

        if let Err(e) = self.run_exchange() {
            error!("❌ Exchange failed during {}: {}", self.state, e);
            let text = e.status_text();
            self.show(text);
            self.transition(ControllerState::Idle);
        }

        self.stats.exchange_end = Some(Instant::now());
        self.stats.log_summary();
    }

    fn run_exchange(&mut self) -> Result<(), AgentError> {
        if !self.connectivity.is_connected() {
            return Err(AgentError::Offline);
        }

        self.transition(ControllerState::Capturing);
        self.show(status::CONNECTING);

        // Dropping `input` on any early return tears capture down and frees the bus
        let mut input = self.arbiter.acquire_input()?;
        let mut session = UploadSession::open(&mut self.connector, &self.endpoint)?
            .with_drain_timeout(self.config.drain_timeout);
        self.show(status::RECORDING);

        self.stream_frames(input.endpoint_mut(), &mut session)?;
        self.stats.capture_end = Some(Instant::now());
        self.stats.chunks_sent = session.chunks_sent();

        self.transition(ControllerState::Finalizing);
        self.show(status::THINKING);
        let response = session.finish()?;
        self.stats.response_status = Some(response.status);

        if !response.is_success() {
            warn!(
                "⚠️ Server answered {} {}, decoding body anyway",
                response.status, response.reason
            );
        }

        let decoded = response::decode(&response.body).map_err(AgentError::from);
        self.arbiter.release(input);

        self.transition(ControllerState::AwaitingResponse);
        let payload = match decoded {
            Ok(payload) => {
                match payload.text.as_deref() {
                    Some(text) => {
                        info!("💬 Response: {}", text);
                        self.show(text);
                    }
                    None => self.show(status::NO_TEXT),
                }
                payload
            }
            Err(e) => {
                warn!("⚠️ {}: {:?}", e, response.body_text());
                self.show(e.status_text());
                ResponsePayload::default()
            }
        };

        match payload.audio_locator {
            Some(locator) => self.begin_playback(&locator),
            None => {
                debug!("No audio in response");
                self.transition(ControllerState::Idle);
                Ok(())
            }
        }
    }

    /// Forward frames until the trigger is released or the recording limit is hit
    fn stream_frames(
        &mut self,
        capture: &mut P::Capture,
        session: &mut UploadSession<C::Stream>,
    ) -> Result<(), AgentError> {
        let started = Instant::now();

        loop {
            if !self.trigger.is_active() {
                self.trigger_latched = false;
                info!("🛑 Trigger released after {:?}", started.elapsed());
                return Ok(());
            }
            if self.shutdown.load(Ordering::SeqCst) {
                info!("🛑 Shutdown requested, ending capture");
                return Ok(());
            }
            if started.elapsed() >= self.config.max_recording {
                warn!(
                    "⏱️ Recording limit of {:?} reached, release the trigger to talk again",
                    self.config.max_recording
                );
                return Ok(());
            }

            let frame = capture.read_frame(self.config.frame_timeout)?;
            self.stats.record_frame(&frame);
            session.write_chunk(frame.as_bytes())?;

            if !self.config.yield_interval.is_zero() {
                thread::sleep(self.config.yield_interval);
            }
        }
    }

    fn begin_playback(&mut self, locator: &str) -> Result<(), AgentError> {
        let locator = match self.endpoint.resolve(locator) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("⚠️ {}; passing locator through unchanged", e);
                locator.to_string()
            }
        };

        let mut output = self.arbiter.acquire_output()?;
        output.start(&locator)?;
        self.stats.playback_started = true;
        self.playback = Some(output);
        self.transition(ControllerState::Playing);
        Ok(())
    }

    fn service_playback(&mut self, edge: bool) {
        if edge {
            self.trigger_latched = true;
            if self.config.interrupt_playback {
                info!("⏭️ Trigger pressed during playback, interrupting");
                self.stop();
                self.exchange();
                return;
            }
            debug!("Trigger ignored during playback");
        }

        let status = match self.playback.as_mut() {
            Some(handle) => handle.poll(),
            None => PlaybackStatus::Idle,
        };

        match status {
            PlaybackStatus::Playing => return,
            PlaybackStatus::Finished => info!("✅ Playback finished"),
            PlaybackStatus::Failed(e) => error!("❌ Playback failed: {}", e),
            PlaybackStatus::Idle => warn!("⚠️ Playback ended without reporting completion"),
        }

        // The answer text stays on the display
        if let Some(handle) = self.playback.take() {
            self.arbiter.release(handle);
        }
        self.transition(ControllerState::Idle);
    }
}
