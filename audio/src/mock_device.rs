//! Scriptable stand-in for the audio peripheral.
//!
//! Records every configure/teardown in a shared [`Journal`] so tests can
//! assert ordering across the bus, and plays back canned capture scripts.

use crate::audio_sink::{PlaybackSink, PlaybackStatus};
use crate::audio_source::{capture_channel, CaptureMessage, CaptureSource, ChannelCapture};
use crate::bus::Peripheral;
use crate::error::{BusError, CaptureError, PlaybackError};
use crate::types::{AudioFrame, DEFAULT_FRAME_BYTES};
use crossbeam_channel::Sender;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    InputConfigured,
    InputTornDown,
    OutputConfigured,
    OutputTornDown,
    PlaybackStarted(String),
    PlaybackStopped,
}

/// Shared record of what happened on the mock bus
#[derive(Debug, Clone, Default)]
pub struct Journal {
    events: Rc<RefCell<Vec<BusEvent>>>,
    frame_reads: Rc<Cell<usize>>,
}

impl Journal {
    pub fn events(&self) -> Vec<BusEvent> {
        self.events.borrow().clone()
    }

    pub fn count(&self, event: &BusEvent) -> usize {
        self.events.borrow().iter().filter(|e| *e == event).count()
    }

    /// Calls to `read_frame` across all capture endpoints
    pub fn frame_reads(&self) -> usize {
        self.frame_reads.get()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
        self.frame_reads.set(0);
    }

    fn push(&self, event: BusEvent) {
        log::trace!("mock bus: {:?}", event);
        self.events.borrow_mut().push(event);
    }
}

/// Capture endpoint fed from a script. The sender stays alive so an
/// exhausted script times out instead of reporting a closed stream.
pub struct MockCapture {
    inner: ChannelCapture,
    _tx: Sender<CaptureMessage>,
    journal: Journal,
}

impl CaptureSource for MockCapture {
    fn read_frame(&mut self, timeout: Duration) -> Result<AudioFrame, CaptureError> {
        self.journal.frame_reads.set(self.journal.frame_reads.get() + 1);
        self.inner.read_frame(timeout)
    }

    fn frame_bytes(&self) -> usize {
        self.inner.frame_bytes()
    }
}

impl Drop for MockCapture {
    fn drop(&mut self) {
        self.journal.push(BusEvent::InputTornDown);
    }
}

/// How a mock playback should end
#[derive(Debug, Clone)]
pub struct PlaybackScript {
    /// Polls reporting `Playing` before the outcome
    pub polls: usize,
    /// `None` finishes cleanly
    pub failure: Option<PlaybackError>,
    /// Reject `start` outright
    pub start_failure: Option<PlaybackError>,
}

impl Default for PlaybackScript {
    fn default() -> Self {
        Self {
            polls: 2,
            failure: None,
            start_failure: None,
        }
    }
}

pub struct MockPlayback {
    script: PlaybackScript,
    remaining: Option<usize>,
    status: PlaybackStatus,
    journal: Journal,
}

impl PlaybackSink for MockPlayback {
    fn start(&mut self, locator: &str) -> Result<(), PlaybackError> {
        if self.remaining.is_some() {
            return Err(PlaybackError::Busy);
        }
        if let Some(err) = self.script.start_failure.clone() {
            return Err(err);
        }
        self.journal.push(BusEvent::PlaybackStarted(locator.to_string()));
        self.remaining = Some(self.script.polls);
        self.status = PlaybackStatus::Playing;
        Ok(())
    }

    fn poll(&mut self) -> PlaybackStatus {
        match self.remaining {
            Some(0) => {
                self.remaining = None;
                self.status = match self.script.failure.clone() {
                    Some(err) => PlaybackStatus::Failed(err),
                    None => PlaybackStatus::Finished,
                };
            }
            Some(n) => self.remaining = Some(n - 1),
            None => {}
        }
        self.status.clone()
    }

    fn stop(&mut self) {
        if self.remaining.take().is_some() {
            self.journal.push(BusEvent::PlaybackStopped);
        }
        self.status = PlaybackStatus::Idle;
    }
}

impl Drop for MockPlayback {
    fn drop(&mut self) {
        self.journal.push(BusEvent::OutputTornDown);
    }
}

/// A fake peripheral with scripted capture and playback behaviour
pub struct MockPeripheral {
    journal: Journal,
    frame_bytes: usize,
    captures: VecDeque<Vec<CaptureMessage>>,
    playback: PlaybackScript,
    broken_input: bool,
    broken_output: bool,
}

impl Default for MockPeripheral {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPeripheral {
    pub fn new() -> Self {
        Self {
            journal: Journal::default(),
            frame_bytes: DEFAULT_FRAME_BYTES,
            captures: VecDeque::new(),
            playback: PlaybackScript::default(),
            broken_input: false,
            broken_output: false,
        }
    }

    pub fn with_frame_bytes(mut self, frame_bytes: usize) -> Self {
        self.frame_bytes = frame_bytes;
        self
    }

    /// Queue the audio one capture session will see, in order
    pub fn with_capture(mut self, chunks: Vec<Vec<u8>>) -> Self {
        self.captures
            .push_back(chunks.into_iter().map(CaptureMessage::Samples).collect());
        self
    }

    /// Queue a capture session that delivers `chunks` and then faults
    pub fn with_faulty_capture(mut self, chunks: Vec<Vec<u8>>, reason: &str) -> Self {
        let mut script: Vec<CaptureMessage> =
            chunks.into_iter().map(CaptureMessage::Samples).collect();
        script.push(CaptureMessage::Fault(reason.to_string()));
        self.captures.push_back(script);
        self
    }

    pub fn with_playback(mut self, script: PlaybackScript) -> Self {
        self.playback = script;
        self
    }

    pub fn with_broken_input(mut self) -> Self {
        self.broken_input = true;
        self
    }

    pub fn with_broken_output(mut self) -> Self {
        self.broken_output = true;
        self
    }

    /// Handle to the shared journal; stays valid after the peripheral moves
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

impl Peripheral for MockPeripheral {
    type Capture = MockCapture;
    type Playback = MockPlayback;

    fn configure_input(&mut self) -> Result<MockCapture, BusError> {
        if self.broken_input {
            return Err(BusError::Device("mock input unavailable".to_string()));
        }

        let (tx, inner) = capture_channel(self.frame_bytes);
        for message in self.captures.pop_front().unwrap_or_default() {
            let _ = tx.send(message);
        }

        self.journal.push(BusEvent::InputConfigured);
        Ok(MockCapture {
            inner,
            _tx: tx,
            journal: self.journal.clone(),
        })
    }

    fn configure_output(&mut self) -> Result<MockPlayback, BusError> {
        if self.broken_output {
            return Err(BusError::Device("mock output unavailable".to_string()));
        }

        self.journal.push(BusEvent::OutputConfigured);
        Ok(MockPlayback {
            script: self.playback.clone(),
            remaining: None,
            status: PlaybackStatus::Idle,
            journal: self.journal.clone(),
        })
    }
}
