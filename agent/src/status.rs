//! Status strings and the surface they are pushed to.
//!
//! The display is a single short line, so every string here must fit a
//! small screen.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

pub const CONNECTING: &str = "Connecting...";
pub const RECORDING: &str = "Recording...";
pub const THINKING: &str = "Thinking...";

/// Shown when the server gave us nothing to display
pub const NO_TEXT: &str = "Error/No Text";
pub const CONN_FAILED: &str = "Conn Failed";
pub const UPLOAD_FAILED: &str = "Upload Failed";
pub const NO_RESPONSE: &str = "No Response";
pub const MIC_ERROR: &str = "Mic Error";
pub const MIC_TIMEOUT: &str = "Mic Timeout";
pub const BUS_BUSY: &str = "Bus Busy";
pub const AUDIO_ERROR: &str = "Audio Error";
pub const NO_NETWORK: &str = "No Network";

pub const NETWORK_CONNECTING: &str = "Connecting network...";
pub const NETWORK_CONNECTED: &str = "Network Connected";
pub const READY: &str = "Ready. Hold Button";

/// Where status lines go
pub trait StatusDisplay {
    fn show(&mut self, status: &str);
}

/// Writes each status on its own line to stdout
#[derive(Debug, Default)]
pub struct ConsoleDisplay;

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self
    }
}

impl StatusDisplay for ConsoleDisplay {
    fn show(&mut self, status: &str) {
        let mut stdout = std::io::stdout().lock();
        if writeln!(stdout, "📟 {}", status).and_then(|_| stdout.flush()).is_err() {
            log::warn!("Failed to write status to stdout");
        }
    }
}

/// Keeps every status shown; clones share the same history
#[derive(Debug, Clone, Default)]
pub struct RecordingDisplay {
    shown: Rc<RefCell<Vec<String>>>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<String> {
        self.shown.borrow().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.shown.borrow().last().cloned()
    }

    pub fn clear(&self) {
        self.shown.borrow_mut().clear();
    }
}

impl StatusDisplay for RecordingDisplay {
    fn show(&mut self, status: &str) {
        self.shown.borrow_mut().push(status.to_string());
    }
}
