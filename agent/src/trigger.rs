use crossbeam_channel::{Receiver, TryRecvError};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Cannot read GPIO value file {path}: {source}")]
    Gpio {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start stdin listener: {0}")]
    Stdin(#[source] std::io::Error),
}

/// The push-to-talk input. Reports the current level, not edges.
pub trait Trigger {
    fn is_active(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TriggerKind {
    /// Press Enter to start talking, Enter again to stop
    Stdin,
    /// Button wired to a sysfs GPIO value file
    Gpio,
}

#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub kind: TriggerKind,
    pub gpio_path: PathBuf,
    /// A pulled-up button reads 0 while pressed
    pub active_low: bool,
    pub debounce: Duration,
}

/// Build the configured trigger, debounced when a hold time is set
pub fn build_trigger(config: &TriggerConfig) -> Result<Box<dyn Trigger>, TriggerError> {
    let raw: Box<dyn Trigger> = match config.kind {
        TriggerKind::Gpio => Box::new(GpioTrigger::open(&config.gpio_path, config.active_low)?),
        TriggerKind::Stdin => Box::new(StdinTrigger::spawn()?),
    };

    if config.debounce.is_zero() {
        Ok(raw)
    } else {
        Ok(Box::new(Debounced::new(raw, config.debounce)))
    }
}

/// Button read from a sysfs-style GPIO `value` file
#[derive(Debug)]
pub struct GpioTrigger {
    path: PathBuf,
    active_low: bool,
    read_failing: bool,
}

impl GpioTrigger {
    pub fn open(path: impl AsRef<Path>, active_low: bool) -> Result<Self, TriggerError> {
        let path = path.as_ref().to_path_buf();
        std::fs::read_to_string(&path).map_err(|source| TriggerError::Gpio {
            path: path.clone(),
            source,
        })?;

        log::info!(
            "🔘 GPIO trigger on {} (active {})",
            path.display(),
            if active_low { "low" } else { "high" }
        );
        Ok(Self {
            path,
            active_low,
            read_failing: false,
        })
    }
}

impl Trigger for GpioTrigger {
    fn is_active(&mut self) -> bool {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => {
                if self.read_failing {
                    log::info!("🔘 GPIO readable again");
                    self.read_failing = false;
                }
                raw
            }
            Err(e) => {
                // Warn once per outage; a failed read counts as released
                if !self.read_failing {
                    log::warn!("⚠️ Failed to read {}: {}", self.path.display(), e);
                    self.read_failing = true;
                }
                return false;
            }
        };

        let high = match raw.trim() {
            "1" => true,
            "0" => false,
            other => {
                log::trace!("Unexpected GPIO value {:?}", other);
                return false;
            }
        };
        high != self.active_low
    }
}

/// Enter toggles between talking and idle
pub struct StdinTrigger {
    presses: Receiver<()>,
    active: bool,
}

impl StdinTrigger {
    pub fn spawn() -> Result<Self, TriggerError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        std::thread::Builder::new()
            .name("stdin-trigger".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    if line.is_err() || tx.send(()).is_err() {
                        break;
                    }
                }
                log::debug!("stdin closed, trigger listener exiting");
            })
            .map_err(TriggerError::Stdin)?;

        log::info!("⌨️ Press Enter to start talking, Enter again to stop");
        Ok(Self::from_receiver(rx))
    }

    /// Each message on `presses` toggles the level
    pub fn from_receiver(presses: Receiver<()>) -> Self {
        Self {
            presses,
            active: false,
        }
    }
}

impl Trigger for StdinTrigger {
    fn is_active(&mut self) -> bool {
        loop {
            match self.presses.try_recv() {
                Ok(()) => {
                    self.active = !self.active;
                    log::debug!("⌨️ Trigger {}", if self.active { "on" } else { "off" });
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.active
    }
}

/// Only reports a level once it has been stable for `hold`
pub struct Debounced<T> {
    inner: T,
    hold: Duration,
    stable: bool,
    candidate: bool,
    since: Instant,
}

impl<T: Trigger> Debounced<T> {
    pub fn new(inner: T, hold: Duration) -> Self {
        Self {
            inner,
            hold,
            stable: false,
            candidate: false,
            since: Instant::now(),
        }
    }
}

impl<T: Trigger> Trigger for Debounced<T> {
    fn is_active(&mut self) -> bool {
        let raw = self.inner.is_active();
        if raw != self.candidate {
            self.candidate = raw;
            self.since = Instant::now();
        }
        if self.candidate != self.stable && self.since.elapsed() >= self.hold {
            self.stable = self.candidate;
        }
        self.stable
    }
}

impl Trigger for Box<dyn Trigger> {
    fn is_active(&mut self) -> bool {
        (**self).is_active()
    }
}

/// Trigger driven by a queue of levels, for tests and demos.
///
/// Each poll pops one level; once the queue is empty the resting level is
/// reported. Clones share the queue.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTrigger {
    levels: Rc<RefCell<VecDeque<bool>>>,
    rest: Rc<Cell<bool>>,
    polls: Rc<Cell<usize>>,
}

impl ScriptedTrigger {
    pub fn new(levels: impl IntoIterator<Item = bool>) -> Self {
        Self {
            levels: Rc::new(RefCell::new(levels.into_iter().collect())),
            ..Self::default()
        }
    }

    pub fn push(&self, levels: impl IntoIterator<Item = bool>) {
        self.levels.borrow_mut().extend(levels);
    }

    pub fn set_rest(&self, level: bool) {
        self.rest.set(level);
    }

    pub fn polls(&self) -> usize {
        self.polls.get()
    }

    pub fn remaining(&self) -> usize {
        self.levels.borrow().len()
    }
}

impl Trigger for ScriptedTrigger {
    fn is_active(&mut self) -> bool {
        self.polls.set(self.polls.get() + 1);
        self.levels
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.rest.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn gpio_file(value: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), value).unwrap();
        file
    }

    #[test]
    fn test_gpio_active_low() {
        let file = gpio_file("1\n");
        let mut trigger = GpioTrigger::open(file.path(), true).unwrap();
        assert!(!trigger.is_active());

        fs::write(file.path(), "0\n").unwrap();
        assert!(trigger.is_active());
    }

    #[test]
    fn test_gpio_active_high() {
        let file = gpio_file("1");
        let mut trigger = GpioTrigger::open(file.path(), false).unwrap();
        assert!(trigger.is_active());
    }

    #[test]
    fn test_gpio_read_failure_is_released() {
        let file = gpio_file("0");
        let path = file.path().to_path_buf();
        let mut trigger = GpioTrigger::open(&path, true).unwrap();
        assert!(trigger.is_active());

        drop(file);
        assert!(!trigger.is_active());
        assert!(!trigger.is_active());
    }

    #[test]
    fn test_gpio_missing_file() {
        let result = GpioTrigger::open("/nonexistent/gpio17/value", true);
        assert!(matches!(result, Err(TriggerError::Gpio { .. })));
    }

    #[test]
    fn test_stdin_toggles() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut trigger = StdinTrigger::from_receiver(rx);
        assert!(!trigger.is_active());

        tx.send(()).unwrap();
        assert!(trigger.is_active());
        assert!(trigger.is_active());

        tx.send(()).unwrap();
        assert!(!trigger.is_active());

        // Two presses between polls cancel out
        tx.send(()).unwrap();
        tx.send(()).unwrap();
        assert!(!trigger.is_active());
    }

    #[test]
    fn test_debounce_ignores_glitches() {
        let script = ScriptedTrigger::new([true, false, true, true]);
        script.set_rest(true);
        let mut trigger = Debounced::new(script, Duration::from_millis(20));

        // Bouncing contact never settles long enough
        for _ in 0..4 {
            assert!(!trigger.is_active());
        }

        std::thread::sleep(Duration::from_millis(30));
        assert!(trigger.is_active());
    }

    #[test]
    fn test_scripted_trigger_rest_level() {
        let mut trigger = ScriptedTrigger::new([true]);
        let handle = trigger.clone();

        assert!(trigger.is_active());
        assert!(!trigger.is_active());

        handle.set_rest(true);
        assert!(trigger.is_active());
        assert_eq!(handle.polls(), 3);
    }
}
