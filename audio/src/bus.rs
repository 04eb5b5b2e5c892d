//! Exclusive ownership of the single audio peripheral.
//!
//! The microphone and the speaker share one bus that can only be configured
//! for one direction at a time. [`BusArbiter`] hands out at most one
//! [`BusHandle`]; the handle owns the configured endpoint, and dropping it
//! tears the endpoint down before the bus is marked unowned again.

use crate::audio_sink::PlaybackSink;
use crate::audio_source::CaptureSource;
use crate::error::BusError;
use crate::types::{BusOwnership, Direction};
use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

/// A device that can be configured for capture or for playback, never both
pub trait Peripheral {
    type Capture: CaptureSource;
    type Playback: PlaybackSink;

    /// Configure the bus for input and return the live capture endpoint
    fn configure_input(&mut self) -> Result<Self::Capture, BusError>;

    /// Configure the bus for output and return the live playback endpoint
    fn configure_output(&mut self) -> Result<Self::Playback, BusError>;
}

/// Clears bus ownership when dropped
#[derive(Debug)]
struct Lease {
    owner: Rc<Cell<BusOwnership>>,
    direction: Direction,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.owner.set(None);
        log::debug!("🔓 Audio bus released ({})", self.direction);
    }
}

/// Proof of ownership of the bus in one direction, holding its endpoint
#[derive(Debug)]
pub struct BusHandle<E> {
    // Field order matters: the endpoint is torn down before the lease clears ownership
    endpoint: E,
    lease: Lease,
}

impl<E> BusHandle<E> {
    pub fn direction(&self) -> Direction {
        self.lease.direction
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut E {
        &mut self.endpoint
    }
}

impl<E> Deref for BusHandle<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.endpoint
    }
}

impl<E> DerefMut for BusHandle<E> {
    fn deref_mut(&mut self) -> &mut E {
        &mut self.endpoint
    }
}

/// Hands out exclusive ownership of a [`Peripheral`]
pub struct BusArbiter<P: Peripheral> {
    peripheral: P,
    owner: Rc<Cell<BusOwnership>>,
    acquisitions: u64,
}

impl<P: Peripheral> BusArbiter<P> {
    pub fn new(peripheral: P) -> Self {
        Self {
            peripheral,
            owner: Rc::new(Cell::new(None)),
            acquisitions: 0,
        }
    }

    /// Take the bus for capture
    pub fn acquire_input(&mut self) -> Result<BusHandle<P::Capture>, BusError> {
        self.check_free(Direction::Input)?;
        let endpoint = self.peripheral.configure_input()?;
        Ok(self.grant(endpoint, Direction::Input))
    }

    /// Take the bus for playback
    pub fn acquire_output(&mut self) -> Result<BusHandle<P::Playback>, BusError> {
        self.check_free(Direction::Output)?;
        let endpoint = self.peripheral.configure_output()?;
        Ok(self.grant(endpoint, Direction::Output))
    }

    /// Give the bus back. Always succeeds; the peripheral is left unconfigured.
    pub fn release<E>(&mut self, handle: BusHandle<E>) {
        let direction = handle.direction();
        drop(handle);
        log::info!("🔌 Audio bus {} released", direction);
    }

    /// Who holds the bus right now
    pub fn ownership(&self) -> BusOwnership {
        self.owner.get()
    }

    /// Total successful acquisitions since start-up
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions
    }

    pub fn peripheral(&self) -> &P {
        &self.peripheral
    }

    fn check_free(&self, requested: Direction) -> Result<(), BusError> {
        match self.owner.get() {
            Some(held) => {
                log::error!(
                    "🚫 Audio bus requested for {} while held for {}",
                    requested,
                    held
                );
                Err(BusError::Busy { held, requested })
            }
            None => Ok(()),
        }
    }

    fn grant<E>(&mut self, endpoint: E, direction: Direction) -> BusHandle<E> {
        self.owner.set(Some(direction));
        self.acquisitions += 1;
        log::info!("🔒 Audio bus configured for {}", direction);

        BusHandle {
            endpoint,
            lease: Lease {
                owner: Rc::clone(&self.owner),
                direction,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_device::{BusEvent, MockPeripheral};

    #[test]
    fn test_single_owner() {
        let mut arbiter = BusArbiter::new(MockPeripheral::new());

        let input = arbiter.acquire_input().unwrap();
        assert_eq!(arbiter.ownership(), Some(Direction::Input));

        assert!(matches!(
            arbiter.acquire_output(),
            Err(BusError::Busy {
                held: Direction::Input,
                requested: Direction::Output
            })
        ));
        assert!(matches!(arbiter.acquire_input(), Err(BusError::Busy { .. })));

        arbiter.release(input);
        assert_eq!(arbiter.ownership(), None);

        let output = arbiter.acquire_output().unwrap();
        assert_eq!(output.direction(), Direction::Output);
        assert_eq!(arbiter.acquisitions(), 2);
    }

    #[test]
    fn test_direction_switch_tears_down_first() {
        let peripheral = MockPeripheral::new();
        let journal = peripheral.journal();
        let mut arbiter = BusArbiter::new(peripheral);

        let input = arbiter.acquire_input().unwrap();
        arbiter.release(input);
        let output = arbiter.acquire_output().unwrap();
        arbiter.release(output);

        assert_eq!(
            journal.events(),
            vec![
                BusEvent::InputConfigured,
                BusEvent::InputTornDown,
                BusEvent::OutputConfigured,
                BusEvent::OutputTornDown,
            ]
        );
    }

    #[test]
    fn test_dropping_handle_releases() {
        let mut arbiter = BusArbiter::new(MockPeripheral::new());
        {
            let _input = arbiter.acquire_input().unwrap();
            assert_eq!(arbiter.ownership(), Some(Direction::Input));
        }
        assert_eq!(arbiter.ownership(), None);
        assert!(arbiter.acquire_output().is_ok());
    }

    #[test]
    fn test_failed_configure_leaves_bus_free() {
        let mut arbiter = BusArbiter::new(MockPeripheral::new().with_broken_input());

        assert!(matches!(arbiter.acquire_input(), Err(BusError::Device(_))));
        assert_eq!(arbiter.ownership(), None);
        assert_eq!(arbiter.acquisitions(), 0);
    }
}
