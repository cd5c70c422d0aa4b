// Licensed under the Apache-2.0 license

//! Shared I2C bus: ownership arbitration plus the interrupt-driven transfer
//! engine, behind one critical-section lock.
//!
//! Devices queue for the bus with [`SharedBus::request`]. The head of the queue
//! owns the bus; the peripheral's target register always holds its address.
//! Only the owner may start transfers, and transfers complete from
//! [`I2cBus::on_interrupt`], which notifies the [`BusEvent`] passed with the
//! transfer.
//!
//! Every method that touches bus state takes the critical section for the
//! shortest possible span: queue edits and FIFO loads only, no logging and no
//! waiting.

use core::cell::RefCell;

use critical_section::{CriticalSection, Mutex};

use crate::common::{Logger, NoOpLogger};
use crate::i2c::arbiter::{Admission, Arbiter, Departure, ReleaseOutcome, RequestOutcome};
use crate::i2c::common::{BusPins, Error, I2cConfig, TransferFlags};
use crate::i2c::device::{BusDevice, DeviceId};
use crate::i2c::interrupt_registry::InterruptHandler;
use crate::i2c::transfer::{Service, Transfer, TransferState};
use crate::i2c::traits::I2cPeripheral;

/// Highest address the target register accepts (10-bit addressing).
const MAX_ADDRESS: u16 = 0x3FF;

/// Notification hook fired by the bus.
///
/// Called with the bus lock held, either from the interrupt handler (transfer
/// completion) or from within [`SharedBus::release`] (bus ownership handed to
/// a waiting device). Implementations should do no more than record the
/// event; the device's mainline code picks it up later.
pub trait BusEvent: Sync {
    fn notify(&self, cs: CriticalSection<'_>, device: BusDevice);
}

/// Arbitrated access to one I2C peripheral.
///
/// `'a` bounds the notification hooks the bus keeps between calls.
pub trait SharedBus<'a> {
    /// Hand out an identity for a device answering at `address`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParameter`] for addresses above 10 bits or when the
    /// identities are exhausted.
    fn register_device(&self, address: u16) -> Result<BusDevice, Error>;

    /// Ask for ownership. A deferred device gets `ready` notified exactly once
    /// when it reaches the head of the queue.
    fn request(&self, device: &BusDevice, ready: Option<&'a dyn BusEvent>) -> RequestOutcome;

    /// Give up ownership or withdraw a queued request.
    fn release(&self, device: &BusDevice) -> ReleaseOutcome;

    fn is_active_device(&self, device: &BusDevice) -> bool;

    /// Load `data` into the transmit FIFO. `done` fires once the FIFO drains.
    ///
    /// # Errors
    ///
    /// [`Error::NotActive`] if `device` does not own the bus,
    /// [`Error::Detached`] while detached, [`Error::FifoFull`] if `data` does
    /// not fit, [`Error::TransferPending`] during a read,
    /// [`Error::InvalidParameter`] for empty `data`.
    fn write(
        &self,
        device: &BusDevice,
        flags: TransferFlags,
        data: &[u8],
        done: Option<&'a dyn BusEvent>,
    ) -> Result<(), Error>;

    /// Read `len` bytes. `done` fires once all of them arrived; collect them
    /// with [`SharedBus::read_result`].
    ///
    /// # Errors
    ///
    /// As for [`SharedBus::write`]; [`Error::TransferPending`] also when a
    /// completion is still outstanding.
    fn read(
        &self,
        device: &BusDevice,
        flags: TransferFlags,
        len: usize,
        done: &'a dyn BusEvent,
    ) -> Result<(), Error>;

    /// Copy the bytes of the last finished read into `out`.
    ///
    /// # Errors
    ///
    /// [`Error::NotActive`] if the read was not issued by `device`,
    /// [`Error::TransferPending`] while it is still running.
    fn read_result(&self, device: &BusDevice, out: &mut [u8]) -> Result<usize, Error>;

    /// Address the general call address (0x00) instead of the device.
    ///
    /// # Errors
    ///
    /// [`Error::NotActive`] for a non-owner, [`Error::BusBusy`] while a
    /// transfer is in flight.
    fn set_general_call_mode(&self, device: &BusDevice, enabled: bool) -> Result<(), Error>;

    /// # Errors
    ///
    /// [`Error::NotActive`] for a non-owner.
    fn is_general_call_mode(&self, device: &BusDevice) -> Result<bool, Error>;

    fn bus_pins(&self) -> BusPins;

    /// Move the peripheral to another pin pair.
    ///
    /// # Errors
    ///
    /// [`Error::NotActive`] for a non-owner, [`Error::BusBusy`] while a
    /// transfer is in flight.
    fn set_bus_pins(&self, device: &BusDevice, pins: BusPins) -> Result<(), Error>;

    /// Shut the peripheral down and hand the pins back to plain GPIO.
    ///
    /// # Errors
    ///
    /// [`Error::NotActive`] for a non-owner, [`Error::BusBusy`] while a
    /// transfer is in flight.
    fn detach(&self, device: &BusDevice) -> Result<(), Error>;

    /// Bring the peripheral back up, addressing `device` at its current
    /// address.
    ///
    /// # Errors
    ///
    /// [`Error::NotActive`] for a non-owner.
    fn reattach(&self, device: &BusDevice) -> Result<(), Error>;
}

struct BusState<'a, H, const N: usize> {
    hardware: H,
    config: I2cConfig,
    arbiter: Arbiter<'a, N>,
    transfer: Transfer<'a>,
    attached: bool,
    next_id: u8,
}

impl<H: I2cPeripheral, const N: usize> BusState<'_, H, N> {
    fn owner(&self, device: &BusDevice) -> Result<(), Error> {
        if self.arbiter.is_active(device.id()) {
            Ok(())
        } else {
            Err(Error::NotActive)
        }
    }

    fn ready_for_transfer(&self, device: &BusDevice) -> Result<(), Error> {
        self.owner(device)?;
        if self.attached {
            Ok(())
        } else {
            Err(Error::Detached)
        }
    }

    fn wire_busy(&self) -> bool {
        self.transfer.is_in_progress() || self.hardware.is_active()
    }

    fn idle_owner(&self, device: &BusDevice) -> Result<(), Error> {
        self.owner(device)?;
        if self.wire_busy() {
            Err(Error::BusBusy)
        } else {
            Ok(())
        }
    }
}

/// One I2C peripheral shared by up to `N` devices.
///
/// Place it in a `static` (or anything outliving the devices) and bind its
/// interrupt through [`crate::i2c::interrupt_registry::InterruptRegistry`].
pub struct I2cBus<'a, H, L: Logger = NoOpLogger, const N: usize = 8> {
    state: Mutex<RefCell<BusState<'a, H, N>>>,
    logger: L,
}

impl<'a, H: I2cPeripheral, L: Logger, const N: usize> I2cBus<'a, H, L, N> {
    /// Bring the peripheral up with `config` and start with an empty queue.
    pub fn new(mut hardware: H, config: I2cConfig, logger: L) -> Self {
        hardware.init(&config);
        Self {
            state: Mutex::new(RefCell::new(BusState {
                hardware,
                config,
                arbiter: Arbiter::new(),
                transfer: Transfer::new(),
                attached: true,
                next_id: 0,
            })),
            logger,
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut BusState<'a, H, N>, CriticalSection<'_>) -> R) -> R {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            f(&mut *state, cs)
        })
    }

    /// Device currently owning the bus.
    pub fn active_device(&self) -> Option<BusDevice> {
        self.with_state(|state, _| state.arbiter.active())
    }

    pub fn transfer_state(&self) -> TransferState {
        self.with_state(|state, _| state.transfer.state())
    }

    /// Service the peripheral's interrupt.
    ///
    /// Call this from the interrupt vector of the peripheral, usually through
    /// [`crate::i2c::interrupt_registry::InterruptRegistry::dispatch`].
    pub fn on_interrupt(&self) {
        let outcome = self.with_state(|state, cs| {
            let BusState {
                hardware, transfer, ..
            } = state;
            transfer.service(hardware, cs)
        });
        match outcome {
            Service::Ignored => self.logger.trace(format_args!("i2c: spurious interrupt")),
            Service::Continued => {}
            Service::Completed => self.logger.trace(format_args!("i2c: transfer complete")),
        }
    }
}

impl<'a, H: I2cPeripheral, L: Logger, const N: usize> SharedBus<'a> for I2cBus<'a, H, L, N> {
    fn register_device(&self, address: u16) -> Result<BusDevice, Error> {
        if address > MAX_ADDRESS {
            return Err(Error::InvalidParameter);
        }
        self.with_state(|state, _| {
            let id = state.next_id;
            state.next_id = id.checked_add(1).ok_or(Error::InvalidParameter)?;
            Ok(BusDevice::new(DeviceId::new(id), address))
        })
    }

    fn request(&self, device: &BusDevice, ready: Option<&'a dyn BusEvent>) -> RequestOutcome {
        let outcome = self.with_state(|state, _| {
            let admission = state.arbiter.request(*device, ready);
            if admission == Admission::Activated {
                state.hardware.set_target_address(device.address());
            }
            admission.outcome()
        });
        match outcome {
            RequestOutcome::Deferred => self.logger.debug(format_args!(
                "i2c: {:#04x} queued for bus",
                device.address()
            )),
            RequestOutcome::Invalid => self.logger.warn(format_args!(
                "i2c: request from {:#04x} refused",
                device.address()
            )),
            RequestOutcome::Active => {}
        }
        outcome
    }

    fn release(&self, device: &BusDevice) -> ReleaseOutcome {
        let outcome = self.with_state(|state, cs| {
            let busy = state.wire_busy();
            match state.arbiter.release(device.id(), busy) {
                Departure::NotQueued => ReleaseOutcome::NotOwner,
                Departure::Busy => ReleaseOutcome::Pending,
                Departure::Withdrawn => ReleaseOutcome::Removed,
                Departure::Retired(next) => {
                    state.transfer.reset();
                    if state.hardware.is_general_call() {
                        state.hardware.set_general_call(false);
                    }
                    if let Some((next, ready)) = next {
                        state.hardware.set_target_address(next.address());
                        if let Some(ready) = ready {
                            ready.notify(cs, next);
                        }
                    }
                    ReleaseOutcome::Removed
                }
            }
        });
        if outcome == ReleaseOutcome::Pending {
            self.logger.debug(format_args!(
                "i2c: release of {:#04x} deferred, transfer in flight",
                device.address()
            ));
        }
        outcome
    }

    fn is_active_device(&self, device: &BusDevice) -> bool {
        self.with_state(|state, _| state.arbiter.is_active(device.id()))
    }

    fn write(
        &self,
        device: &BusDevice,
        flags: TransferFlags,
        data: &[u8],
        done: Option<&'a dyn BusEvent>,
    ) -> Result<(), Error> {
        self.with_state(|state, _| {
            state.ready_for_transfer(device)?;
            let BusState {
                hardware, transfer, ..
            } = state;
            transfer.start_write(hardware, *device, flags, data, done)
        })
    }

    fn read(
        &self,
        device: &BusDevice,
        flags: TransferFlags,
        len: usize,
        done: &'a dyn BusEvent,
    ) -> Result<(), Error> {
        self.with_state(|state, _| {
            state.ready_for_transfer(device)?;
            let BusState {
                hardware, transfer, ..
            } = state;
            transfer.start_read(hardware, *device, flags, len, done)
        })
    }

    fn read_result(&self, device: &BusDevice, out: &mut [u8]) -> Result<usize, Error> {
        self.with_state(|state, _| state.transfer.read_result(*device, out))
    }

    fn set_general_call_mode(&self, device: &BusDevice, enabled: bool) -> Result<(), Error> {
        self.with_state(|state, _| {
            state.idle_owner(device)?;
            state.hardware.set_general_call(enabled);
            Ok(())
        })
    }

    fn is_general_call_mode(&self, device: &BusDevice) -> Result<bool, Error> {
        self.with_state(|state, _| {
            state.owner(device)?;
            Ok(state.hardware.is_general_call())
        })
    }

    fn bus_pins(&self) -> BusPins {
        self.with_state(|state, _| state.config.pins)
    }

    fn set_bus_pins(&self, device: &BusDevice, pins: BusPins) -> Result<(), Error> {
        self.with_state(|state, _| {
            state.idle_owner(device)?;
            state.config.pins = pins;
            if state.attached {
                state.hardware.deinit();
                state.hardware.init(&state.config);
                state.hardware.set_target_address(device.address());
            }
            Ok(())
        })
    }

    fn detach(&self, device: &BusDevice) -> Result<(), Error> {
        self.with_state(|state, _| {
            state.idle_owner(device)?;
            state.transfer.reset();
            state.hardware.deinit();
            state.attached = false;
            Ok(())
        })
    }

    fn reattach(&self, device: &BusDevice) -> Result<(), Error> {
        self.with_state(|state, _| {
            state.owner(device)?;
            state.arbiter.update_active_address(*device);
            state.hardware.init(&state.config);
            state.hardware.set_target_address(device.address());
            state.attached = true;
            Ok(())
        })
    }
}

impl<H, L, const N: usize> InterruptHandler for I2cBus<'_, H, L, N>
where
    H: I2cPeripheral + Send,
    L: Logger + Sync,
{
    fn on_interrupt(&self) {
        I2cBus::on_interrupt(self);
    }
}
